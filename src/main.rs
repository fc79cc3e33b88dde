use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod config;
mod decide;
mod dedup;
mod dlq;
mod domain;
mod embed;
mod error;
mod init;
mod poller;
mod queue;
mod resilience;
mod seen;
mod store;
mod telemetry;
mod warehouse;

#[derive(Parser)]
#[command(name = "phishfeed", about = "Phishing URL feed ingest & dedup CLI")]
struct Cli {
    /// Emit a single JSON envelope to stdout; logs go to stderr
    #[arg(global = true, long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Init(init::InitCmd),
    Poll(poller::PollCmd),
    Queue(queue::QueueCmd),
    Decide(decide::DecideCmd),
    Dlq(dlq::DlqCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::config::set_json_mode(cli.json);

    // initialize logging/tracing (stderr). Respect RUST_LOG and FEEDER_LOG_FORMAT
    telemetry::config::init_tracing();
    let settings = config::Settings::from_env();

    match cli.command {
        Commands::Init(args) => init::run(&settings, args).await?,
        Commands::Poll(args) => poller::run(&settings, args).await?,
        Commands::Queue(args) => queue::run(&settings, args).await?,
        Commands::Decide(args) => decide::run(&settings, args).await?,
        Commands::Dlq(args) => dlq::run(&settings, args).await?,
    }

    Ok(())
}
