use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Runtime settings, resolved once from the environment at startup and passed
/// down explicitly — components never read env vars themselves.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the ingest queue, its lock file and the DLQ streams.
    pub buffer_dir: PathBuf,

    // Feeds / polling
    pub openphish_feed_url: String,
    pub sinkingyachts_feed_url: String,
    pub feed_poll_interval: Duration,
    pub feed_batch_limit: usize,
    pub feed_seen_ttl: Duration,

    // Vector store
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub qdrant_rps: f64,
    pub qdrant_timeout: Duration,

    // Embeddings
    pub ollama_base_url: String,
    pub embed_model_name: String,
    pub ollama_timeout: Duration,
    pub ollama_rps: f64,

    // Dedup floors
    pub dedup_same_domain_min_sim: f32,
    pub dedup_global_min_sim: f32,
    pub dedup_top_k: usize,

    // Retry / breaker
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_multiplier: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_time: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            buffer_dir: PathBuf::from(env_or("BUFFER_DIR", "./buffer")),

            openphish_feed_url: env_or(
                "OPENPHISH_FEED_URL",
                "https://raw.githubusercontent.com/openphish/public_feed/refs/heads/main/feed.txt",
            ),
            sinkingyachts_feed_url: env_or(
                "SINKINGYACHTS_FEED_URL",
                "https://phish.sinking.yachts/v2/urls",
            ),
            feed_poll_interval: Duration::from_secs(env_parse(
                "FEED_POLL_INTERVAL_SECONDS",
                60u64,
            )),
            feed_batch_limit: env_parse("FEED_BATCH_LIMIT", 200usize),
            feed_seen_ttl: Duration::from_secs(env_parse(
                "FEED_SEEN_TTL_SECONDS",
                14 * 24 * 3600u64,
            )),

            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_collection: env_or("QDRANT_COLLECTION", "phishfeed_urls"),
            qdrant_rps: env_parse("QDRANT_RPS", 10.0f64),
            qdrant_timeout: Duration::from_secs_f64(env_parse("QDRANT_TIMEOUT", 5.0f64)),

            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            embed_model_name: env_or("EMBED_MODEL_NAME", "embeddinggemma:latest"),
            ollama_timeout: Duration::from_secs_f64(env_parse("OLLAMA_TIMEOUT", 30.0f64)),
            ollama_rps: env_parse("OLLAMA_RPS", 4.0f64),

            dedup_same_domain_min_sim: env_parse("DEDUP_SAME_DOMAIN_MIN_SIM", 0.94f32),
            dedup_global_min_sim: env_parse("DEDUP_GLOBAL_MIN_SIM", 0.985f32),
            dedup_top_k: env_parse("DEDUP_TOP_K", 5usize),

            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 5u32),
            retry_initial_delay: Duration::from_secs_f64(env_parse("RETRY_INITIAL_DELAY", 0.25f64)),
            retry_max_delay: Duration::from_secs_f64(env_parse("RETRY_MAX_DELAY", 5.0f64)),
            retry_multiplier: env_parse("RETRY_MULTIPLIER", 2.0f64),
            breaker_failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5u32),
            breaker_recovery_time: Duration::from_secs_f64(env_parse(
                "BREAKER_RECOVERY_TIME",
                10.0f64,
            )),
        }
    }
}
