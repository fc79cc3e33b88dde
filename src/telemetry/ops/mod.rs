pub mod decide;
pub mod dlq;
pub mod init;
pub mod poll;
pub mod queue;
