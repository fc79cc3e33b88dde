pub mod config;
pub mod ctx;
pub mod emit;
pub mod ops;

use ctx::LogCtx;

// Factory helpers, one per CLI verb
pub fn poll() -> LogCtx<ops::poll::Poll> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn queue() -> LogCtx<ops::queue::Queue> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn decide() -> LogCtx<ops::decide::Decide> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn init() -> LogCtx<ops::init::Init> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn dlq() -> LogCtx<ops::dlq::Dlq> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
