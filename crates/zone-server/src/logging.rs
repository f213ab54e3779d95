//! Structured logging setup: an `EnvFilter` driven by `RUST_LOG`
//! (defaulting to `info`), with target, file/line, and thread id attached
//! to every event.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .init();
}
