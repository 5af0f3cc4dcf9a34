//! Structured logging bootstrap. Idempotent: the first caller wins, every
//! later call is a no-op, so a host binary and this crate's own tests can
//! both call `init_observability()` without fighting over the global
//! subscriber.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

static INIT: OnceLock<()> = OnceLock::new();

/// Reads `BENTO_LOG_LEVEL` (falling back to `RUST_LOG`, then `info`) for the
/// filter, and `BENTO_JSON_LOG_PATH` to redirect output to rolling JSONL
/// files via `tracing-appender` instead of the default compact console
/// layer. Returns the appender's flush guard when a file sink was
/// configured — the caller must keep it alive for the process lifetime.
pub fn init_observability() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let mut guard = None;

    INIT.get_or_init(|| {
        let filter = std::env::var("BENTO_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

        if let Ok(path) = std::env::var("BENTO_JSON_LOG_PATH") {
            let directory = std::path::Path::new(&path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(&path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("bento-engine.jsonl");
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, worker_guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();

            guard = Some(worker_guard);
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .init();
        }
    });

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let _ = init_observability();
        let _ = init_observability();
    }
}
