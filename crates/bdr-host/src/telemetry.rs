//! Diagnostic logging.
//!
//! Everything goes to stderr; stdout belongs to the message channel.

use std::io;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directives used when `RUST_LOG` is unset or empty.
///
/// Every workspace crate logs at info, dependencies only warn.
pub const DEFAULT_DIRECTIVES: &str =
    "warn,bdr_host=info,bdr_logs=info,bdr_config=info,bdr_persist=info";

/// Filter built from `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`].
pub fn env_filter() -> EnvFilter {
    filter_from(&std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default())
}

/// Filter built from a directive string. Invalid directives are skipped.
pub fn filter_from(directives: &str) -> EnvFilter {
    let directives = if directives.trim().is_empty() {
        DEFAULT_DIRECTIVES
    } else {
        directives
    };
    EnvFilter::builder().parse_lossy(directives)
}

/// Installs the global stderr subscriber.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_ansi(false))
        .with(env_filter())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn default_filter_covers_every_workspace_crate() {
        let subscriber = tracing_subscriber::registry().with(filter_from(""));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "bdr_logs::engine", Level::WARN));
            assert!(tracing::enabled!(target: "bdr_logs::state", Level::INFO));
            assert!(tracing::enabled!(target: "bdr_config", Level::WARN));
            assert!(tracing::enabled!(target: "bdr_persist::fsync", Level::WARN));
            assert!(tracing::enabled!(target: "bdr_host::host", Level::INFO));
            assert!(!tracing::enabled!(target: "bdr_logs::writer", Level::DEBUG));
            assert!(!tracing::enabled!(target: "mio::poll", Level::INFO));
        });
    }

    #[test]
    fn explicit_directives_replace_the_default() {
        let subscriber = tracing_subscriber::registry().with(filter_from("bdr_logs=debug"));
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "bdr_logs::writer", Level::DEBUG));
            assert!(!tracing::enabled!(target: "bdr_host::serve", Level::INFO));
        });
    }

    #[test]
    fn blank_directives_use_the_default() {
        assert_eq!(
            filter_from("  ").to_string(),
            filter_from(DEFAULT_DIRECTIVES).to_string()
        );
    }
}
