//! # Observability
//!
//! Structured logging setup for the data plane using the tracing ecosystem.
//!
//! Log records carry structured fields (secret name, correlation id, queue
//! depths) rather than formatted strings, so downstream collectors can index
//! them. Secret values are never logged.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` when set, defaulting to `info`.
/// Set `json` for machine-readable output in containerized deployments.
/// Calling this more than once is a no-op.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false);
        init_tracing(false);
        init_tracing(true);
    }
}
