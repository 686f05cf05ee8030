//! Tracing subscriber setup for embedding applications

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `level`. Returns false when a global
/// subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init_logging("debug");
        assert!(!init_logging("info"));
    }
}
