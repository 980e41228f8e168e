//! Logging setup for applications and tests
//!
//! The library only emits `tracing` events; nothing is printed until the
//! embedding application installs a subscriber, either its own or this one.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "chapter_cache=info";

/// Install a formatting subscriber filtered by `RUST_LOG`
///
/// Returns `false` if a global subscriber was already set, so calling it from
/// every test is harmless.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
