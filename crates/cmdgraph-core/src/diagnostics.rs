//! Logging setup and rate-limited warnings.
//!
//! Hint substitutions can happen on every append of a hot recording loop,
//! so they go through [`warn_once`]: the first occurrence of a key is
//! logged at WARN, later ones at DEBUG.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogLevel;

static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashSet<String>> {
    WARNED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Log `message` at WARN the first time `key` is seen, at DEBUG afterwards.
///
/// Returns `true` when this call emitted the WARN.
pub fn warn_once(key: &str, message: &str) -> bool {
    // A panic while holding the set cannot leave it inconsistent.
    let mut seen = match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if seen.insert(key.to_string()) {
        tracing::warn!(key = %key, "{}", message);
        true
    } else {
        tracing::debug!(key = %key, "(rate-limited) {}", message);
        false
    }
}

/// Forget every key seen so far.
pub fn reset_warnings() {
    let mut seen = match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    seen.clear();
}

/// Install a fmt subscriber filtered at `level`, unless `RUST_LOG` says
/// otherwise. Does nothing if a global subscriber already exists.
pub fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(cmdgraph_warn)]
    fn first_occurrence_warns() {
        reset_warnings();
        assert!(warn_once("diag_test_a", "first"));
        assert!(!warn_once("diag_test_a", "second"));
        assert!(warn_once("diag_test_b", "other key"));
    }

    #[test]
    #[serial(cmdgraph_warn)]
    fn reset_re_arms_keys() {
        reset_warnings();
        assert!(warn_once("diag_test_c", "x"));
        reset_warnings();
        assert!(warn_once("diag_test_c", "x"));
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(LogLevel::Debug);
        init_tracing(LogLevel::Trace);
    }
}
