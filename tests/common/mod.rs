//! Shared test-only helpers, not a standalone test binary (nested under
//! `tests/common/`, so cargo doesn't pick it up as its own target).

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a `tracing_subscriber` fmt subscriber once per test process, so
/// failing scenarios can be re-run with `RUST_LOG` for diagnostics. Safe to
/// call from every test; only the first call has any effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
