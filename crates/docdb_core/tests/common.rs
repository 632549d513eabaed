//! Shared integration-test setup.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs an `EnvFilter`-based tracing subscriber once per test binary,
/// mirroring the CLI's own `tracing_subscriber::fmt().with_env_filter(...)`
/// setup so `RUST_LOG=docdb_core=debug cargo test -- --nocapture` surfaces
/// the same spans recovery and checkpointing emit in production.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().init();
    });
}
