//! Tracing setup for services embedding the scheduler.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `opsched=info` when the variable is unset. Does nothing when the
/// embedding application has already installed its own subscriber.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opsched=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
