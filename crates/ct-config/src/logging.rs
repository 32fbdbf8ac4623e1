//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber.
///
/// `verbose` forces the `debug` level; otherwise the filter comes from
/// `RUST_LOG`. Returns `false` when a global subscriber was already set.
pub fn init(verbose: bool) -> bool {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
