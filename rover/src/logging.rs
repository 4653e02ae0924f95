//! Diagnostic tracing for rover.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. Command output
//! (human lines or `--json`) goes to stdout and is never affected by it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`; `verbose` raises rover's own
/// events to `debug` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=rover=debug rover merge 3
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "warn,rover=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
