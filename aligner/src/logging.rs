//! Diagnostic tracing for aligner runs.
//!
//! Output goes to stderr so stdout stays reserved for command results
//! (`plan --json` in particular). Full build and check output is not logged
//! here; only excerpts travel in errors, and the full-system check log is
//! written under `.aligner/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Without it the level is `warn`, or `aligner=info` when
/// `verbose` is set.
///
/// # Example
/// ```bash
/// RUST_LOG=aligner=debug aligner plan
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,aligner=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
