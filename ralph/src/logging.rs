//! Diagnostic tracing to stderr.
//!
//! This is separate from the agent transcript in `.ralph/current.log`, which
//! the executor always appends to regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,ralph=info" } else { "warn" }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set, e.g. `RUST_LOG=ralph=debug ralph resume`.
/// Otherwise `--verbose` raises ralph's own events to `info`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
