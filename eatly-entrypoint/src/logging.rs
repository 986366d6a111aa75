//! Tracing subscriber setup for the entrypoint binary.
//!
//! Logs go to stderr so the container runtime's log stream captures them
//! alongside the output of the commands we run.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "eatly_entrypoint=info";
const VERBOSE_LOG_FILTER: &str = "eatly_entrypoint=debug";

/// Install the global subscriber. `RUST_LOG` wins unless `verbose` is set.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}
