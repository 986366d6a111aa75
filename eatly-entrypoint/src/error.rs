//! Fatal startup errors and their process exit codes
//!
//! Configuration anomalies never reach this type: the resolver and the
//! config layer recover from them locally and log a warning. Everything
//! here aborts startup.

use snafu::Snafu;
use std::process::ExitStatus;

/// Exit code for configuration and internal errors outside the stage taxonomy
pub const EXIT_GENERIC: i32 = 1;
pub const EXIT_DEPENDENCY_UNAVAILABLE: i32 = 3;
pub const EXIT_MIGRATION_FAILED: i32 = 4;
pub const EXIT_ASSETS_FAILED: i32 = 5;
pub const EXIT_LAUNCH_FAILED: i32 = 6;

/// A startup stage failed and the container must not start serving
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StartupError {
    #[snafu(display(
        "dependency unavailable: postgres at {target} not reachable after {attempts} attempts"
    ))]
    DependencyUnavailable { target: String, attempts: u32 },

    #[snafu(display("migration failed: {source}"))]
    Migration { source: StepError },

    #[snafu(display("static asset collection failed: {source}"))]
    AssetCollection { source: StepError },

    #[snafu(display("failed to launch `{command}`: {source}"))]
    Launch {
        command: String,
        source: std::io::Error,
    },
}

impl StartupError {
    /// Distinct non-zero code per fatal stage
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DependencyUnavailable { .. } => EXIT_DEPENDENCY_UNAVAILABLE,
            Self::Migration { .. } => EXIT_MIGRATION_FAILED,
            Self::AssetCollection { .. } => EXIT_ASSETS_FAILED,
            Self::Launch { .. } => EXIT_LAUNCH_FAILED,
        }
    }
}

/// Failure of a single external command (migrate, collectstatic)
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StepError {
    #[snafu(display("could not run `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` exited with {status}"))]
    Exit { command: String, status: ExitStatus },
}

/// Map any error surfaced to `main` onto a process exit code
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StartupError>())
        .map_or(EXIT_GENERIC, StartupError::exit_code)
}
