//! Container startup for the eatly service
//!
//! - Environment resolution (mode, datastore parameters, `.env` overrides)
//! - Datastore readiness probe (production-like modes only)
//! - Schema migrations and static asset collection
//! - Exec hand-off to the development or worker pool server

pub mod environment;
pub mod launcher;
pub mod override_file;
pub mod pipeline;
pub mod prober;
pub mod report;
pub mod steps;

pub use environment::{DeploymentMode, Resolution, ResolvedEnvironment, resolve};
pub use launcher::{LaunchPlan, ServerKind, launch};
pub use pipeline::{StartupPlan, run_until_launch};
pub use prober::ReadinessProber;
pub use report::{PlanReport, print_plan_report};
pub use steps::ProcessRunner;
