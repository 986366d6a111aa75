//! Startup sequence: resolve → probe (production-like only) → migrate →
//! collect static → launch
//!
//! Stages run strictly in order and never re-enter an earlier stage. The
//! plan is computed once from the resolved mode, so the probe decision and
//! the server choice can't disagree.

use crate::config::{EntrypointConfig, ProbeStrategy};
use crate::error::StartupError;
use crate::startup::environment::{DatastoreConfig, DeploymentMode, Resolution, ResolvedEnvironment};
use crate::startup::launcher::{LaunchPlan, expand_server_vars};
use crate::startup::prober::{ReadinessProber, RetryBudget};
use crate::startup::steps::{self, CommandSpec, StepRunner};
use std::fmt;
use tracing::{Instrument, info, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveEnv,
    ProbeDependency,
    Migrate,
    CollectAssets,
    Launch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveEnv => "resolve_env",
            Self::ProbeDependency => "probe_dependency",
            Self::Migrate => "migrate",
            Self::CollectAssets => "collect_assets",
            Self::Launch => "launch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePlan {
    pub strategy: ProbeStrategy,
    pub budget: RetryBudget,
}

/// Everything startup will do, decided up front from one resolved mode
#[derive(Debug, Clone)]
pub struct StartupPlan {
    pub mode: DeploymentMode,
    pub datastore: DatastoreConfig,
    /// `None` when the mode skips the datastore wait
    pub probe: Option<ProbePlan>,
    pub migrate: CommandSpec,
    pub collect_static: CommandSpec,
    pub launch: LaunchPlan,
}

impl StartupPlan {
    pub fn new(resolution: &Resolution, config: &EntrypointConfig) -> Self {
        let mode = resolution.mode;
        let env = &resolution.env;
        let probe = mode.is_production_like().then(|| ProbePlan {
            strategy: config.probe.strategy,
            budget: config.retry_budget(),
        });

        Self {
            mode,
            datastore: resolution.datastore.clone(),
            probe,
            migrate: expand_server_vars(&config.commands.migrate, &config.server, env),
            collect_static: expand_server_vars(&config.commands.collect_static, &config.server, env),
            launch: LaunchPlan::select(mode, &config.server, &config.commands, env),
        }
    }

    /// Stages that will run, in order
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::ResolveEnv];
        if self.probe.is_some() {
            stages.push(Stage::ProbeDependency);
        }
        stages.extend([Stage::Migrate, Stage::CollectAssets, Stage::Launch]);
        stages
    }
}

/// Run every stage before launch. On success the caller hands off to
/// `launcher::launch` with the plan's launch command.
pub async fn run_until_launch(
    plan: &StartupPlan,
    env: &ResolvedEnvironment,
    prober: &ReadinessProber,
    runner: &dyn StepRunner,
) -> Result<(), StartupError> {
    if plan.probe.is_some() {
        prober
            .wait_for(&plan.datastore)
            .instrument(info_span!("stage", name = %Stage::ProbeDependency))
            .await?;
    } else {
        info!(mode = %plan.mode, "skipping datastore wait");
    }

    steps::apply_migrations(runner, &plan.migrate, env)
        .instrument(info_span!("stage", name = %Stage::Migrate))
        .await?;

    steps::collect_static(runner, &plan.collect_static, env)
        .instrument(info_span!("stage", name = %Stage::CollectAssets))
        .await?;

    Ok(())
}
