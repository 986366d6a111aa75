//! Startup commands for the container entrypoint
//!
//! - `run`: resolve, wait for postgres, migrate, collect static, exec server
//! - `plan`: show what `run` would do
//! - `probe`: only wait for postgres

use crate::config::EntrypointConfig;
use crate::startup::environment::resolve;
use crate::startup::{
    LaunchPlan, PlanReport, ProcessRunner, ReadinessProber, Resolution, ResolvedEnvironment,
    StartupPlan, print_plan_report, run_until_launch,
};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;
use tracing::info;

#[derive(Debug, Subcommand, Clone, Default)]
pub enum StartupCommands {
    /// Run the full startup sequence and exec the server (default)
    #[default]
    #[clap(alias = "start")]
    Run,

    /// Print the startup plan without running anything
    Plan {
        /// Emit JSON instead of the human summary
        #[clap(long)]
        json: bool,
    },

    /// Wait for the datastore only, regardless of mode
    Probe,
}

/// Configuration and environment, resolved once per invocation
#[derive(Debug, Clone)]
pub struct StartupContext {
    pub config: EntrypointConfig,
    pub resolution: Resolution,
}

impl StartupContext {
    /// Resolve the environment first so `.env` bindings can feed config overrides
    pub fn load(config_path: Option<&Path>, env_file: &Path) -> Result<Self> {
        let resolution = resolve(ResolvedEnvironment::from_process(), env_file);
        let mut config =
            EntrypointConfig::load(config_path).context("Failed to load entrypoint config")?;
        config.apply_env_overrides(&resolution.env);

        info!(mode = %resolution.mode, datastore = %resolution.datastore.target(), "environment resolved");
        Ok(Self { config, resolution })
    }

    pub fn plan(&self) -> StartupPlan {
        StartupPlan::new(&self.resolution, &self.config)
    }

    fn prober(&self) -> ReadinessProber {
        ReadinessProber::from_config(&self.config.probe, self.config.retry_budget())
    }
}

/// What `main` does once the async stages are finished
#[derive(Debug)]
pub enum Outcome {
    Exit(i32),
    /// Replace the process with this server
    Launch(LaunchPlan, ResolvedEnvironment),
}

/// Handle startup commands
pub async fn handle_startup_command(cmd: StartupCommands, ctx: StartupContext) -> Result<Outcome> {
    match cmd {
        StartupCommands::Run => run_startup(ctx).await,
        StartupCommands::Plan { json } => show_plan(&ctx, json),
        StartupCommands::Probe => probe_only(&ctx).await,
    }
}

async fn run_startup(ctx: StartupContext) -> Result<Outcome> {
    let plan = ctx.plan();
    let prober = ctx.prober();

    run_until_launch(&plan, &ctx.resolution.env, &prober, &ProcessRunner).await?;

    Ok(Outcome::Launch(plan.launch, ctx.resolution.env))
}

fn show_plan(ctx: &StartupContext, json: bool) -> Result<Outcome> {
    let plan = ctx.plan();
    let report = PlanReport::new(&ctx.resolution, &plan);

    if json {
        println!("{}", report.to_json().context("Failed to serialize plan")?);
    } else {
        print_plan_report(&report);
    }

    Ok(Outcome::Exit(0))
}

async fn probe_only(ctx: &StartupContext) -> Result<Outcome> {
    let attempts = ctx.prober().wait_for(&ctx.resolution.datastore).await?;
    println!("✅ {} reachable after {attempts} attempt(s)", ctx.resolution.datastore.target());
    Ok(Outcome::Exit(0))
}
