//! Startup plan report for `eatly-entrypoint plan`
//!
//! Shows what a real start would do without doing any of it. Credentials
//! are reduced to "set / not set".

use crate::config::ProbeStrategy;
use crate::startup::environment::{DeploymentMode, Resolution, SETTINGS_MODULE_VAR};
use crate::startup::launcher::LaunchPlan;
use crate::startup::pipeline::{Stage, StartupPlan};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub generated_at: String,
    pub mode: DeploymentMode,
    pub settings_module: Option<String>,
    pub override_file: Option<PathBuf>,
    /// Keys bound by the override file (values are never reported)
    pub overridden: Vec<String>,
    pub skipped_override_lines: usize,
    pub probe: Option<ProbeReport>,
    /// Every stage a real start runs, in order
    pub stages: Vec<String>,
    pub steps: Vec<StepReport>,
    pub launch: LaunchPlan,
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub target: String,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password_set: bool,
    pub strategy: ProbeStrategy,
    pub attempts: u32,
    pub interval_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub stage: String,
    pub command: String,
}

impl PlanReport {
    pub fn new(resolution: &Resolution, plan: &StartupPlan) -> Self {
        let probe = plan.probe.map(|probe| ProbeReport {
            target: plan.datastore.target(),
            database: plan.datastore.database.clone(),
            user: plan.datastore.user.clone(),
            password_set: plan.datastore.password.is_some(),
            strategy: probe.strategy,
            attempts: probe.budget.remaining(),
            interval_secs: probe.budget.interval().as_secs_f64(),
        });

        let steps = vec![
            StepReport {
                stage: Stage::Migrate.to_string(),
                command: plan.migrate.to_string(),
            },
            StepReport {
                stage: Stage::CollectAssets.to_string(),
                command: plan.collect_static.to_string(),
            },
        ];

        Self {
            generated_at: Utc::now().to_rfc3339(),
            mode: plan.mode,
            settings_module: resolution.env.get(SETTINGS_MODULE_VAR).map(str::to_string),
            override_file: resolution.override_file.clone(),
            overridden: resolution.overridden.clone(),
            skipped_override_lines: resolution.skipped_lines,
            probe,
            stages: plan.stages().iter().map(ToString::to_string).collect(),
            steps,
            launch: plan.launch.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Print the plan in human-readable form
pub fn print_plan_report(report: &PlanReport) {
    println!("🚢 eatly startup plan");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Generated: {}", report.generated_at);
    println!("Mode:      {}", report.mode);
    if let Some(ref settings) = report.settings_module {
        println!("Settings:  {settings}");
    }
    println!();

    match report.override_file {
        Some(ref path) => {
            println!("📄 Override file: {}", path.display());
            if !report.overridden.is_empty() {
                println!("  bound: {}", report.overridden.join(", "));
            }
            if report.skipped_override_lines > 0 {
                println!("  ⚠️  {} malformed line(s) skipped", report.skipped_override_lines);
            }
        }
        None => println!("📄 Override file: none"),
    }
    println!();

    match report.probe {
        Some(ref probe) => {
            println!("⏳ Wait for postgres at {} ({} strategy)", probe.target, probe.strategy);
            println!(
                "  {} attempts, {}s apart",
                probe.attempts, probe.interval_secs
            );
            println!(
                "  database: {}, user: {}, password: {}",
                probe.database.as_deref().unwrap_or("(unset)"),
                probe.user.as_deref().unwrap_or("(unset)"),
                if probe.password_set { "set" } else { "(unset)" }
            );
        }
        None => println!("⏭️  Datastore wait skipped in {} mode", report.mode),
    }
    println!();

    println!("🧭 Stages: {}", report.stages.join(" → "));
    println!();

    println!("🔧 Steps:");
    for step in &report.steps {
        println!("  {:<15} {}", step.stage, step.command);
    }
    println!();

    println!("🚀 Launch {}:", report.launch.kind);
    println!("  {}", report.launch.command);
}
