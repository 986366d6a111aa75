//! Final hand-off to the web server process
//!
//! On Unix the server replaces this process via `exec`, so it inherits our
//! PID (usually 1 in a container) and receives SIGTERM/SIGINT directly from
//! the runtime. Nothing here installs signal handlers.

use crate::config::{CommandsConfig, ServerConfig};
use crate::error::StartupError;
use crate::startup::environment::{DeploymentMode, ResolvedEnvironment};
use crate::startup::steps::CommandSpec;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::process::Command;
use tracing::info;

/// Which server variant a mode launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// Single auto-reloading development server
    Development,
    /// Fixed-size worker pool
    WorkerPool,
}

impl ServerKind {
    pub fn for_mode(mode: DeploymentMode) -> Self {
        if mode.is_production_like() {
            Self::WorkerPool
        } else {
            Self::Development
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development server"),
            Self::WorkerPool => f.write_str("worker pool server"),
        }
    }
}

/// The server command chosen for a mode, with `$BIND`/`$PORT`/`$WORKERS` expanded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub kind: ServerKind,
    pub command: CommandSpec,
}

impl LaunchPlan {
    pub fn select(
        mode: DeploymentMode,
        server: &ServerConfig,
        commands: &CommandsConfig,
        env: &ResolvedEnvironment,
    ) -> Self {
        let kind = ServerKind::for_mode(mode);
        let template = match kind {
            ServerKind::Development => &commands.dev_server,
            ServerKind::WorkerPool => &commands.prod_server,
        };
        Self {
            kind,
            command: expand_server_vars(template, server, env),
        }
    }
}

/// Expand a command template against the server settings, then the environment
pub fn expand_server_vars(
    template: &CommandSpec,
    server: &ServerConfig,
    env: &ResolvedEnvironment,
) -> CommandSpec {
    template.expand(|name| match name {
        "BIND" => Some(Cow::Owned(server.bind.clone())),
        "PORT" => Some(Cow::Owned(server.port.to_string())),
        "WORKERS" => Some(Cow::Owned(server.workers.to_string())),
        other => env.get(other).map(|value| Cow::Owned(value.to_string())),
    })
}

fn build_command(plan: &LaunchPlan, env: &ResolvedEnvironment) -> Command {
    let mut command = Command::new(&plan.command.program);
    command.args(&plan.command.args).env_clear().envs(env.iter());
    command
}

/// Replace this process with the server. Only returns on failure.
#[cfg(unix)]
pub fn launch(plan: &LaunchPlan, env: &ResolvedEnvironment) -> Result<i32, StartupError> {
    use std::os::unix::process::CommandExt;

    info!(server = %plan.kind, command = %plan.command, "exec'ing server");
    let source = build_command(plan, env).exec();
    Err(StartupError::Launch {
        command: plan.command.to_string(),
        source,
    })
}

/// Run the server as a child and hand back its exit code
#[cfg(not(unix))]
pub fn launch(plan: &LaunchPlan, env: &ResolvedEnvironment) -> Result<i32, StartupError> {
    info!(server = %plan.kind, command = %plan.command, "starting server");
    let status = build_command(plan, env)
        .status()
        .map_err(|source| StartupError::Launch {
            command: plan.command.to_string(),
            source,
        })?;
    Ok(status.code().unwrap_or(1))
}
