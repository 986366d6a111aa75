//! External startup steps: schema migrations and static asset collection
//!
//! Both steps shell out to the service's own management commands and run
//! exactly once. Neither is retried: a failed migration needs an operator,
//! not a second attempt.

use crate::error::{
    AssetCollectionSnafu, ExitSnafu, MigrationSnafu, SpawnSnafu, StartupError, StepError,
};
use crate::startup::environment::ResolvedEnvironment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::borrow::Cow;
use std::fmt;
use tracing::info;

/// A program plus arguments, deserialized from a non-empty string array
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Expand `$VAR` / `${VAR}` references. `lookup` returning `None` leaves
    /// the reference untouched.
    pub fn expand<'a, F>(&self, mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<Cow<'a, str>>,
    {
        let mut expand = |input: &str| {
            shellexpand::env_with_context_no_errors(input, |name: &str| lookup(name)).into_owned()
        };
        Self {
            program: expand(&self.program),
            args: self.args.iter().map(|arg| expand(arg)).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for CommandSpec {
    type Error = String;

    fn try_from(argv: Vec<String>) -> Result<Self, Self::Error> {
        let mut argv = argv.into_iter();
        match argv.next() {
            Some(program) if !program.trim().is_empty() => Ok(Self {
                program,
                args: argv.collect(),
            }),
            _ => Err("command must name a program".to_string()),
        }
    }
}

impl From<CommandSpec> for Vec<String> {
    fn from(spec: CommandSpec) -> Self {
        std::iter::once(spec.program).chain(spec.args).collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs one external command to completion
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec, env: &ResolvedEnvironment) -> Result<(), StepError>;
}

/// Runs commands as child processes with inherited stdio, so the tool's own
/// diagnostics land in the container log untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl StepRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, env: &ResolvedEnvironment) -> Result<(), StepError> {
        let command = command.clone();
        let env = env.clone();
        let display = command.to_string();
        tokio::task::spawn_blocking(move || run_command(&command, &env))
            .await
            .map_err(std::io::Error::other)
            .context(SpawnSnafu { command: display })?
    }
}

/// Run a command with exactly the resolved environment and check for success
fn run_command(command: &CommandSpec, env: &ResolvedEnvironment) -> Result<(), StepError> {
    let output = duct::cmd(command.program.as_str(), &command.args)
        .full_env(env.iter())
        .unchecked()
        .run()
        .context(SpawnSnafu {
            command: command.to_string(),
        })?;

    ensure!(
        output.status.success(),
        ExitSnafu {
            command: command.to_string(),
            status: output.status,
        }
    );
    Ok(())
}

/// Apply pending schema migrations; the command itself must be idempotent
pub async fn apply_migrations(
    runner: &dyn StepRunner,
    command: &CommandSpec,
    env: &ResolvedEnvironment,
) -> Result<(), StartupError> {
    info!(%command, "applying schema migrations");
    runner.run(command, env).await.context(MigrationSnafu)?;
    info!("migrations applied");
    Ok(())
}

/// Publish static assets into the serving directory
pub async fn collect_static(
    runner: &dyn StepRunner,
    command: &CommandSpec,
    env: &ResolvedEnvironment,
) -> Result<(), StartupError> {
    info!(%command, "collecting static assets");
    runner.run(command, env).await.context(AssetCollectionSnafu)?;
    info!("static assets collected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[test]
    fn test_display_joins_argv() {
        let spec = CommandSpec::new("python", ["manage.py", "migrate", "--noinput"]);
        assert_eq!(spec.to_string(), "python manage.py migrate --noinput");
    }

    #[test]
    fn test_try_from_rejects_empty() {
        assert!(CommandSpec::try_from(Vec::new()).is_err());
        assert!(CommandSpec::try_from(vec!["  ".to_string()]).is_err());

        let spec = CommandSpec::try_from(vec!["gunicorn".to_string(), "app".to_string()]).unwrap();
        assert_eq!(spec.program, "gunicorn");
        assert_eq!(spec.args, vec!["app"]);
    }

    #[test]
    fn test_expand_known_and_unknown_vars() {
        let vars: HashMap<&str, &str> = [("BIND", "0.0.0.0"), ("PORT", "8000")].into();
        let spec = CommandSpec::new("runserver", ["${BIND}:${PORT}", "$MISSING", "--flag"]);

        let expanded = spec.expand(|name| vars.get(name).map(|v| Cow::Borrowed(*v)));
        assert_eq!(expanded.args, vec!["0.0.0.0:8000", "$MISSING", "--flag"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_success_and_failure() {
        let env = ResolvedEnvironment::from_pairs([("PATH", "/usr/bin:/bin")]);

        assert!(ProcessRunner.run(&sh("exit 0"), &env).await.is_ok());

        let err = ProcessRunner.run(&sh("exit 3"), &env).await.unwrap_err();
        assert!(matches!(err, StepError::Exit { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_missing_program() {
        let env = ResolvedEnvironment::from_pairs([("PATH", "/usr/bin:/bin")]);
        let spec = CommandSpec::new("/nonexistent/definitely-not-here", Vec::<String>::new());

        let err = ProcessRunner.run(&spec, &env).await.unwrap_err();
        assert!(matches!(err, StepError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_passes_resolved_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let env = ResolvedEnvironment::from_pairs([
            ("PATH", "/usr/bin:/bin"),
            ("GREETING", "hello"),
            ("OUT", out.to_str().unwrap()),
        ]);

        ProcessRunner
            .run(&sh("printf %s \"$GREETING\" > \"$OUT\""), &env)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_migration_failure_maps_to_stage_error() {
        let env = ResolvedEnvironment::from_pairs([("PATH", "/usr/bin:/bin")]);

        let err = apply_migrations(&ProcessRunner, &sh("exit 1"), &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Migration { .. }));

        let err = collect_static(&ProcessRunner, &sh("exit 1"), &env)
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::AssetCollection { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_idempotent_commands_rerun_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("static");
        let env = ResolvedEnvironment::from_pairs([
            ("PATH", "/usr/bin:/bin"),
            ("TARGET", marker.to_str().unwrap()),
        ]);
        let publish = sh("mkdir -p \"$TARGET\" && printf asset > \"$TARGET/app.css\"");

        collect_static(&ProcessRunner, &publish, &env).await.unwrap();
        collect_static(&ProcessRunner, &publish, &env).await.unwrap();

        let entries = std::fs::read_dir(&marker).unwrap().count();
        assert_eq!(entries, 1);
        assert_eq!(std::fs::read_to_string(marker.join("app.css")).unwrap(), "asset");
    }
}
