//! Entrypoint configuration
//!
//! Layered as: built-in defaults, then an optional `entrypoint.toml`, then
//! environment overrides taken from the resolved environment (so values
//! from the `.env` override file apply too).

use crate::startup::environment::ResolvedEnvironment;
use crate::startup::prober::RetryBudget;
use crate::startup::steps::CommandSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Looked up in the working directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "entrypoint.toml";

pub const PORT_VAR: &str = "PORT";
pub const WORKERS_VAR: &str = "WEB_CONCURRENCY";
pub const WAIT_ATTEMPTS_VAR: &str = "DB_WAIT_ATTEMPTS";
pub const WAIT_INTERVAL_VAR: &str = "DB_WAIT_INTERVAL";
pub const WAIT_STRATEGY_VAR: &str = "DB_WAIT_STRATEGY";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntrypointConfig {
    pub server: ServerConfig,
    pub probe: ProbeConfig,
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Worker count for the production server
    pub workers: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            workers: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub attempts: u32,
    pub interval_secs: f64,
    pub connect_timeout_secs: f64,
    pub strategy: ProbeStrategy,
    /// Program used by the `utility` strategy
    pub utility: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval_secs: 2.0,
            connect_timeout_secs: 5.0,
            strategy: ProbeStrategy::Native,
            utility: "pg_isready".to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_timeout_secs).unwrap_or(Duration::from_secs(5))
    }
}

/// How the readiness probe talks to postgres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStrategy {
    /// Open and close a connection with the native driver
    #[default]
    Native,
    /// Shell out to a readiness utility such as `pg_isready`
    Utility,
}

impl FromStr for ProbeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "utility" => Ok(Self::Utility),
            other => anyhow::bail!("unknown probe strategy: {other} (expected native or utility)"),
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Utility => f.write_str("utility"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub migrate: CommandSpec,
    pub collect_static: CommandSpec,
    pub dev_server: CommandSpec,
    pub prod_server: CommandSpec,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            migrate: CommandSpec::new("python", ["manage.py", "migrate", "--noinput"]),
            collect_static: CommandSpec::new("python", ["manage.py", "collectstatic", "--noinput"]),
            dev_server: CommandSpec::new("python", ["manage.py", "runserver", "${BIND}:${PORT}"]),
            prod_server: CommandSpec::new(
                "gunicorn",
                [
                    "settings.asgi:application",
                    "-k",
                    "uvicorn.workers.UvicornWorker",
                    "--bind",
                    "${BIND}:${PORT}",
                    "--workers",
                    "${WORKERS}",
                ],
            ),
        }
    }
}

impl EntrypointConfig {
    /// Load from an explicit path (must exist) or from `entrypoint.toml` if present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let implicit = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !implicit.is_file() {
                    debug!("no {DEFAULT_CONFIG_FILE} found, using built-in defaults");
                    return Ok(Self::default());
                }
                implicit
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "loaded entrypoint config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.server.workers > 0, "server.workers must be at least 1");
        anyhow::ensure!(config.probe.attempts > 0, "probe.attempts must be at least 1");
        anyhow::ensure!(
            is_valid_duration(config.probe.interval_secs),
            "probe.interval_secs must be a non-negative number of seconds that fits a duration"
        );
        anyhow::ensure!(
            is_valid_duration(config.probe.connect_timeout_secs),
            "probe.connect_timeout_secs must be a non-negative number of seconds that fits a duration"
        );
        Ok(config)
    }

    /// Apply environment overrides; unparsable values are logged and ignored
    pub fn apply_env_overrides(&mut self, env: &ResolvedEnvironment) {
        if let Some(port) = parse_var::<u16>(env, PORT_VAR) {
            self.server.port = port;
        }
        if let Some(workers) = parse_var::<u16>(env, WORKERS_VAR) {
            if workers == 0 {
                warn!(var = WORKERS_VAR, "ignoring zero worker count");
            } else {
                self.server.workers = workers;
            }
        }
        if let Some(attempts) = parse_var::<u32>(env, WAIT_ATTEMPTS_VAR) {
            if attempts == 0 {
                warn!(var = WAIT_ATTEMPTS_VAR, "ignoring zero retry budget");
            } else {
                self.probe.attempts = attempts;
            }
        }
        if let Some(interval) = parse_var::<f64>(env, WAIT_INTERVAL_VAR) {
            if is_valid_duration(interval) {
                self.probe.interval_secs = interval;
            } else {
                warn!(var = WAIT_INTERVAL_VAR, interval, "ignoring invalid probe interval");
            }
        }
        if let Some(strategy) = parse_var::<ProbeStrategy>(env, WAIT_STRATEGY_VAR) {
            self.probe.strategy = strategy;
        }
    }

    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.probe.attempts, self.probe.interval())
    }
}

/// Non-negative, finite, and representable as a `Duration`
fn is_valid_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok()
}

fn parse_var<T>(env: &ResolvedEnvironment, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = env.get_non_empty(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(var = name, value = raw, error = %err, "ignoring invalid value");
            None
        }
    }
}
