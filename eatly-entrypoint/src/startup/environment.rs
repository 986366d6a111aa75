//! Environment resolution: deployment mode and datastore parameters
//!
//! The resolver takes a snapshot of the process environment, layers the
//! optional override file on top, and reads everything else from that
//! snapshot. The snapshot is what every child process and the final server
//! receive, so the orchestrator never has to mutate its own environment.

use crate::startup::override_file::OverrideFile;
use serde::Serialize;
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const MODE_VAR: &str = "ENV_ID";
pub const HOST_VAR: &str = "POSTGRES_HOST";
pub const PORT_VAR: &str = "POSTGRES_PORT";
pub const DATABASE_VAR: &str = "POSTGRES_DB";
pub const USER_VAR: &str = "POSTGRES_USER";
pub const PASSWORD_VAR: &str = "POSTGRES_PASSWORD";
pub const SETTINGS_MODULE_VAR: &str = "DJANGO_SETTINGS_MODULE";

pub const DEFAULT_HOST: &str = "db";
pub const DEFAULT_PORT: u16 = 5432;

/// Deployment environment, resolved once per startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Local,
    Dev,
    Prod,
    Production,
}

impl DeploymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Prod => "prod",
            Self::Production => "production",
        }
    }

    /// Production-like modes wait for the datastore and run the worker pool
    pub fn is_production_like(self) -> bool {
        matches!(self, Self::Prod | Self::Production)
    }

    /// Settings module the service loads for this mode
    pub fn settings_module(self) -> String {
        format!("settings.env.{}", self.as_str())
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ModeError {
    #[snafu(display(
        "unknown deployment mode {value:?} (expected local, dev, prod or production)"
    ))]
    UnknownMode { value: String },
}

impl FromStr for DeploymentMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            "production" => Ok(Self::Production),
            _ => UnknownModeSnafu { value: s }.fail(),
        }
    }
}

/// Connection parameters for the readiness probe
#[derive(Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DatastoreConfig {
    /// `host:port`, used in logs and diagnostics
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: None,
            user: None,
            password: None,
        }
    }
}

// hand-written so the password never reaches a log line
impl fmt::Debug for DatastoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Snapshot of the process environment with override bindings applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    vars: BTreeMap<String, String>,
}

impl ResolvedEnvironment {
    /// Snapshot the current process environment; non-UTF-8 entries are dropped
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like `get`, treating an empty or blank value as unset
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Set `key` only when absent; returns whether it was set
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.vars.contains_key(key) {
            return false;
        }
        self.vars.insert(key.to_string(), value.into());
        true
    }

    /// Apply override bindings in file order, replacing inherited values
    pub fn apply(&mut self, file: &OverrideFile) {
        for (key, value) in &file.bindings {
            self.set(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Outcome of environment resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub mode: DeploymentMode,
    pub datastore: DatastoreConfig,
    pub env: ResolvedEnvironment,
    /// Override file that was applied, if one existed
    pub override_file: Option<PathBuf>,
    /// Keys bound by the override file
    pub overridden: Vec<String>,
    pub skipped_lines: usize,
}

/// Resolve mode and datastore parameters. Never fails: every anomaly falls
/// back to a safe default with a warning.
pub fn resolve(mut env: ResolvedEnvironment, override_path: &Path) -> Resolution {
    let mut applied_file = None;
    let mut overridden = Vec::new();
    let mut skipped_lines = 0;

    match OverrideFile::load(override_path) {
        Ok(Some(file)) => {
            for skipped in &file.skipped {
                warn!(
                    path = %override_path.display(),
                    line = skipped.line,
                    "skipping malformed override line"
                );
            }
            env.apply(&file);
            info!(
                path = %override_path.display(),
                bindings = file.bindings.len(),
                "applied override file"
            );
            let mut seen = BTreeSet::new();
            overridden = file
                .keys()
                .filter(|key| seen.insert(*key))
                .map(str::to_string)
                .collect();
            skipped_lines = file.skipped.len();
            applied_file = Some(override_path.to_path_buf());
        }
        Ok(None) => debug!(path = %override_path.display(), "no override file"),
        Err(err) => warn!(error = ?err, "ignoring unreadable override file"),
    }

    let mode = resolve_mode(&env);
    let datastore = resolve_datastore(&env);

    // the service validates ENV_ID itself, so it must see the resolved name
    env.set(MODE_VAR, mode.as_str());

    if env.set_default(SETTINGS_MODULE_VAR, mode.settings_module()) {
        debug!(settings = %mode.settings_module(), "defaulted {SETTINGS_MODULE_VAR}");
    }

    if mode.is_production_like() {
        if datastore.user.is_none() {
            warn!(var = USER_VAR, %mode, "datastore user not set");
        }
        if datastore.database.is_none() {
            warn!(var = DATABASE_VAR, %mode, "datastore name not set");
        }
    }

    Resolution {
        mode,
        datastore,
        env,
        override_file: applied_file,
        overridden,
        skipped_lines,
    }
}

fn resolve_mode(env: &ResolvedEnvironment) -> DeploymentMode {
    let Some(raw) = env.get_non_empty(MODE_VAR) else {
        return DeploymentMode::default();
    };

    raw.parse().unwrap_or_else(|err: ModeError| {
        warn!(error = %err, "falling back to {}", DeploymentMode::default());
        DeploymentMode::default()
    })
}

fn resolve_datastore(env: &ResolvedEnvironment) -> DatastoreConfig {
    let host = env
        .get_non_empty(HOST_VAR)
        .map_or_else(|| DEFAULT_HOST.to_string(), |host| host.trim().to_string());

    let port = match env.get_non_empty(PORT_VAR) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = PORT_VAR, value = raw, "invalid port, using {DEFAULT_PORT}");
            DEFAULT_PORT
        }),
        None => DEFAULT_PORT,
    };

    let owned = |key: &str| env.get_non_empty(key).map(str::to_string);

    DatastoreConfig {
        host,
        port,
        database: owned(DATABASE_VAR),
        user: owned(USER_VAR),
        password: owned(PASSWORD_VAR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> ResolvedEnvironment {
        ResolvedEnvironment::from_pairs(pairs.iter().copied())
    }

    fn no_file() -> PathBuf {
        PathBuf::from("/nonexistent/eatly/.env")
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("local".parse::<DeploymentMode>(), Ok(DeploymentMode::Local));
        assert_eq!("dev".parse::<DeploymentMode>(), Ok(DeploymentMode::Dev));
        assert_eq!(" PROD ".parse::<DeploymentMode>(), Ok(DeploymentMode::Prod));
        assert_eq!(
            "production".parse::<DeploymentMode>(),
            Ok(DeploymentMode::Production)
        );
        assert!("staging".parse::<DeploymentMode>().is_err());
    }

    #[test]
    fn test_production_like_modes() {
        assert!(!DeploymentMode::Local.is_production_like());
        assert!(!DeploymentMode::Dev.is_production_like());
        assert!(DeploymentMode::Prod.is_production_like());
        assert!(DeploymentMode::Production.is_production_like());
    }

    #[test]
    fn test_defaults_when_unset() {
        let resolution = resolve(ResolvedEnvironment::default(), &no_file());

        assert_eq!(resolution.mode, DeploymentMode::Local);
        assert_eq!(resolution.datastore.host, "db");
        assert_eq!(resolution.datastore.port, 5432);
        assert_eq!(resolution.datastore.user, None);
        assert!(resolution.override_file.is_none());
        assert_eq!(
            resolution.env.get(SETTINGS_MODULE_VAR),
            Some("settings.env.local")
        );
    }

    #[test]
    fn test_unknown_mode_falls_back_to_local() {
        let resolution = resolve(env(&[("ENV_ID", "staging")]), &no_file());
        assert_eq!(resolution.mode, DeploymentMode::Local);
        assert!(!resolution.mode.is_production_like());
        assert_eq!(resolution.env.get(MODE_VAR), Some("local"));
        assert_eq!(
            resolution.env.get(SETTINGS_MODULE_VAR),
            Some("settings.env.local")
        );
    }

    #[test]
    fn test_mode_written_back_normalized() {
        let resolution = resolve(env(&[("ENV_ID", " PROD ")]), &no_file());
        assert_eq!(resolution.mode, DeploymentMode::Prod);
        assert_eq!(resolution.env.get(MODE_VAR), Some("prod"));

        let resolution = resolve(ResolvedEnvironment::default(), &no_file());
        assert_eq!(resolution.env.get(MODE_VAR), Some("local"));
    }

    #[test]
    fn test_unknown_mode_error_message() {
        let err = "staging".parse::<DeploymentMode>().unwrap_err();
        assert_eq!(
            err,
            ModeError::UnknownMode {
                value: "staging".to_string()
            }
        );
        assert!(err.to_string().contains("\"staging\""));
    }

    #[test]
    fn test_datastore_from_env() {
        let resolution = resolve(
            env(&[
                ("ENV_ID", "prod"),
                ("POSTGRES_HOST", "pg.internal"),
                ("POSTGRES_PORT", "6432"),
                ("POSTGRES_DB", "eatly"),
                ("POSTGRES_USER", "eatly"),
                ("POSTGRES_PASSWORD", "s3cret"),
            ]),
            &no_file(),
        );

        assert_eq!(resolution.mode, DeploymentMode::Prod);
        assert_eq!(resolution.datastore.target(), "pg.internal:6432");
        assert_eq!(resolution.datastore.database.as_deref(), Some("eatly"));
        assert_eq!(resolution.datastore.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let resolution = resolve(env(&[("POSTGRES_PORT", "not-a-port")]), &no_file());
        assert_eq!(resolution.datastore.port, DEFAULT_PORT);
    }

    #[test]
    fn test_debug_redacts_password() {
        let datastore = DatastoreConfig {
            password: Some("s3cret".to_string()),
            ..DatastoreConfig::default()
        };
        let debug = format!("{datastore:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_existing_settings_module_kept() {
        let resolution = resolve(
            env(&[("ENV_ID", "prod"), ("DJANGO_SETTINGS_MODULE", "custom.settings")]),
            &no_file(),
        );
        assert_eq!(resolution.env.get(SETTINGS_MODULE_VAR), Some("custom.settings"));
    }

    #[test]
    fn test_overridden_keys_reported_once_in_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1\nB=2\nA=3\nC=4\nB=5\n").unwrap();

        let resolution = resolve(ResolvedEnvironment::default(), &path);

        assert_eq!(resolution.overridden, vec!["A", "B", "C"]);
        assert_eq!(resolution.env.get("A"), Some("3"));
        assert_eq!(resolution.env.get("B"), Some("5"));
    }

    #[test]
    fn test_literal_override_values_reach_datastore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "ENV_ID=prod\nPOSTGRES_PASSWORD=pa$word\\x\nBAD=\"unclosed\nPOSTGRES_HOST=pg\n",
        )
        .unwrap();

        let resolution = resolve(ResolvedEnvironment::default(), &path);

        assert_eq!(resolution.mode, DeploymentMode::Prod);
        assert_eq!(resolution.datastore.password.as_deref(), Some("pa$word\\x"));
        assert_eq!(resolution.datastore.host, "pg");
        assert_eq!(resolution.skipped_lines, 0);
    }

    #[test]
    fn test_override_file_applied_before_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# overrides\nENV_ID=production\nPOSTGRES_HOST=postgres\nBROKEN LINE\nEXTRA=1\n",
        )
        .unwrap();

        let resolution = resolve(env(&[("ENV_ID", "local"), ("KEEP", "yes")]), &path);

        assert_eq!(resolution.mode, DeploymentMode::Production);
        assert_eq!(resolution.datastore.host, "postgres");
        assert_eq!(resolution.env.get("EXTRA"), Some("1"));
        assert_eq!(resolution.env.get("KEEP"), Some("yes"));
        assert_eq!(resolution.override_file.as_deref(), Some(path.as_path()));
        assert_eq!(resolution.skipped_lines, 1);
        assert_eq!(
            resolution.overridden,
            vec!["ENV_ID", "POSTGRES_HOST", "EXTRA"]
        );
    }
}
