//! Datastore readiness probe
//!
//! Bounded retry with a fixed sleep between attempts. The wait ceiling is
//! `attempts × interval` (plus per-attempt connect time), so an unreachable
//! database fails the container deterministically instead of hanging it.

use crate::config::{ProbeConfig, ProbeStrategy};
use crate::error::{DependencyUnavailableSnafu, StartupError};
use crate::startup::environment::DatastoreConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::process::Stdio;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// One connect-and-disconnect cycle against the datastore
#[async_trait]
pub trait ConnectionCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, datastore: &DatastoreConfig) -> Result<()>;
}

/// Opens a real postgres connection with sqlx and closes it again
#[derive(Debug, Clone)]
pub struct NativeDriverCheck {
    connect_timeout: Duration,
}

impl NativeDriverCheck {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(datastore: &DatastoreConfig) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&datastore.host)
            .port(datastore.port);
        if let Some(user) = &datastore.user {
            options = options.username(user);
        }
        if let Some(password) = &datastore.password {
            options = options.password(password);
        }
        if let Some(database) = &datastore.database {
            options = options.database(database);
        }
        options
    }
}

#[async_trait]
impl ConnectionCheck for NativeDriverCheck {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn check(&self, datastore: &DatastoreConfig) -> Result<()> {
        let options = Self::options(datastore);
        let connection = timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .with_context(|| format!("connect timed out after {:?}", self.connect_timeout))?
            .context("connect failed")?;
        connection.close().await.context("disconnect failed")?;
        Ok(())
    }
}

/// Shells out to a readiness utility (`pg_isready` by default); exit 0 means ready
#[derive(Debug, Clone)]
pub struct ExternalUtilityCheck {
    program: String,
    connect_timeout: Duration,
}

impl ExternalUtilityCheck {
    pub fn new(program: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            connect_timeout,
        }
    }

    fn args(&self, datastore: &DatastoreConfig) -> Vec<String> {
        // pg_isready takes whole seconds and treats 0 as "wait forever"
        let timeout_secs = self.connect_timeout.as_secs_f64().ceil().max(1.0);
        let mut args = vec![
            "-h".to_string(),
            datastore.host.clone(),
            "-p".to_string(),
            datastore.port.to_string(),
            "-t".to_string(),
            format!("{timeout_secs:.0}"),
        ];
        if let Some(user) = &datastore.user {
            args.extend(["-U".to_string(), user.clone()]);
        }
        if let Some(database) = &datastore.database {
            args.extend(["-d".to_string(), database.clone()]);
        }
        args
    }
}

#[async_trait]
impl ConnectionCheck for ExternalUtilityCheck {
    fn name(&self) -> &'static str {
        "utility"
    }

    async fn check(&self, datastore: &DatastoreConfig) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(self.args(datastore))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // a little slack over the utility's own timeout
        let status = timeout(self.connect_timeout + Duration::from_secs(1), command.status())
            .await
            .with_context(|| format!("{} did not finish in time", self.program))?
            .with_context(|| format!("could not run {}", self.program))?;

        anyhow::ensure!(status.success(), "{} reported {status}", self.program);
        Ok(())
    }
}

/// Attempts remaining and the fixed pause after each failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    interval: Duration,
}

impl RetryBudget {
    /// A budget always allows at least one attempt
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            remaining: attempts.max(1),
            interval,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record one failed attempt; `false` once the budget is exhausted
    fn consume(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining > 0
    }
}

pub struct ReadinessProber {
    check: Box<dyn ConnectionCheck>,
    budget: RetryBudget,
}

impl ReadinessProber {
    pub fn new(check: Box<dyn ConnectionCheck>, budget: RetryBudget) -> Self {
        Self { check, budget }
    }

    /// Build the prober for the configured strategy
    pub fn from_config(config: &ProbeConfig, budget: RetryBudget) -> Self {
        let check: Box<dyn ConnectionCheck> = match config.strategy {
            ProbeStrategy::Native => Box::new(NativeDriverCheck::new(config.connect_timeout())),
            ProbeStrategy::Utility => Box::new(ExternalUtilityCheck::new(
                config.utility.clone(),
                config.connect_timeout(),
            )),
        };
        Self::new(check, budget)
    }

    /// Block until the datastore accepts a connection or the budget runs out.
    /// Returns the number of attempts it took.
    pub async fn wait_for(&self, datastore: &DatastoreConfig) -> Result<u32, StartupError> {
        let mut budget = self.budget;
        let mut attempt = 0;

        info!(
            datastore = %datastore.target(),
            strategy = self.check.name(),
            attempts = budget.remaining(),
            interval = ?budget.interval(),
            "waiting for datastore"
        );

        loop {
            attempt += 1;
            match self.check.check(datastore).await {
                Ok(()) => {
                    info!(attempt, "datastore is reachable");
                    return Ok(attempt);
                }
                Err(err) => {
                    let more = budget.consume();
                    let reason = format!("{err:#}");
                    warn!(
                        attempt,
                        remaining = budget.remaining(),
                        error = %reason,
                        "datastore not ready"
                    );
                    sleep(budget.interval()).await;
                    if !more {
                        return DependencyUnavailableSnafu {
                            target: datastore.target(),
                            attempts: attempt,
                        }
                        .fail();
                    }
                    debug!(attempt = attempt + 1, "retrying datastore connection");
                }
            }
        }
    }
}
