//! # Configuration
//!
//! Flat, environment-driven configuration for the robot scheduler and its
//! database pool. Everything has a sane default so `RobotConfig::default()`
//! is a runnable development configuration; `from_env` overrides from
//! `LOTFLOW_*` variables and `DATABASE_URL`.

use std::time::Duration;

use crate::error::{Result, RobotError};

/// Scheduler concurrency models.
///
/// - `Iteration`: the ready-set is processed directly each tick, serially
///   when `max_concurrency == 0`, otherwise fanned out across a fixed number
///   of unpartitioned batches.
/// - `Tiling`: dynamic managers claim order partitions under a bounded
///   concurrency budget, with store-enforced leases.
/// - `MultiTiling`: tiling with orders split into `group_count` groups, each
///   group holding an independent share of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunModel {
    Iteration,
    Tiling,
    MultiTiling,
}

impl RunModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunModel::Iteration => "Iteration",
            RunModel::Tiling => "Tiling",
            RunModel::MultiTiling => "MultiTiling",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Iteration" => Ok(RunModel::Iteration),
            "Tiling" => Ok(RunModel::Tiling),
            "MultiTiling" => Ok(RunModel::MultiTiling),
            other => Err(RobotError::Configuration(format!(
                "unknown run model: {other}"
            ))),
        }
    }
}

/// Top-level scheduler configuration.
#[derive(Debug, Clone)]
pub struct RobotConfig {
    /// Polling cadence of the tick loop.
    pub tick_interval: Duration,
    /// Deadline for a single tick; every store call within a tick runs under
    /// this budget.
    pub max_collect_time: Duration,
    /// Concurrency budget. Zero selects serial processing in Iteration mode
    /// and is rejected for the tiling models.
    pub max_concurrency: usize,
    /// Concurrency model used by `Scheduler::do_tick`.
    pub model: RunModel,
    /// Number of order groups in MultiTiling mode.
    pub group_count: usize,
    /// Lots with a semaphore newer than this window count as ready even if
    /// their wait has not elapsed.
    pub event_lookback: Duration,
    /// Leases older than this are reaped at the start of a tiling tick.
    /// Defaults to `max_collect_time`.
    pub lease_ttl: Duration,
    /// Sleep between manager-pool evaluations within one tick.
    pub manager_poll_interval: Duration,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let max_collect_time = Duration::from_secs(10);
        Self {
            tick_interval: Duration::from_secs(1),
            max_collect_time,
            max_concurrency: 4,
            model: RunModel::Tiling,
            group_count: 1,
            event_lookback: Duration::from_secs(24 * 60 * 60),
            lease_ttl: max_collect_time,
            manager_poll_interval: Duration::from_millis(100),
        }
    }
}

impl RobotConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LOTFLOW_TICK_INTERVAL_MS") {
            config.tick_interval = Duration::from_millis(parse_var("LOTFLOW_TICK_INTERVAL_MS", &v)?);
        }
        if let Ok(v) = std::env::var("LOTFLOW_MAX_COLLECT_TIME_SECS") {
            config.max_collect_time =
                Duration::from_secs(parse_var("LOTFLOW_MAX_COLLECT_TIME_SECS", &v)?);
            config.lease_ttl = config.max_collect_time;
        }
        if let Ok(v) = std::env::var("LOTFLOW_MAX_CONCURRENCY") {
            config.max_concurrency = parse_var("LOTFLOW_MAX_CONCURRENCY", &v)?;
        }
        if let Ok(v) = std::env::var("LOTFLOW_MODEL") {
            config.model = RunModel::parse(&v)?;
        }
        if let Ok(v) = std::env::var("LOTFLOW_GROUP_COUNT") {
            config.group_count = parse_var("LOTFLOW_GROUP_COUNT", &v)?;
        }
        if let Ok(v) = std::env::var("LOTFLOW_EVENT_LOOKBACK_SECS") {
            config.event_lookback =
                Duration::from_secs(parse_var("LOTFLOW_EVENT_LOOKBACK_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("LOTFLOW_LEASE_TTL_SECS") {
            config.lease_ttl = Duration::from_secs(parse_var("LOTFLOW_LEASE_TTL_SECS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(RobotError::Configuration(
                "tick_interval must be non-zero".into(),
            ));
        }
        if self.max_collect_time.is_zero() {
            return Err(RobotError::Configuration(
                "max_collect_time must be non-zero".into(),
            ));
        }
        if self.group_count == 0 {
            return Err(RobotError::Configuration(
                "group_count must be at least 1".into(),
            ));
        }
        if self.max_concurrency == 0 && self.model != RunModel::Iteration {
            return Err(RobotError::Configuration(format!(
                "{} model requires max_concurrency > 0",
                self.model.as_str()
            )));
        }
        Ok(())
    }

    /// Configuration tuned for fast test cycles.
    pub fn for_testing() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            max_collect_time: Duration::from_millis(500),
            max_concurrency: 2,
            model: RunModel::Tiling,
            group_count: 1,
            event_lookback: Duration::from_secs(24 * 60 * 60),
            lease_ttl: Duration::from_millis(500),
            manager_poll_interval: Duration::from_millis(5),
        }
    }
}

/// Database connection settings, mirroring the deployment environment keys.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "lotflow".to_string(),
            max_connections: 10,
            min_connections: 4,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LOTFLOW_DB_USER") {
            config.user = v;
        }
        if let Ok(v) = std::env::var("LOTFLOW_DB_PASSWORD") {
            config.password = v;
        }
        if let Ok(v) = std::env::var("LOTFLOW_DB_HOST") {
            config.host = v;
        }
        if let Ok(v) = std::env::var("LOTFLOW_DB_PORT") {
            config.port = parse_var("LOTFLOW_DB_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("LOTFLOW_DB_NAME") {
            config.name = v;
        }

        Ok(config)
    }

    /// Connection URL; `DATABASE_URL` wins when set.
    pub fn url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RobotError::Configuration(format!("invalid {key}: {e}")))
}
