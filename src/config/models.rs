// src/config/models.rs
use crate::backend::EnvType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Hosts treated as the local machine.
pub const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub environments: Vec<LoadConfig>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, env) in self.environments.iter().enumerate() {
            env.validate()
                .map_err(|e| anyhow::anyhow!("environments[{}] ({}): {}", i, env.image, e))?;
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            anyhow::bail!("metrics.path must start with '/'");
        }
        self.health_check.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures (calls or probes) before an instance stops being selected.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// Consecutive probe failures before an instance is evicted. `0` disables eviction.
    #[serde(default = "default_evict_after")]
    pub evict_after: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.interval_secs == 0 {
            anyhow::bail!("health_check.interval_secs must be > 0");
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            anyhow::bail!("health_check thresholds must be >= 1");
        }
        if self.evict_after != 0 && self.evict_after < self.unhealthy_threshold {
            anyhow::bail!("health_check.evict_after must be >= unhealthy_threshold");
        }
        Ok(())
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            evict_after: default_evict_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl ExecutorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Provision containers on this machine.
    #[default]
    Local,
    /// Bind to an environment that already runs elsewhere.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Random,
    RoundRobin,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Random => "random",
            Strategy::RoundRobin => "round_robin",
        }
    }
}

/// One load request: what to deploy and how to present it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Image for local mode, environment id for remote mode.
    pub image: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    #[serde(default)]
    pub load_balance: Strategy,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub env_type: Option<EnvType>,
    #[serde(default)]
    pub force_recreate: bool,
    #[serde(default)]
    pub pull: bool,
    /// Base URL of the service hosting remote environments.
    #[serde(default)]
    pub remote_url: Option<Url>,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

impl LoadConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            mode: Mode::default(),
            replicas: default_replicas(),
            hosts: None,
            load_balance: Strategy::default(),
            base_port: default_base_port(),
            container_name: None,
            env_vars: BTreeMap::new(),
            env_type: None,
            force_recreate: false,
            pull: false,
            remote_url: None,
            startup_timeout_secs: None,
        }
    }

    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    pub fn load_balance(mut self, strategy: Strategy) -> Self {
        self.load_balance = strategy;
        self
    }

    pub fn base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn env_type(mut self, env_type: EnvType) -> Self {
        self.env_type = Some(env_type);
        self
    }

    pub fn force_recreate(mut self, force: bool) -> Self {
        self.force_recreate = force;
        self
    }

    pub fn remote(mut self, remote_url: Url) -> Self {
        self.mode = Mode::Remote;
        self.remote_url = Some(remote_url);
        self
    }

    /// The supplied host list; an empty list counts as none.
    pub fn explicit_hosts(&self) -> Option<&[String]> {
        self.hosts.as_deref().filter(|h| !h.is_empty())
    }

    pub fn startup_timeout(&self, env_type: EnvType) -> Duration {
        self.startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| env_type.default_startup_timeout())
    }

    /// Rejects bad caller input before anything is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::Validation("image must not be empty".into()));
        }
        if self.replicas < 1 {
            return Err(Error::Validation("replicas must be >= 1".into()));
        }
        if let Some(hosts) = self.explicit_hosts() {
            if hosts.len() < self.replicas {
                return Err(Error::Validation(format!(
                    "Not enough hosts ({}) for replicas ({}). Either provide enough hosts or omit hosts for local deployment",
                    hosts.len(),
                    self.replicas
                )));
            }
        }
        if self.mode == Mode::Remote {
            if self.replicas > 1 {
                return Err(Error::Validation("Mode 'remote' not supported for multi-instance".into()));
            }
            if self.remote_url.is_none() {
                return Err(Error::Validation("remote mode requires remote_url".into()));
            }
        }
        Ok(())
    }
}

pub fn is_local_host(host: &str) -> bool {
    LOCAL_HOSTS.contains(&host)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_health_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    5
}

fn default_healthy_threshold() -> u32 {
    1
}

fn default_unhealthy_threshold() -> u32 {
    1
}

fn default_evict_after() -> u32 {
    0
}

fn default_request_timeout() -> u64 {
    600
}

fn default_pool_max_idle() -> usize {
    20
}

fn default_replicas() -> usize {
    1
}

fn default_base_port() -> u16 {
    8000
}
