//! Config fields definitions for the scheduler and the load balancer

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::core::scheduler::generic_scheduler::DEFAULT_PARALLELISM;
use crate::core::scheduler::kube_scheduler::KubeSchedulerConfig;
use crate::metrics::printer::MetricsPrinterConfig;
use crate::proxy::roundrobin::DEFAULT_AFFINITY_TTL_MINUTES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown plugin {0:?}")]
    UnknownPlugin(String),
    #[error("plugin {name:?} is not a {expected} plugin")]
    WrongPluginKind { name: String, expected: &'static str },
    #[error("plugin {name:?} has weight {weight} outside 1..={max}")]
    InvalidWeight { name: String, weight: i64, max: i64 },
    #[error("duplicate scheduler profile {0:?}")]
    DuplicateProfile(String),
    #[error("at least one scheduler profile is required")]
    NoProfiles,
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seed of every random choice (tie-breaks, endpoint shuffles). Fresh entropy if not set.
    pub seed: Option<u64>,
    /// Upper bound of worker threads evaluating nodes during one scheduling attempt.
    #[serde(default = "parallelism_default")]
    pub parallelism: usize,
    /// Evaluate all predicates of a node even after one of them failed, collecting every
    /// failure reason.
    #[serde(default)]
    pub always_check_all_predicates: bool,
    /// Interval between scheduling cycles when replaying traces, in seconds.
    #[serde(default = "scheduling_cycle_interval_default")]
    pub scheduling_cycle_interval: f64,
    #[serde(default)]
    pub kube_scheduler: KubeSchedulerConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    pub metrics_printer: Option<MetricsPrinterConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoadBalancerConfig {
    /// TTL of services registered with a zero TTL.
    #[serde(default = "default_affinity_ttl_minutes_default")]
    pub default_affinity_ttl_minutes: u64,
    /// Period of stale sticky session cleanup when replaying traces, in seconds. Disabled if
    /// not set.
    pub sticky_session_cleanup_interval: Option<f64>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            default_affinity_ttl_minutes: default_affinity_ttl_minutes_default(),
            sticky_session_cleanup_interval: None,
        }
    }
}

fn parallelism_default() -> usize {
    DEFAULT_PARALLELISM
}

fn scheduling_cycle_interval_default() -> f64 {
    1.0
}

fn default_affinity_ttl_minutes_default() -> u64 {
    DEFAULT_AFFINITY_TTL_MINUTES
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            seed: None,
            parallelism: parallelism_default(),
            always_check_all_predicates: false,
            scheduling_cycle_interval: scheduling_cycle_interval_default(),
            kube_scheduler: Default::default(),
            load_balancer: Default::default(),
            metrics_printer: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::NonPositive {
                field: "parallelism",
            });
        }
        if self.scheduling_cycle_interval <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "scheduling_cycle_interval",
            });
        }
        if matches!(self.load_balancer.sticky_session_cleanup_interval, Some(interval) if interval <= 0.0)
        {
            return Err(ConfigError::NonPositive {
                field: "sticky_session_cleanup_interval",
            });
        }
        if self.kube_scheduler.profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        Ok(())
    }
}
