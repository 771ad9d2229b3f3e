//! Implementation of kube-scheduler component which dispatches pods to scheduling profiles.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::config::{ConfigError, SchedulerConfig};
use crate::core::pod::Pod;
use crate::core::scheduler::generic_scheduler::GenericScheduler;
use crate::core::scheduler::interface::{
    NodeInfoSource, NodeLister, PodSchedulingAlgorithm, ScheduleError, DEFAULT_SCHEDULER_NAME,
};
use crate::core::scheduler::plugin::{
    get_predicate, get_priority, DEFAULT_PREDICATES, DEFAULT_PRIORITIES,
};

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KubeSchedulerConfig {
    // Profiles are scheduling profiles that kube-scheduler supports. Pods can
    // choose to be scheduled under a particular profile by setting its associated
    // scheduler name in spec. Pods that don't specify any scheduler name are scheduled
    // with the "default_scheduler" profile, if present here.
    pub profiles: Vec<KubeSchedulerProfile>,
}

impl Default for KubeSchedulerConfig {
    fn default() -> Self {
        default_kube_scheduler_config()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KubeSchedulerProfile {
    pub scheduler_name: String,
    pub plugins: Plugins,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Plugins {
    // Each extension point is a list of enabled plugins which are registered globally in plugin registry.
    // Filter plugins are evaluated in the listed order.
    #[serde(default)]
    pub filter: Vec<Plugin>,
    #[serde(default)]
    pub score: Vec<Plugin>,
}

// Plugin specifies a plugin name and its weight when applicable.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Plugin {
    pub name: String,
    // Weight is used only for Score plugins, 1 if not set.
    pub weight: Option<i64>,
}

impl Plugin {
    pub fn new(name: &str, weight: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

pub fn default_kube_scheduler_config() -> KubeSchedulerConfig {
    KubeSchedulerConfig {
        profiles: vec![KubeSchedulerProfile {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            plugins: Plugins {
                filter: DEFAULT_PREDICATES
                    .iter()
                    .map(|name| Plugin::new(name, None))
                    .collect(),
                score: DEFAULT_PRIORITIES
                    .iter()
                    .map(|(name, weight)| Plugin::new(name, Some(*weight)))
                    .collect(),
            },
        }],
    }
}

pub struct KubeScheduler {
    // Map from scheduler name to the algorithm serving its profile.
    profiles: HashMap<String, GenericScheduler>,
}

impl KubeScheduler {
    pub fn new(profiles: HashMap<String, GenericScheduler>) -> Self {
        Self { profiles }
    }

    /// Builds one `GenericScheduler` per configured profile, all reading the same cache.
    pub fn from_config(
        config: &SchedulerConfig,
        cache: Arc<dyn NodeInfoSource>,
    ) -> Result<Self, ConfigError> {
        if config.kube_scheduler.profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        let mut profiles = HashMap::new();
        for (idx, profile) in config.kube_scheduler.profiles.iter().enumerate() {
            if profiles.contains_key(&profile.scheduler_name) {
                return Err(ConfigError::DuplicateProfile(profile.scheduler_name.clone()));
            }
            let predicates = profile
                .plugins
                .filter
                .iter()
                .map(|plugin| get_predicate(&plugin.name))
                .collect::<Result<Vec<_>, _>>()?;
            let priorities = profile
                .plugins
                .score
                .iter()
                .map(|plugin| get_priority(&plugin.name, plugin.weight.unwrap_or(1)))
                .collect::<Result<Vec<_>, _>>()?;
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(idx as u64)),
                None => StdRng::from_entropy(),
            };
            info!(
                "Scheduler profile {:?}: {} filter plugins, {} score plugins",
                profile.scheduler_name,
                predicates.len(),
                priorities.len()
            );
            let algorithm = GenericScheduler::new(cache.clone(), predicates, priorities, rng)
                .with_parallelism(config.parallelism)
                .with_always_check_all_predicates(config.always_check_all_predicates);
            profiles.insert(profile.scheduler_name.clone(), algorithm);
        }
        Ok(Self::new(profiles))
    }

    pub fn profile(&self, scheduler_name: &str) -> Option<&GenericScheduler> {
        self.profiles.get(scheduler_name)
    }

    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(|name| name.as_str()).collect();
        names.sort();
        names
    }
}

impl PodSchedulingAlgorithm for KubeScheduler {
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String, ScheduleError> {
        let scheduler_name = pod
            .spec
            .scheduler_name
            .as_deref()
            .unwrap_or(DEFAULT_SCHEDULER_NAME);
        let profile = self
            .profiles
            .get(scheduler_name)
            .ok_or_else(|| ScheduleError::UnknownProfile(scheduler_name.to_string()))?;
        profile.schedule(pod, node_lister)
    }
}
