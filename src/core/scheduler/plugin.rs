//! Registry of predicates and priorities available to configuration by name.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::config::ConfigError;
use crate::core::scheduler::predicates::{
    CheckNodeUnschedulable, FitPredicate, GeneralPredicates, MatchNodeSelector, PodFitsHost,
    PodFitsHostPorts, PodFitsResources, PodToleratesNodeTaints, CHECK_NODE_UNSCHEDULABLE,
    GENERAL_PREDICATES, MATCH_NODE_SELECTOR, POD_FITS_HOST, POD_FITS_HOST_PORTS,
    POD_FITS_RESOURCES, POD_TOLERATES_NODE_TAINTS,
};
use crate::core::scheduler::priorities::{
    BalancedResourceAllocation, EqualPriority, LeastRequestedPriority, MostRequestedPriority,
    NodeAffinityPriority, NormalizeReduce, PriorityConfig, SelectorSpreadPriority,
    TaintTolerationPriority, BALANCED_RESOURCE_ALLOCATION, EQUAL_PRIORITY,
    LEAST_REQUESTED_PRIORITY, MOST_REQUESTED_PRIORITY, NODE_AFFINITY_PRIORITY,
    SELECTOR_SPREAD_PRIORITY, TAINT_TOLERATION_PRIORITY,
};

pub type PredicateFactory = fn() -> Arc<dyn FitPredicate>;
pub type PriorityFactory = fn(i64) -> PriorityConfig;

pub enum PluginType {
    FilterPlugin(PredicateFactory),
    ScorePlugin(PriorityFactory),
}

lazy_static! {
    pub static ref PLUGIN_REGISTRY: HashMap<&'static str, PluginType> = {
        HashMap::from([
            (
                CHECK_NODE_UNSCHEDULABLE,
                PluginType::FilterPlugin(check_node_unschedulable),
            ),
            (POD_FITS_HOST, PluginType::FilterPlugin(pod_fits_host)),
            (POD_FITS_HOST_PORTS, PluginType::FilterPlugin(pod_fits_host_ports)),
            (MATCH_NODE_SELECTOR, PluginType::FilterPlugin(match_node_selector)),
            (POD_FITS_RESOURCES, PluginType::FilterPlugin(pod_fits_resources)),
            (
                POD_TOLERATES_NODE_TAINTS,
                PluginType::FilterPlugin(pod_tolerates_node_taints),
            ),
            (GENERAL_PREDICATES, PluginType::FilterPlugin(general_predicates)),
            (LEAST_REQUESTED_PRIORITY, PluginType::ScorePlugin(least_requested)),
            (MOST_REQUESTED_PRIORITY, PluginType::ScorePlugin(most_requested)),
            (
                BALANCED_RESOURCE_ALLOCATION,
                PluginType::ScorePlugin(balanced_resource_allocation),
            ),
            (NODE_AFFINITY_PRIORITY, PluginType::ScorePlugin(node_affinity)),
            (TAINT_TOLERATION_PRIORITY, PluginType::ScorePlugin(taint_toleration)),
            (SELECTOR_SPREAD_PRIORITY, PluginType::ScorePlugin(selector_spread)),
            (EQUAL_PRIORITY, PluginType::ScorePlugin(equal)),
        ])
    };
}

/// Filter plugins of the default profile, in evaluation order. Cheap checks come first so
/// that short-circuiting skips the expensive ones.
pub const DEFAULT_PREDICATES: [&str; 3] = [
    CHECK_NODE_UNSCHEDULABLE,
    GENERAL_PREDICATES,
    POD_TOLERATES_NODE_TAINTS,
];

/// Upper bound for configured score plugin weights, as in kube-scheduler.
pub const MAX_WEIGHT: i64 = 100;

/// Score plugins of the default profile with their weights.
pub const DEFAULT_PRIORITIES: [(&str, i64); 5] = [
    (SELECTOR_SPREAD_PRIORITY, 1),
    (LEAST_REQUESTED_PRIORITY, 1),
    (BALANCED_RESOURCE_ALLOCATION, 1),
    (NODE_AFFINITY_PRIORITY, 1),
    (TAINT_TOLERATION_PRIORITY, 1),
];

fn check_node_unschedulable() -> Arc<dyn FitPredicate> {
    Arc::new(CheckNodeUnschedulable)
}

fn pod_fits_host() -> Arc<dyn FitPredicate> {
    Arc::new(PodFitsHost)
}

fn pod_fits_host_ports() -> Arc<dyn FitPredicate> {
    Arc::new(PodFitsHostPorts)
}

fn match_node_selector() -> Arc<dyn FitPredicate> {
    Arc::new(MatchNodeSelector)
}

fn pod_fits_resources() -> Arc<dyn FitPredicate> {
    Arc::new(PodFitsResources)
}

fn pod_tolerates_node_taints() -> Arc<dyn FitPredicate> {
    Arc::new(PodToleratesNodeTaints)
}

fn general_predicates() -> Arc<dyn FitPredicate> {
    Arc::new(GeneralPredicates)
}

fn least_requested(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(
        LEAST_REQUESTED_PRIORITY,
        Arc::new(LeastRequestedPriority),
        None,
        weight,
    )
}

fn most_requested(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(
        MOST_REQUESTED_PRIORITY,
        Arc::new(MostRequestedPriority),
        None,
        weight,
    )
}

fn balanced_resource_allocation(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(
        BALANCED_RESOURCE_ALLOCATION,
        Arc::new(BalancedResourceAllocation),
        None,
        weight,
    )
}

fn node_affinity(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(
        NODE_AFFINITY_PRIORITY,
        Arc::new(NodeAffinityPriority),
        Some(Arc::new(NormalizeReduce::new(false))),
        weight,
    )
}

fn taint_toleration(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(
        TAINT_TOLERATION_PRIORITY,
        Arc::new(TaintTolerationPriority),
        Some(Arc::new(NormalizeReduce::new(true))),
        weight,
    )
}

fn selector_spread(weight: i64) -> PriorityConfig {
    PriorityConfig::function(
        SELECTOR_SPREAD_PRIORITY,
        Arc::new(SelectorSpreadPriority),
        weight,
    )
}

fn equal(weight: i64) -> PriorityConfig {
    PriorityConfig::map_reduce(EQUAL_PRIORITY, Arc::new(EqualPriority), None, weight)
}

pub fn get_predicate(name: &str) -> Result<Arc<dyn FitPredicate>, ConfigError> {
    match PLUGIN_REGISTRY.get(name) {
        Some(PluginType::FilterPlugin(factory)) => Ok(factory()),
        Some(PluginType::ScorePlugin(_)) => Err(ConfigError::WrongPluginKind {
            name: name.to_string(),
            expected: "filter",
        }),
        None => Err(ConfigError::UnknownPlugin(name.to_string())),
    }
}

pub fn get_priority(name: &str, weight: i64) -> Result<PriorityConfig, ConfigError> {
    if !(1..=MAX_WEIGHT).contains(&weight) {
        return Err(ConfigError::InvalidWeight {
            name: name.to_string(),
            weight,
            max: MAX_WEIGHT,
        });
    }
    match PLUGIN_REGISTRY.get(name) {
        Some(PluginType::ScorePlugin(factory)) => Ok(factory(weight)),
        Some(PluginType::FilterPlugin(_)) => Err(ConfigError::WrongPluginKind {
            name: name.to_string(),
            expected: "score",
        }),
        None => Err(ConfigError::UnknownPlugin(name.to_string())),
    }
}
