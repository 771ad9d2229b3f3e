//! Soft preferences: priorities rank nodes that passed filtering with scores in 0..=10.
//!
//! A priority is either a per-node `PriorityMap` (optionally followed by a `PriorityReduce`
//! pass over all map results) or a `PriorityFunction` that scores every node at once when it
//! needs cross-node context.

use std::sync::Arc;

use crate::core::common::RuntimeResources;
use crate::core::node::{Node, TaintEffect};
use crate::core::node_info::{NodeInfo, NodeInfoMap};
use crate::core::pod::{tolerations_tolerate_taint, Pod};
use crate::core::scheduler::interface::{AlgorithmError, HostPriority, HostPriorityList, MAX_PRIORITY};
use crate::core::scheduler::metadata::PriorityMetadata;

pub const LEAST_REQUESTED_PRIORITY: &str = "LeastRequestedPriority";
pub const MOST_REQUESTED_PRIORITY: &str = "MostRequestedPriority";
pub const BALANCED_RESOURCE_ALLOCATION: &str = "BalancedResourceAllocation";
pub const NODE_AFFINITY_PRIORITY: &str = "NodeAffinityPriority";
pub const TAINT_TOLERATION_PRIORITY: &str = "TaintTolerationPriority";
pub const SELECTOR_SPREAD_PRIORITY: &str = "SelectorSpreadPriority";
pub const EQUAL_PRIORITY: &str = "EqualPriority";

pub trait PriorityMap: Send + Sync {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError>;
}

pub trait PriorityReduce: Send + Sync {
    fn reduce(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info_map: &NodeInfoMap,
        result: &mut HostPriorityList,
    ) -> Result<(), AlgorithmError>;
}

pub trait PriorityFunction: Send + Sync {
    fn prioritize(
        &self,
        pod: &Pod,
        node_info_map: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList, AlgorithmError>;
}

#[derive(Clone)]
pub enum Prioritizer {
    MapReduce {
        map: Arc<dyn PriorityMap>,
        reduce: Option<Arc<dyn PriorityReduce>>,
    },
    Function(Arc<dyn PriorityFunction>),
}

#[derive(Clone)]
pub struct PriorityConfig {
    pub name: String,
    pub prioritizer: Prioritizer,
    pub weight: i64,
}

impl PriorityConfig {
    pub fn map_reduce(
        name: &str,
        map: Arc<dyn PriorityMap>,
        reduce: Option<Arc<dyn PriorityReduce>>,
        weight: i64,
    ) -> Self {
        Self {
            name: name.to_string(),
            prioritizer: Prioritizer::MapReduce { map, reduce },
            weight,
        }
    }

    pub fn function(name: &str, function: Arc<dyn PriorityFunction>, weight: i64) -> Self {
        Self {
            name: name.to_string(),
            prioritizer: Prioritizer::Function(function),
            weight,
        }
    }
}

/// Map priority backed by a closure.
pub struct PriorityMapFn<F>(pub F);

impl<F> PriorityMap for PriorityMapFn<F>
where
    F: Fn(&Pod, &PriorityMetadata, &NodeInfo) -> Result<HostPriority, AlgorithmError> + Send + Sync,
{
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        (self.0)(pod, meta, node_info)
    }
}

/// Scales raw map scores into 0..=max_priority relative to the highest one. With `reverse`
/// the lowest raw score gets the highest final score.
pub struct NormalizeReduce {
    pub max_priority: i64,
    pub reverse: bool,
}

impl NormalizeReduce {
    pub fn new(reverse: bool) -> Self {
        Self {
            max_priority: MAX_PRIORITY,
            reverse,
        }
    }
}

impl PriorityReduce for NormalizeReduce {
    fn reduce(
        &self,
        _pod: &Pod,
        _meta: &PriorityMetadata,
        _node_info_map: &NodeInfoMap,
        result: &mut HostPriorityList,
    ) -> Result<(), AlgorithmError> {
        let max_count = result.iter().map(|hp| hp.score).max().unwrap_or(0);
        if max_count <= 0 {
            let score = if self.reverse { self.max_priority } else { 0 };
            for host_priority in result.iter_mut() {
                host_priority.score = score;
            }
            return Ok(());
        }
        for host_priority in result.iter_mut() {
            let score = self.max_priority * host_priority.score / max_count;
            host_priority.score = if self.reverse {
                self.max_priority - score
            } else {
                score
            };
        }
        Ok(())
    }
}

fn node_of(node_info: &NodeInfo) -> Result<&Node, AlgorithmError> {
    node_info.node().ok_or(AlgorithmError::NodeNotFound)
}

/// Applies `scorer(requested, capacity)` to cpu and memory and averages the two.
fn resource_allocation_score(
    pod: &Pod,
    meta: &PriorityMetadata,
    node_info: &NodeInfo,
    scorer: fn(u64, u64) -> i64,
) -> Result<HostPriority, AlgorithmError> {
    let node = node_of(node_info)?;
    let (requested, capacity) = total_requested(pod, meta, node_info, node);
    let cpu_score = scorer(u64::from(requested.cpu), u64::from(capacity.cpu));
    let ram_score = scorer(requested.ram, capacity.ram);
    Ok(HostPriority::new(node.name(), (cpu_score + ram_score) / 2))
}

fn total_requested(
    pod: &Pod,
    meta: &PriorityMetadata,
    node_info: &NodeInfo,
    node: &Node,
) -> (RuntimeResources, RuntimeResources) {
    let mut requested = node_info.non_zero_requested();
    requested.add(&meta.non_zero_request(pod));
    (requested, node.allocatable())
}

fn least_requested_score(requested: u64, capacity: u64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    ((capacity - requested) as u128 * MAX_PRIORITY as u128 / capacity as u128) as i64
}

fn most_requested_score(requested: u64, capacity: u64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    (requested as u128 * MAX_PRIORITY as u128 / capacity as u128) as i64
}

/// Favors nodes with more free resources left after placing the pod.
pub struct LeastRequestedPriority;

impl PriorityMap for LeastRequestedPriority {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        resource_allocation_score(pod, meta, node_info, least_requested_score)
    }
}

/// Favors fuller nodes, packing pods densely.
pub struct MostRequestedPriority;

impl PriorityMap for MostRequestedPriority {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        resource_allocation_score(pod, meta, node_info, most_requested_score)
    }
}

/// Favors nodes whose cpu and memory utilization stay close to each other.
pub struct BalancedResourceAllocation;

fn fraction_of_capacity(requested: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 1.0;
    }
    requested as f64 / capacity as f64
}

impl PriorityMap for BalancedResourceAllocation {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        let node = node_of(node_info)?;
        let (requested, capacity) = total_requested(pod, meta, node_info, node);
        let cpu_fraction = fraction_of_capacity(u64::from(requested.cpu), u64::from(capacity.cpu));
        let ram_fraction = fraction_of_capacity(requested.ram, capacity.ram);

        let score = if cpu_fraction >= 1.0 || ram_fraction >= 1.0 {
            0
        } else {
            let diff = (cpu_fraction - ram_fraction).abs();
            ((1.0 - diff) * MAX_PRIORITY as f64) as i64
        };
        Ok(HostPriority::new(node.name(), score))
    }
}

/// Sums weights of preferred node affinity terms matched by the node. Raw sums are
/// normalized by `NormalizeReduce`.
pub struct NodeAffinityPriority;

impl PriorityMap for NodeAffinityPriority {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        let node = node_of(node_info)?;
        let count: i64 = meta.affinity(pod).map_or(0, |affinity| {
            affinity
                .preferred_during_scheduling
                .iter()
                .filter(|term| term.weight > 0 && term.preference.matches(&node.metadata.labels))
                .map(|term| term.weight)
                .sum()
        });
        Ok(HostPriority::new(node.name(), count))
    }
}

/// Counts PreferNoSchedule taints the pod doesn't tolerate. Reduced in reverse so that nodes
/// with fewer such taints score higher.
pub struct TaintTolerationPriority;

impl PriorityMap for TaintTolerationPriority {
    fn map(
        &self,
        pod: &Pod,
        meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        let node = node_of(node_info)?;
        let tolerations = meta.prefer_no_schedule_tolerations(pod);
        let intolerable = node
            .spec
            .taints
            .iter()
            .filter(|taint| taint.effect == TaintEffect::PreferNoSchedule)
            .filter(|taint| !tolerations_tolerate_taint(&tolerations, taint))
            .count();
        Ok(HostPriority::new(node.name(), intolerable as i64))
    }
}

pub struct EqualPriority;

impl PriorityMap for EqualPriority {
    fn map(
        &self,
        _pod: &Pod,
        _meta: &PriorityMetadata,
        node_info: &NodeInfo,
    ) -> Result<HostPriority, AlgorithmError> {
        let node = node_of(node_info)?;
        Ok(HostPriority::new(node.name(), 1))
    }
}

/// Spreads pods sharing the scheduled pod's labels (within its namespace) across nodes:
/// the fewer such pods a node already runs, the higher its score.
pub struct SelectorSpreadPriority;

fn is_peer(pod: &Pod, other: &Pod) -> bool {
    other.metadata.namespace == pod.metadata.namespace
        && pod
            .metadata
            .labels
            .iter()
            .all(|(key, value)| other.metadata.labels.get(key) == Some(value))
}

impl PriorityFunction for SelectorSpreadPriority {
    fn prioritize(
        &self,
        pod: &Pod,
        node_info_map: &NodeInfoMap,
        nodes: &[Node],
    ) -> Result<HostPriorityList, AlgorithmError> {
        let mut counts = Vec::with_capacity(nodes.len());
        for node in nodes {
            let node_info = node_info_map
                .get(node.name())
                .ok_or(AlgorithmError::NodeNotFound)?;
            let count = if pod.metadata.labels.is_empty() {
                0
            } else {
                node_info.pods().iter().filter(|p| is_peer(pod, p)).count() as i64
            };
            counts.push(count);
        }

        let max_count = counts.iter().copied().max().unwrap_or(0);
        Ok(nodes
            .iter()
            .zip(counts)
            .map(|(node, count)| {
                let score = if max_count > 0 {
                    MAX_PRIORITY * (max_count - count) / max_count
                } else {
                    MAX_PRIORITY
                };
                HostPriority::new(node.name(), score)
            })
            .collect())
    }
}
