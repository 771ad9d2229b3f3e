use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::core::node::Node;
use crate::core::node_info::NodeInfoMap;
use crate::core::pod::Pod;

/// Name of the profile used for pods which don't specify any scheduler name.
pub const DEFAULT_SCHEDULER_NAME: &str = "default_scheduler";

/// Upper bound of a single priority score.
pub const MAX_PRIORITY: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceName {
    Cpu,
    Memory,
    Pods,
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Cpu => write!(f, "cpu"),
            ResourceName::Memory => write!(f, "memory"),
            ResourceName::Pods => write!(f, "pods"),
        }
    }
}

/// Reason of a node failing a predicate. Display strings are phrased to be counted over nodes
/// in `FitError` messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateFailureReason {
    #[error("node(s) were unschedulable")]
    NodeUnschedulable,
    #[error("node(s) didn't match the requested hostname")]
    HostNameMismatch,
    #[error("node(s) didn't have free ports for the requested pod ports")]
    HostPortsConflict,
    #[error("node(s) didn't match node selector")]
    NodeSelectorMismatch,
    #[error("node(s) had taints that the pod didn't tolerate")]
    TaintsNotTolerated,
    #[error("Insufficient {resource}")]
    InsufficientResource {
        resource: ResourceName,
        requested: u64,
        used: u64,
        capacity: u64,
    },
    #[error("{0}")]
    Custom(String),
}

/// Node name to the reasons it was filtered out.
pub type FailedPredicateMap = BTreeMap<String, Vec<PredicateFailureReason>>;

/// Error of a predicate or priority function itself, as opposed to a node not fitting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlgorithmError {
    #[error("node not found")]
    NodeNotFound,
    #[error("{0}")]
    Internal(String),
}

/// No node survived filtering. Carries the pod and why every node was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct FitError {
    pub pod: Pod,
    pub failed_predicates: FailedPredicateMap,
}

impl fmt::Display for FitError {
    // "0/3 nodes are available: 1 node(s) were unschedulable, 2 Insufficient cpu."
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reasons: HashMap<String, usize> = HashMap::new();
        for node_reasons in self.failed_predicates.values() {
            for reason in node_reasons {
                *reasons.entry(reason.to_string()).or_default() += 1;
            }
        }
        let mut reason_strings: Vec<String> = reasons
            .into_iter()
            .map(|(reason, count)| format!("{} {}", count, reason))
            .collect();
        reason_strings.sort();
        write!(
            f,
            "0/{} nodes are available: {}.",
            self.failed_predicates.len(),
            reason_strings.join(", ")
        )
    }
}

impl std::error::Error for FitError {}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no nodes available to schedule pods")]
    NoNodesAvailable,
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("empty priority list")]
    EmptyPriorityList,
    #[error("predicate {predicate} failed on node {node}: {source}")]
    Predicate {
        predicate: String,
        node: String,
        source: AlgorithmError,
    },
    #[error("priority {priority} failed: {source}")]
    Priority {
        priority: String,
        source: AlgorithmError,
    },
    #[error("extender {extender} failed: {message}")]
    Extender { extender: String, message: String },
    #[error("no scheduler profile named {0:?}")]
    UnknownProfile(String),
}

impl ScheduleError {
    pub fn is_fit_error(&self) -> bool {
        matches!(self, ScheduleError::Fit(_))
    }
}

/// Score of a single host, produced by priorities and summed over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

impl HostPriority {
    pub fn new(host: &str, score: i64) -> Self {
        Self {
            host: host.to_string(),
            score,
        }
    }
}

/// Ordered like the candidate node list, never sorted by score.
pub type HostPriorityList = Vec<HostPriority>;

/// Source of candidate nodes for one scheduling attempt.
pub trait NodeLister {
    fn list(&self) -> Vec<Node>;
}

impl NodeLister for Vec<Node> {
    fn list(&self) -> Vec<Node> {
        self.clone()
    }
}

/// Point-in-time view of node occupancy maintained by an external cache.
pub trait NodeInfoSource: Send + Sync {
    fn snapshot(&self) -> NodeInfoMap;
}

// Trait which should implement any scheduler in kubernetriks framework.
pub trait PodSchedulingAlgorithm: Send + Sync {
    // A method to assign a node on which the pod will be executed.
    // Returns Result consisting of name of assigned node or scheduling error.
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String, ScheduleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_error_message_counts_reasons() {
        let mut failed_predicates = FailedPredicateMap::new();
        failed_predicates.insert(
            "node_1".to_string(),
            vec![PredicateFailureReason::NodeUnschedulable],
        );
        for node in ["node_2", "node_3"] {
            failed_predicates.insert(
                node.to_string(),
                vec![PredicateFailureReason::InsufficientResource {
                    resource: ResourceName::Cpu,
                    requested: 4000,
                    used: 0,
                    capacity: 2000,
                }],
            );
        }
        let err = FitError {
            pod: Pod::new("pod_1".to_string(), 4000, 0),
            failed_predicates,
        };
        assert_eq!(
            "0/3 nodes are available: 1 node(s) were unschedulable, 2 Insufficient cpu.",
            err.to_string()
        );
        assert!(ScheduleError::from(err).is_fit_error());
    }
}
