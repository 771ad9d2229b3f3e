//! Contract for external scheduler extenders.
//!
//! Extenders are consulted synchronously and in order after internal scoring. They may veto
//! nodes and contribute extra weighted scores; their implementation (usually a remote
//! service) is not part of this crate.

use thiserror::Error;

use crate::core::node::Node;
use crate::core::node_info::NodeInfoMap;
use crate::core::pod::Pod;
use crate::core::scheduler::interface::{FailedPredicateMap, HostPriorityList};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExtenderError(pub String);

pub trait SchedulerExtender: Send + Sync {
    fn name(&self) -> &str;

    /// Extenders not interested in a pod are skipped for it.
    fn is_interested(&self, _pod: &Pod) -> bool {
        true
    }

    /// Returns nodes that remain feasible and reasons for the ones vetoed.
    fn filter(
        &self,
        pod: &Pod,
        nodes: &[Node],
        node_info_map: &NodeInfoMap,
    ) -> Result<(Vec<Node>, FailedPredicateMap), ExtenderError>;

    /// Returns additional scores for the given nodes and the weight to apply to them.
    fn prioritize(&self, pod: &Pod, nodes: &[Node]) -> Result<(HostPriorityList, i64), ExtenderError>;
}
