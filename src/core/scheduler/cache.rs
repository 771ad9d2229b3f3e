//! Scheduler cache of node occupancy, updated on node and pod events.
//!
//! Entries are kept behind `Arc` and updated copy-on-write, so snapshots handed to
//! scheduling attempts are cheap and stay consistent while the cache moves on.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use thiserror::Error;

use crate::core::node::Node;
use crate::core::node_info::{NodeInfo, NodeInfoMap};
use crate::core::pod::Pod;
use crate::core::scheduler::interface::{NodeInfoSource, NodeLister};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("pod {0} is not bound to any node")]
    PodNotBound(String),
    #[error("pod {0} is not found in cache")]
    PodNotFound(String),
}

/// Node a pod runs on: assigned by scheduling or requested explicitly in its spec.
pub fn bound_node(pod: &Pod) -> Option<&str> {
    if !pod.status.assigned_node.is_empty() {
        return Some(&pod.status.assigned_node);
    }
    pod.spec.node_name.as_deref().filter(|name| !name.is_empty())
}

#[derive(Default)]
pub struct SchedulerCache {
    nodes: RwLock<HashMap<String, Arc<NodeInfo>>>,
}

impl SchedulerCache {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds the node or replaces its descriptor, keeping already accounted pods.
    pub fn add_node(&self, node: Node) {
        let mut nodes = self.nodes.write();
        let node_name = node.metadata.name.clone();
        let entry = nodes.entry(node_name.clone()).or_default();
        Arc::make_mut(entry).set_node(node);
        debug!("Node {:?} added to scheduler cache", node_name);
    }

    pub fn update_node(&self, node: Node) {
        self.add_node(node)
    }

    /// Returns false if the node was not known.
    pub fn remove_node(&self, node_name: &str) -> bool {
        let mut nodes = self.nodes.write();
        let Some(entry) = nodes.get_mut(node_name) else {
            return false;
        };
        let node_info = Arc::make_mut(entry);
        if node_info.node().is_none() {
            return false;
        }
        node_info.remove_node();
        // Pods of a removed node stay accounted until their own removal events arrive.
        if node_info.is_empty() {
            nodes.remove(node_name);
        }
        debug!("Node {:?} removed from scheduler cache", node_name);
        true
    }

    /// Accounts a pod already bound to a node.
    pub fn add_pod(&self, pod: Pod) -> Result<(), CacheError> {
        let node_name = bound_node(&pod)
            .ok_or_else(|| CacheError::PodNotBound(pod.metadata.key()))?
            .to_string();
        let mut nodes = self.nodes.write();
        let entry = nodes.entry(node_name).or_default();
        Arc::make_mut(entry).add_pod(pod);
        Ok(())
    }

    /// Accounts a freshly scheduled pod on its chosen node before the binding is recorded
    /// anywhere else, so the next attempts see the node's capacity as taken.
    pub fn assume_pod(&self, pod: &Pod, node_name: &str) {
        let mut assumed = pod.clone();
        assumed.status.assigned_node = node_name.to_string();
        let mut nodes = self.nodes.write();
        let entry = nodes.entry(node_name.to_string()).or_default();
        Arc::make_mut(entry).add_pod(assumed);
    }

    pub fn remove_pod(&self, pod: &Pod) -> Result<(), CacheError> {
        let pod_key = pod.metadata.key();
        let node_name = bound_node(pod).ok_or_else(|| CacheError::PodNotBound(pod_key.clone()))?;
        let mut nodes = self.nodes.write();
        let entry = nodes
            .get_mut(node_name)
            .ok_or_else(|| CacheError::PodNotFound(pod_key.clone()))?;
        let node_info = Arc::make_mut(entry);
        node_info
            .remove_pod(&pod_key)
            .ok_or_else(|| CacheError::PodNotFound(pod_key.clone()))?;
        if node_info.is_empty() {
            nodes.remove(node_name);
        }
        Ok(())
    }

    pub fn get_node_info(&self, node_name: &str) -> Option<Arc<NodeInfo>> {
        self.nodes.read().get(node_name).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes
            .read()
            .values()
            .filter(|node_info| node_info.node().is_some())
            .count()
    }

    pub fn pod_count(&self) -> usize {
        self.nodes
            .read()
            .values()
            .map(|node_info| node_info.pods().len())
            .sum()
    }
}

impl NodeInfoSource for SchedulerCache {
    fn snapshot(&self) -> NodeInfoMap {
        self.nodes.read().clone()
    }
}

impl NodeLister for SchedulerCache {
    /// Known nodes ordered by name.
    fn list(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .read()
            .values()
            .filter_map(|node_info| node_info.node().cloned())
            .collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        nodes
    }
}
