//! Per-node aggregate of the node descriptor and pods bound to it.
//!
//! `NodeInfo` values are owned by the scheduler cache, which rebuilds them on node and pod
//! events. Scheduling attempts work on a `NodeInfoMap` snapshot and never mutate it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::common::RuntimeResources;
use crate::core::node::Node;
use crate::core::pod::Pod;

pub type NodeInfoMap = HashMap<String, Arc<NodeInfo>>;

#[derive(Default, Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// May be absent when pods were accounted before the node itself was seen.
    node: Option<Node>,
    pods: Vec<Pod>,
    /// Sum of pod requests.
    requested: RuntimeResources,
    /// Sum of pod requests with zero requests replaced by defaults, used by priorities.
    non_zero_requested: RuntimeResources,
    /// Host port to the number of bound pods holding it.
    used_ports: BTreeMap<u16, usize>,
    /// Bumped on every mutation.
    generation: u64,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node: Some(node),
            ..Default::default()
        }
    }

    pub fn with_pods(node: Node, pods: Vec<Pod>) -> Self {
        let mut node_info = Self::new(node);
        for pod in pods {
            node_info.add_pod(pod);
        }
        node_info
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    pub fn set_node(&mut self, node: Node) {
        self.node = Some(node);
        self.generation += 1;
    }

    pub fn remove_node(&mut self) {
        self.node = None;
        self.generation += 1;
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn requested(&self) -> RuntimeResources {
        self.requested
    }

    pub fn non_zero_requested(&self) -> RuntimeResources {
        self.non_zero_requested
    }

    pub fn used_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.used_ports.keys().copied()
    }

    pub fn is_port_used(&self, port: u16) -> bool {
        self.used_ports.contains_key(&port)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn allocatable(&self) -> RuntimeResources {
        self.node
            .as_ref()
            .map(|node| node.allocatable())
            .unwrap_or_default()
    }

    pub fn add_pod(&mut self, pod: Pod) {
        let requests = pod.requests();
        self.requested.add(&requests);
        self.non_zero_requested.add(&requests.non_zero());
        for port in pod.spec.host_ports.iter() {
            *self.used_ports.entry(*port).or_insert(0) += 1;
        }
        self.pods.push(pod);
        self.generation += 1;
    }

    /// Removes pod by its key and returns it, `None` if the pod is not accounted here.
    pub fn remove_pod(&mut self, pod_key: &str) -> Option<Pod> {
        let idx = self.pods.iter().position(|p| p.metadata.key() == pod_key)?;
        let pod = self.pods.swap_remove(idx);
        let requests = pod.requests();
        self.requested.sub(&requests);
        self.non_zero_requested.sub(&requests.non_zero());
        for port in pod.spec.host_ports.iter() {
            if let Some(holders) = self.used_ports.get_mut(port) {
                *holders -= 1;
                if *holders == 0 {
                    self.used_ports.remove(port);
                }
            }
        }
        self.generation += 1;
        Some(pod)
    }

    /// True when neither node nor pods are tracked, so the entry can be dropped.
    pub fn is_empty(&self) -> bool {
        self.node.is_none() && self.pods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::common::{DEFAULT_MEMORY_REQUEST, DEFAULT_MILLI_CPU_REQUEST};

    #[test]
    fn test_pod_accounting() {
        let mut node_info = NodeInfo::new(Node::new("node_1".to_string(), 4000, 16000));
        let mut pod = Pod::new("pod_1".to_string(), 1000, 4000);
        pod.spec.host_ports = vec![8080];
        node_info.add_pod(pod);
        node_info.add_pod(Pod::new("pod_2".to_string(), 0, 0));

        assert_eq!(RuntimeResources::new(1000, 4000), node_info.requested());
        assert_eq!(
            RuntimeResources::new(1000 + DEFAULT_MILLI_CPU_REQUEST, 4000 + DEFAULT_MEMORY_REQUEST),
            node_info.non_zero_requested()
        );
        assert!(node_info.is_port_used(8080));
        assert_eq!(2, node_info.generation());

        let removed = node_info.remove_pod("pod_1").unwrap();
        assert_eq!("pod_1", removed.metadata.name);
        assert_eq!(RuntimeResources::new(0, 0), node_info.requested());
        assert_eq!(0, node_info.used_ports().count());
        assert!(node_info.remove_pod("pod_1").is_none());
        assert_eq!(1, node_info.pods().len());
    }

    #[test]
    fn test_empty_after_node_and_pods_removed() {
        let mut node_info = NodeInfo::new(Node::new("node_1".to_string(), 1, 1));
        node_info.add_pod(Pod::new("pod_1".to_string(), 1, 1));
        node_info.remove_node();
        assert!(!node_info.is_empty());
        node_info.remove_pod("pod_1");
        assert!(node_info.is_empty());
        assert_eq!(RuntimeResources::default(), node_info.allocatable());
    }

    #[test]
    fn test_shared_host_port_stays_used_until_last_holder_leaves() {
        use crate::core::scheduler::metadata::PredicateMetadata;
        use crate::core::scheduler::predicates::{FitPredicate, PodFitsHostPorts};

        let with_port = |name: &str| {
            let mut pod = Pod::new(name.to_string(), 1, 1);
            pod.spec.host_ports = vec![80];
            pod
        };
        // Bound pods are accounted without a port check, so both land on the node.
        let mut node_info = NodeInfo::with_pods(
            Node::new("node_1".to_string(), 10, 10),
            vec![with_port("web_a"), with_port("web_b")],
        );

        node_info.remove_pod("web_a");
        assert!(node_info.is_port_used(80));
        assert_eq!(vec![80], node_info.used_ports().collect::<Vec<_>>());
        let (fits, _) = PodFitsHostPorts
            .fits(&with_port("web_c"), &PredicateMetadata::default(), &node_info)
            .unwrap();
        assert!(!fits);

        node_info.remove_pod("web_b");
        assert!(!node_info.is_port_used(80));
        let (fits, _) = PodFitsHostPorts
            .fits(&with_port("web_c"), &PredicateMetadata::default(), &node_info)
            .unwrap();
        assert!(fits);
    }
}
