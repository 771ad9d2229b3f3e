//! Builders shared by unit and integration tests.

use std::collections::BTreeMap;

use crate::config::SchedulerConfig;
use crate::core::node::{Node, Taint, TaintEffect};
use crate::core::pod::Pod;
use crate::proxy::types::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints};

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn default_test_config() -> SchedulerConfig {
    let default = r#"
    seed: 123
    parallelism: 4
    scheduling_cycle_interval: 10.0
    "#;

    // The parsed default has all k8s default plugins in a single profile.
    SchedulerConfig::from_yaml(default).unwrap()
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node_with_labels(name: &str, cpu: u32, ram: u64, node_labels: &[(&str, &str)]) -> Node {
    let mut node = Node::new(name.to_string(), cpu, ram);
    node.metadata.labels = labels(node_labels);
    node
}

pub fn tainted_node(name: &str, cpu: u32, ram: u64, key: &str, effect: TaintEffect) -> Node {
    let mut node = Node::new(name.to_string(), cpu, ram);
    node.spec.taints.push(Taint {
        key: key.to_string(),
        value: Default::default(),
        effect,
    });
    node
}

pub fn pod_with_selector(name: &str, cpu: u32, ram: u64, selector: &[(&str, &str)]) -> Pod {
    let mut pod = Pod::new(name.to_string(), cpu, ram);
    pod.spec.node_selector = labels(selector);
    pod
}

/// Endpoints of one service with a single subset exposing one named port on every ip.
pub fn endpoints(namespace: &str, name: &str, port_name: &str, port: u16, ips: &[&str]) -> Endpoints {
    Endpoints::new(
        namespace,
        name,
        vec![EndpointSubset {
            addresses: ips
                .iter()
                .map(|ip| EndpointAddress { ip: ip.to_string() })
                .collect(),
            ports: vec![EndpointPort {
                name: port_name.to_string(),
                port,
            }],
        }],
    )
}
