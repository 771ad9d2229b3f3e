//! Type definitions for node specification and state consumed by the scheduler and trace formats

use serde::{Deserialize, Serialize};

use crate::core::common::{ObjectMeta, RuntimeResources};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TaintEffect {
    // Pods that do not tolerate the taint are not scheduled onto the node.
    NoSchedule,
    // Scheduler tries to avoid the node for pods not tolerating the taint.
    PreferNoSchedule,
    // Like NoSchedule, plus running pods not tolerating it are evicted (not modelled here).
    NoExecute,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSpec {
    // Cordoned nodes do not accept new pods.
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeStatus {
    // Resources available to pods, defaults to capacity while node is created.
    #[serde(default)]
    pub allocatable: RuntimeResources,
    // Total amount of resources
    pub capacity: RuntimeResources,
    // Maximum number of pods the node accepts, unlimited if not set.
    #[serde(default)]
    pub max_pods: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

impl Node {
    pub fn new(name: String, cpu: u32, ram: u64) -> Self {
        Self {
            metadata: ObjectMeta {
                name,
                ..Default::default()
            },
            spec: Default::default(),
            status: NodeStatus {
                allocatable: RuntimeResources { cpu, ram },
                capacity: RuntimeResources { cpu, ram },
                max_pods: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Allocatable resources, falling back to capacity for nodes coming from traces where
    /// allocatable is omitted.
    pub fn allocatable(&self) -> RuntimeResources {
        if self.status.allocatable.is_zero() {
            self.status.capacity
        } else {
            self.status.allocatable
        }
    }
}
