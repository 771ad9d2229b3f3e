use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default cpu request (millicores) accounted for pods that request no cpu at all. Used only
/// by priorities, so that zero-request pods still spread across nodes.
pub const DEFAULT_MILLI_CPU_REQUEST: u32 = 100;
/// Default memory request (bytes) accounted for pods that request no memory, 200 MiB.
pub const DEFAULT_MEMORY_REQUEST: u64 = 200 * 1024 * 1024;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: f64,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// "namespace/name", or just the name for objects without namespace.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeResources {
    pub cpu: u32, // in millicores
    pub ram: u64, // in bytes
}

impl RuntimeResources {
    pub fn new(cpu: u32, ram: u64) -> Self {
        Self { cpu, ram }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu == 0 && self.ram == 0
    }

    pub fn add(&mut self, other: &RuntimeResources) {
        self.cpu = self.cpu.saturating_add(other.cpu);
        self.ram = self.ram.saturating_add(other.ram);
    }

    pub fn sub(&mut self, other: &RuntimeResources) {
        self.cpu = self.cpu.saturating_sub(other.cpu);
        self.ram = self.ram.saturating_sub(other.ram);
    }

    /// Same resources with zero fields replaced by the defaults used for scoring.
    pub fn non_zero(&self) -> RuntimeResources {
        RuntimeResources {
            cpu: if self.cpu == 0 {
                DEFAULT_MILLI_CPU_REQUEST
            } else {
                self.cpu
            },
            ram: if self.ram == 0 {
                DEFAULT_MEMORY_REQUEST
            } else {
                self.ram
            },
        }
    }
}
