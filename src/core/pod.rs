//! Type definition for Pod primitive in k8s cluster

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::common::{ObjectMeta, RuntimeResources};
use crate::core::node::{Taint, TaintEffect};

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Resources {
    #[serde(default)]
    pub limits: RuntimeResources,
    #[serde(default)]
    pub requests: RuntimeResources,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: NodeSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let label = labels.get(&self.key);
        match self.operator {
            NodeSelectorOperator::In => label.is_some_and(|v| self.values.contains(v)),
            NodeSelectorOperator::NotIn => label.map_or(true, |v| !self.values.contains(v)),
            NodeSelectorOperator::Exists => label.is_some(),
            NodeSelectorOperator::DoesNotExist => label.is_none(),
            NodeSelectorOperator::Gt | NodeSelectorOperator::Lt => {
                // Exactly one integer value is allowed for numeric comparisons.
                if self.values.len() != 1 {
                    return false;
                }
                let (Some(label), Ok(bound)) = (label, self.values[0].parse::<i64>()) else {
                    return false;
                };
                let Ok(label) = label.parse::<i64>() else {
                    return false;
                };
                if self.operator == NodeSelectorOperator::Gt {
                    label > bound
                } else {
                    label < bound
                }
            }
        }
    }
}

/// Requirements of a term are ANDed. A term without requirements matches nothing.
#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<NodeSelectorRequirement>,
}

impl NodeSelectorTerm {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_expressions.is_empty()
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreferredSchedulingTerm {
    // In the range 1-100.
    pub weight: i64,
    pub preference: NodeSelectorTerm,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeAffinity {
    // Terms are ORed. Empty list puts no constraint on the node.
    #[serde(default)]
    pub required_during_scheduling: Vec<NodeSelectorTerm>,
    #[serde(default)]
    pub preferred_during_scheduling: Vec<PreferredSchedulingTerm>,
}

impl NodeAffinity {
    pub fn required_matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required_during_scheduling.is_empty()
            || self
                .required_during_scheduling
                .iter()
                .any(|term| term.matches(labels))
    }
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TolerationOperator {
    Exists,
    #[default]
    Equal,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Toleration {
    // Empty key with Exists operator tolerates every taint.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    // None matches all effects.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if self.effect.is_some_and(|effect| effect != taint.effect) {
            return false;
        }
        if !self.key.is_empty() && self.key != taint.key {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

pub fn tolerations_tolerate_taint(tolerations: &[Toleration], taint: &Taint) -> bool {
    tolerations.iter().any(|t| t.tolerates(taint))
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodSpec {
    /// Simplified: instead of vector of containers - one container with resources
    #[serde(default)]
    pub resources: Resources,
    /// Explicitly requested node. Bound pods in a trace carry the node they run on here.
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity: Option<NodeAffinity>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub host_ports: Vec<u16>,
    /// Scheduler profile for this pod, "default_scheduler" if not set.
    #[serde(default)]
    pub scheduler_name: Option<String>,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodStatus {
    pub assigned_node: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(name: String, cpu: u32, ram: u64) -> Self {
        Self {
            metadata: ObjectMeta {
                name,
                ..Default::default()
            },
            spec: PodSpec {
                resources: Resources {
                    limits: RuntimeResources { cpu, ram },
                    requests: RuntimeResources { cpu, ram },
                },
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn requests(&self) -> RuntimeResources {
        self.spec.resources.requests
    }

    pub fn node_affinity(&self) -> Option<&NodeAffinity> {
        self.spec.affinity.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn requirement(key: &str, operator: NodeSelectorOperator, values: &[&str]) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_node_selector_operators() {
        let node_labels = labels(&[("zone", "a"), ("cores", "16")]);

        assert!(requirement("zone", NodeSelectorOperator::In, &["a", "b"]).matches(&node_labels));
        assert!(!requirement("zone", NodeSelectorOperator::NotIn, &["a"]).matches(&node_labels));
        assert!(requirement("disk", NodeSelectorOperator::NotIn, &["ssd"]).matches(&node_labels));
        assert!(requirement("zone", NodeSelectorOperator::Exists, &[]).matches(&node_labels));
        assert!(requirement("gpu", NodeSelectorOperator::DoesNotExist, &[]).matches(&node_labels));
        assert!(requirement("cores", NodeSelectorOperator::Gt, &["8"]).matches(&node_labels));
        assert!(!requirement("cores", NodeSelectorOperator::Lt, &["8"]).matches(&node_labels));
        assert!(!requirement("zone", NodeSelectorOperator::Gt, &["8"]).matches(&node_labels));
        assert!(!requirement("cores", NodeSelectorOperator::Gt, &["8", "9"]).matches(&node_labels));
    }

    #[test]
    fn test_empty_term_matches_nothing() {
        let node_labels = labels(&[("zone", "a")]);
        assert!(!NodeSelectorTerm::default().matches(&node_labels));
        assert!(NodeAffinity::default().required_matches(&node_labels));
    }

    #[test]
    fn test_toleration_matching() {
        let taint = Taint {
            key: "dedicated".to_string(),
            value: "gpu".to_string(),
            effect: TaintEffect::NoSchedule,
        };
        let equal = Toleration {
            key: "dedicated".to_string(),
            operator: TolerationOperator::Equal,
            value: "gpu".to_string(),
            effect: Some(TaintEffect::NoSchedule),
        };
        assert!(equal.tolerates(&taint));

        let wrong_effect = Toleration {
            effect: Some(TaintEffect::PreferNoSchedule),
            ..equal.clone()
        };
        assert!(!wrong_effect.tolerates(&taint));

        let wildcard = Toleration {
            operator: TolerationOperator::Exists,
            ..Default::default()
        };
        assert!(wildcard.tolerates(&taint));

        let wrong_value = Toleration {
            value: "cpu".to_string(),
            ..equal
        };
        assert!(!wrong_value.tolerates(&taint));
    }
}
