//! Values computed once per scheduling attempt and shared by every predicate and priority call.
//!
//! Predicates and priorities accept "empty" metadata too and then compute what they need from
//! the pod itself, so producers are an optimisation and never change decisions.

use std::collections::BTreeSet;

use crate::core::common::RuntimeResources;
use crate::core::node::TaintEffect;
use crate::core::node_info::NodeInfoMap;
use crate::core::pod::{NodeAffinity, Pod, Toleration};

#[derive(Default, Debug, Clone, PartialEq)]
pub struct PredicateMetadata {
    /// Pod requests, `None` when the producer skipped precomputation.
    pub pod_request: Option<RuntimeResources>,
    pub pod_ports: Option<BTreeSet<u16>>,
}

impl PredicateMetadata {
    pub fn pod_request(&self, pod: &Pod) -> RuntimeResources {
        self.pod_request.unwrap_or_else(|| pod.requests())
    }

    pub fn pod_ports(&self, pod: &Pod) -> BTreeSet<u16> {
        match &self.pod_ports {
            Some(ports) => ports.clone(),
            None => pod.spec.host_ports.iter().copied().collect(),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct PriorityMetadata {
    pub non_zero_request: Option<RuntimeResources>,
    /// Tolerations able to tolerate PreferNoSchedule taints.
    pub prefer_no_schedule_tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<NodeAffinity>,
}

impl PriorityMetadata {
    pub fn non_zero_request(&self, pod: &Pod) -> RuntimeResources {
        self.non_zero_request
            .unwrap_or_else(|| pod.requests().non_zero())
    }

    pub fn prefer_no_schedule_tolerations(&self, pod: &Pod) -> Vec<Toleration> {
        match &self.prefer_no_schedule_tolerations {
            Some(tolerations) => tolerations.clone(),
            None => prefer_no_schedule_tolerations(pod),
        }
    }

    pub fn affinity<'a>(&'a self, pod: &'a Pod) -> Option<&'a NodeAffinity> {
        self.affinity.as_ref().or_else(|| pod.node_affinity())
    }
}

pub(crate) fn prefer_no_schedule_tolerations(pod: &Pod) -> Vec<Toleration> {
    pod.spec
        .tolerations
        .iter()
        .filter(|t| t.effect.map_or(true, |e| e == TaintEffect::PreferNoSchedule))
        .cloned()
        .collect()
}

pub trait PredicateMetadataProducer: Send + Sync {
    fn produce(&self, pod: &Pod, node_info_map: &NodeInfoMap) -> PredicateMetadata;
}

pub trait PriorityMetadataProducer: Send + Sync {
    fn produce(&self, pod: &Pod, node_info_map: &NodeInfoMap) -> PriorityMetadata;
}

/// Precomputes everything the built-in predicates and priorities use.
#[derive(Default)]
pub struct DefaultMetadataProducer;

impl PredicateMetadataProducer for DefaultMetadataProducer {
    fn produce(&self, pod: &Pod, _node_info_map: &NodeInfoMap) -> PredicateMetadata {
        PredicateMetadata {
            pod_request: Some(pod.requests()),
            pod_ports: Some(pod.spec.host_ports.iter().copied().collect()),
        }
    }
}

impl PriorityMetadataProducer for DefaultMetadataProducer {
    fn produce(&self, pod: &Pod, _node_info_map: &NodeInfoMap) -> PriorityMetadata {
        PriorityMetadata {
            non_zero_request: Some(pod.requests().non_zero()),
            prefer_no_schedule_tolerations: Some(prefer_no_schedule_tolerations(pod)),
            affinity: pod.node_affinity().cloned(),
        }
    }
}

/// Produces empty metadata, every consumer falls back to computing from the pod.
#[derive(Default)]
pub struct EmptyMetadataProducer;

impl PredicateMetadataProducer for EmptyMetadataProducer {
    fn produce(&self, _pod: &Pod, _node_info_map: &NodeInfoMap) -> PredicateMetadata {
        PredicateMetadata::default()
    }
}

impl PriorityMetadataProducer for EmptyMetadataProducer {
    fn produce(&self, _pod: &Pod, _node_info_map: &NodeInfoMap) -> PriorityMetadata {
        PriorityMetadata::default()
    }
}
