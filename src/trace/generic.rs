//! Represents generic format for the cluster and workload traces that is simplified and
//! convenient.

use std::mem::take;

use serde::Deserialize;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::trace::interface::{SchedulingEvent, Trace};

/// GenericClusterTrace consists of timestamp-ordered events representing node creation and
/// removal.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct GenericClusterTrace {
    pub events: Vec<ClusterEvent>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ClusterEvent {
    pub timestamp: f64, // in seconds
    pub event_type: ClusterEventType,
}

#[derive(Debug, Deserialize, PartialEq)]
pub enum ClusterEventType {
    CreateNode { node: Node },
    RemoveNode { node_name: String },
}

/// GenericWorkloadTrace consists of timestamp-ordered events representing pod creation and
/// removal.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct GenericWorkloadTrace {
    pub events: Vec<WorkloadEvent>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct WorkloadEvent {
    pub timestamp: f64, // in seconds
    pub event_type: WorkloadEventType,
}

#[derive(Debug, Deserialize, PartialEq)]
pub enum WorkloadEventType {
    CreatePod { pod: Pod },
    RemovePod { pod_key: String },
}

impl Trace for GenericClusterTrace {
    type Event = SchedulingEvent;

    fn convert_to_replay_events(&mut self) -> Vec<(f64, SchedulingEvent)> {
        take(&mut self.events)
            .into_iter()
            .map(|event| {
                let converted = match event.event_type {
                    ClusterEventType::CreateNode { node } => SchedulingEvent::CreateNode(node),
                    ClusterEventType::RemoveNode { node_name } => {
                        SchedulingEvent::RemoveNode(node_name)
                    }
                };
                (event.timestamp, converted)
            })
            .collect()
    }

    fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl Trace for GenericWorkloadTrace {
    type Event = SchedulingEvent;

    fn convert_to_replay_events(&mut self) -> Vec<(f64, SchedulingEvent)> {
        take(&mut self.events)
            .into_iter()
            .map(|event| {
                let converted = match event.event_type {
                    WorkloadEventType::CreatePod { pod } => SchedulingEvent::CreatePod(pod),
                    WorkloadEventType::RemovePod { pod_key } => {
                        SchedulingEvent::RemovePod(pod_key)
                    }
                };
                (event.timestamp, converted)
            })
            .collect()
    }

    fn event_count(&self) -> usize {
        self.events.len()
    }
}
