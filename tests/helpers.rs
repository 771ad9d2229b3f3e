#![allow(dead_code)]

use kubernetriks_scheduler::core::node::Node;
use kubernetriks_scheduler::core::pod::Pod;
use kubernetriks_scheduler::trace::generic::{
    ClusterEvent, ClusterEventType, GenericClusterTrace, GenericWorkloadTrace, WorkloadEvent,
    WorkloadEventType,
};

pub fn cluster_trace(nodes: Vec<(f64, Node)>) -> GenericClusterTrace {
    GenericClusterTrace {
        events: nodes
            .into_iter()
            .map(|(timestamp, node)| ClusterEvent {
                timestamp,
                event_type: ClusterEventType::CreateNode { node },
            })
            .collect(),
    }
}

pub fn workload_trace(pods: Vec<(f64, Pod)>) -> GenericWorkloadTrace {
    GenericWorkloadTrace {
        events: pods
            .into_iter()
            .map(|(timestamp, pod)| WorkloadEvent {
                timestamp,
                event_type: WorkloadEventType::CreatePod { pod },
            })
            .collect(),
    }
}

pub fn remove_pod(trace: &mut GenericWorkloadTrace, timestamp: f64, pod_key: &str) {
    trace.events.push(WorkloadEvent {
        timestamp,
        event_type: WorkloadEventType::RemovePod {
            pod_key: pod_key.to_string(),
        },
    });
}

pub fn remove_node(trace: &mut GenericClusterTrace, timestamp: f64, node_name: &str) {
    trace.events.push(ClusterEvent {
        timestamp,
        event_type: ClusterEventType::RemoveNode {
            node_name: node_name.to_string(),
        },
    });
}
