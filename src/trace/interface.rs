// Interface for any trace which serves as input to the replay drivers.

use std::net::SocketAddr;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::proxy::types::{Endpoints, ServicePortName, SessionAffinityType};

/// Events consumed by the scheduling replay. Cluster traces produce node events, workload
/// traces produce pod events.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulingEvent {
    CreateNode(Node),
    RemoveNode(String),
    CreatePod(Pod),
    /// Pod key, "namespace/name" or just name.
    RemovePod(String),
}

/// Events consumed by the load balancer replay.
#[derive(Clone, Debug, PartialEq)]
pub enum BalancingEvent {
    NewService {
        service: ServicePortName,
        session_affinity: SessionAffinityType,
        ttl_minutes: u64,
    },
    UpdateEndpoints(Vec<Endpoints>),
    Connect {
        service: ServicePortName,
        source: Option<SocketAddr>,
        reset_affinity: bool,
    },
    CleanupStaleSessions(ServicePortName),
    DeleteService(ServicePortName),
}

// And we define trait Trace to represent any trace format acceptable by replay.
pub trait Trace {
    type Event;

    // Converts the trace into timestamped replay events, timestamps are in seconds. Events are
    // moved out of the trace, so a second call yields nothing.
    fn convert_to_replay_events(&mut self) -> Vec<(f64, Self::Event)>;

    fn event_count(&self) -> usize;
}
