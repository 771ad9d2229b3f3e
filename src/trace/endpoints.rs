//! Trace format for the load balancer: service registrations, endpoint snapshots and client
//! connections.

use std::mem::take;
use std::net::SocketAddr;

use serde::Deserialize;

use crate::proxy::types::{Endpoints, ServicePortName, SessionAffinityType};
use crate::trace::interface::{BalancingEvent, Trace};

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct EndpointsTrace {
    pub events: Vec<EndpointsEvent>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct EndpointsEvent {
    pub timestamp: f64, // in seconds
    pub event_type: EndpointsEventType,
}

#[derive(Debug, Deserialize, PartialEq)]
pub enum EndpointsEventType {
    NewService {
        service: ServicePortName,
        #[serde(default)]
        session_affinity: SessionAffinityType,
        // Zero selects the balancer's default ttl.
        #[serde(default)]
        ttl_minutes: u64,
    },
    UpdateEndpoints {
        endpoints: Vec<Endpoints>,
    },
    Connect {
        service: ServicePortName,
        source: Option<SocketAddr>,
        #[serde(default)]
        reset_affinity: bool,
    },
    CleanupStaleSessions {
        service: ServicePortName,
    },
    DeleteService {
        service: ServicePortName,
    },
}

impl Trace for EndpointsTrace {
    type Event = BalancingEvent;

    fn convert_to_replay_events(&mut self) -> Vec<(f64, BalancingEvent)> {
        take(&mut self.events)
            .into_iter()
            .map(|event| {
                let converted = match event.event_type {
                    EndpointsEventType::NewService {
                        service,
                        session_affinity,
                        ttl_minutes,
                    } => BalancingEvent::NewService {
                        service,
                        session_affinity,
                        ttl_minutes,
                    },
                    EndpointsEventType::UpdateEndpoints { endpoints } => {
                        BalancingEvent::UpdateEndpoints(endpoints)
                    }
                    EndpointsEventType::Connect {
                        service,
                        source,
                        reset_affinity,
                    } => BalancingEvent::Connect {
                        service,
                        source,
                        reset_affinity,
                    },
                    EndpointsEventType::CleanupStaleSessions { service } => {
                        BalancingEvent::CleanupStaleSessions(service)
                    }
                    EndpointsEventType::DeleteService { service } => {
                        BalancingEvent::DeleteService(service)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_endpoints_trace() {
        let trace_yaml = r#"
        events:
        - timestamp: 0.0
          event_type:
            !NewService
              service:
                namespace: default
                name: web
                port: http
              session_affinity: ClientIP
        - timestamp: 0.0
          event_type:
            !UpdateEndpoints
              endpoints:
              - metadata:
                  name: web
                  namespace: default
                subsets:
                - addresses:
                  - ip: 10.0.0.1
                  - ip: 10.0.0.2
                  ports:
                  - name: http
                    port: 8080
        - timestamp: 1.5
          event_type:
            !Connect
              service:
                namespace: default
                name: web
                port: http
              source: 192.168.1.10:40000
        "#;

        let mut trace: EndpointsTrace = serde_yaml::from_str(trace_yaml).unwrap();
        let events = trace.convert_to_replay_events();
        assert_eq!(3, events.len());

        let svc_port = ServicePortName::new("default", "web", "http");
        assert_eq!(
            (
                0.0,
                BalancingEvent::NewService {
                    service: svc_port.clone(),
                    session_affinity: SessionAffinityType::ClientIP,
                    ttl_minutes: 0,
                }
            ),
            events[0]
        );
        let (_, BalancingEvent::UpdateEndpoints(endpoints)) = &events[1] else {
            panic!("expected endpoints update, got {:?}", events[1]);
        };
        assert_eq!(2, endpoints[0].subsets[0].addresses.len());
        assert_eq!(8080, endpoints[0].subsets[0].ports[0].port);
        assert_eq!(
            (
                1.5,
                BalancingEvent::Connect {
                    service: svc_port,
                    source: Some("192.168.1.10:40000".parse().unwrap()),
                    reset_affinity: false,
                }
            ),
            events[2]
        );
    }
}
