use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use kubernetriks_scheduler::metrics::collector::MetricsCollector;
use kubernetriks_scheduler::proxy::roundrobin::{BalancerError, LoadBalancer, LoadBalancerRR};
use kubernetriks_scheduler::proxy::types::{ServicePortName, SessionAffinityType};
use kubernetriks_scheduler::replay::{replay_balancing, ReplayError};
use kubernetriks_scheduler::test_util::helpers::{default_test_config, endpoints};
use kubernetriks_scheduler::trace::endpoints::{EndpointsEvent, EndpointsEventType, EndpointsTrace};

fn web() -> ServicePortName {
    ServicePortName::new("default", "web", "http")
}

fn connect(timestamp: f64, source: Option<&str>) -> EndpointsEvent {
    EndpointsEvent {
        timestamp,
        event_type: EndpointsEventType::Connect {
            service: web(),
            source: source.map(|addr| addr.parse::<SocketAddr>().unwrap()),
            reset_affinity: false,
        },
    }
}

#[test]
fn test_replay_sticky_sessions_expire_with_trace_time() {
    let mut trace = EndpointsTrace {
        events: vec![
            EndpointsEvent {
                timestamp: 0.0,
                event_type: EndpointsEventType::NewService {
                    service: web(),
                    session_affinity: SessionAffinityType::ClientIP,
                    ttl_minutes: 1,
                },
            },
            EndpointsEvent {
                timestamp: 0.0,
                event_type: EndpointsEventType::UpdateEndpoints {
                    endpoints: vec![endpoints(
                        "default",
                        "web",
                        "http",
                        8080,
                        &["10.0.0.1", "10.0.0.2"],
                    )],
                },
            },
            connect(1.0, Some("192.168.0.1:5000")),
            connect(2.0, Some("192.168.0.1:5001")),
            connect(3.0, Some("192.168.0.2:5000")),
            connect(50.0, Some("192.168.0.3:5000")),
            // 98 seconds after the last use, past the one minute ttl
            connect(100.0, Some("192.168.0.1:5002")),
            connect(101.0, None),
            EndpointsEvent {
                timestamp: 110.0,
                event_type: EndpointsEventType::UpdateEndpoints { endpoints: vec![] },
            },
            connect(111.0, Some("192.168.0.1:5003")),
        ],
    };
    let mut config = default_test_config();
    config.load_balancer.sticky_session_cleanup_interval = Some(30.0);
    let metrics = Arc::new(Mutex::new(MetricsCollector::new()));

    let result = replay_balancing(&config, &mut trace, metrics.clone()).unwrap();
    let selected: Vec<Result<String, String>> = result
        .connections
        .iter()
        .map(|connection| connection.endpoint.clone())
        .collect();
    assert_eq!(7, selected.len());

    let first = selected[0].clone().unwrap();
    let second = selected[2].clone().unwrap();
    assert_ne!(first, second);
    // same client within the ttl
    assert_eq!(first, selected[1].clone().unwrap());
    // new client continues the rotation
    assert_eq!(first, selected[3].clone().unwrap());
    // expired affinity falls back to the rotation
    assert_eq!(second, selected[4].clone().unwrap());
    assert_eq!(
        Err("malformed source address for default/web:http: session affinity needs a client ip"
            .to_string()),
        selected[5]
    );
    assert_eq!(
        Err("missing service entry for default/web:http".to_string()),
        selected[6]
    );

    let metrics = metrics.lock();
    assert_eq!(5, metrics.endpoints_selected);
    assert_eq!(2, metrics.endpoint_lookup_failures);
}

#[test]
fn test_balancer_is_shared_between_threads() {
    let lb = Arc::new(LoadBalancerRR::new(StdRng::seed_from_u64(5)));
    lb.new_service(&web(), SessionAffinityType::None, 0);
    lb.on_endpoints_update(&[endpoints(
        "default",
        "web",
        "http",
        80,
        &["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"],
    )]);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lb = lb.clone();
            thread::spawn(move || {
                (0..100)
                    .map(|_| lb.next_endpoint(&web(), None, false).unwrap())
                    .collect::<Vec<String>>()
            })
        })
        .collect();
    let mut counts = std::collections::HashMap::new();
    for handle in handles {
        for endpoint in handle.join().unwrap() {
            *counts.entry(endpoint).or_insert(0) += 1;
        }
    }

    // 400 picks rotate over 4 endpoints under one lock
    assert_eq!(4, counts.len());
    assert!(counts.values().all(|count| *count == 100));
}

#[test]
fn test_endpoints_removed_from_snapshot_are_gone() {
    let lb = LoadBalancerRR::new(StdRng::seed_from_u64(5));
    let api = ServicePortName::new("default", "api", "grpc");
    lb.on_endpoints_update(&[
        endpoints("default", "web", "http", 80, &["10.0.0.1"]),
        endpoints("default", "api", "grpc", 9090, &["10.0.1.1"]),
    ]);
    assert!(lb.service_has_endpoints(&web()));
    assert!(lb.service_has_endpoints(&api));

    lb.on_endpoints_update(&[endpoints("default", "api", "grpc", 9090, &["10.0.1.1"])]);
    assert!(!lb.service_has_endpoints(&web()));
    assert_eq!(
        Err(BalancerError::MissingServiceEntry(web())),
        lb.next_endpoint(&web(), None, false)
    );
    assert_eq!(
        "10.0.1.1:9090",
        lb.next_endpoint(&api, None, false).unwrap()
    );
}

#[test]
fn test_replay_rejects_infinite_timestamp() {
    let trace_yaml = r#"
    events:
    - timestamp: .inf
      event_type:
        !DeleteService
          service:
            namespace: default
            name: web
            port: http
    "#;
    let mut trace: EndpointsTrace = serde_yaml::from_str(trace_yaml).unwrap();
    let mut config = default_test_config();
    config.load_balancer.sticky_session_cleanup_interval = Some(30.0);

    let result = replay_balancing(
        &config,
        &mut trace,
        Arc::new(Mutex::new(MetricsCollector::new())),
    );
    assert!(matches!(result, Err(ReplayError::NonFiniteTimestamp(_))));
}
