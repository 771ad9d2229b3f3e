mod helpers;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use kubernetriks_scheduler::core::node::Node;
use kubernetriks_scheduler::core::pod::Pod;
use kubernetriks_scheduler::metrics::collector::MetricsCollector;
use kubernetriks_scheduler::replay::{replay_scheduling, ReplayError};
use kubernetriks_scheduler::test_util::helpers::{default_test_config, GIB};
use kubernetriks_scheduler::trace::generic::{GenericClusterTrace, GenericWorkloadTrace};

use helpers::{cluster_trace, remove_node, remove_pod, workload_trace};

fn placements(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(pod, node)| (pod.to_string(), node.to_string()))
        .collect()
}

#[test]
fn test_pods_wait_for_capacity() {
    // Cycles run every 10 seconds. pod_2 does not fit until node_2 appears at 25.0, pod_3
    // never fits.
    let mut cluster = cluster_trace(vec![
        (0.0, Node::new("node_1".to_string(), 4000, 8 * GIB)),
        (25.0, Node::new("node_2".to_string(), 4000, 8 * GIB)),
    ]);
    let mut workload = workload_trace(vec![
        (1.0, Pod::new("pod_1".to_string(), 3000, GIB)),
        (2.0, Pod::new("pod_2".to_string(), 3000, GIB)),
        (30.0, Pod::new("pod_3".to_string(), 3000, GIB)),
    ]);
    let metrics = Arc::new(Mutex::new(MetricsCollector::new()));

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        metrics.clone(),
    )
    .unwrap();

    assert_eq!(
        placements(&[("pod_1", "node_1"), ("pod_2", "node_2")]),
        result.placements
    );
    assert_eq!(
        Some(&"0/2 nodes are available: 2 Insufficient cpu.".to_string()),
        result.unschedulable.get("pod_3")
    );
    assert_eq!(1, result.unschedulable.len());
    // cycles at 10, 20, 30 and a final one at 40 which places nothing
    assert_eq!(4, result.scheduling_cycles);

    let metrics = metrics.lock();
    assert_eq!(2, metrics.total_nodes_in_trace);
    assert_eq!(3, metrics.total_pods_in_trace);
    assert_eq!(2, metrics.pods_scheduled);
    assert_eq!(4, metrics.pods_unschedulable);
    assert_eq!(0, metrics.scheduling_errors);
    assert_eq!(1, metrics.pods_left_in_queue);
    assert_eq!(9.0, metrics.pod_queue_time_stats.min());
    assert_eq!(28.0, metrics.pod_queue_time_stats.max());
    assert_eq!(3.0, metrics.pod_scheduling_attempts_stats.max());
}

#[test]
fn test_removed_pod_frees_resources() {
    let mut cluster = cluster_trace(vec![(0.0, Node::new("node_1".to_string(), 4000, 8 * GIB))]);
    let mut workload = workload_trace(vec![
        (1.0, Pod::new("pod_1".to_string(), 3000, GIB)),
        (2.0, Pod::new("pod_2".to_string(), 3000, GIB)),
    ]);
    remove_pod(&mut workload, 15.0, "pod_1");
    let metrics = Arc::new(Mutex::new(MetricsCollector::new()));

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        metrics.clone(),
    )
    .unwrap();

    assert_eq!(placements(&[("pod_2", "node_1")]), result.placements);
    assert!(result.unschedulable.is_empty());
    assert_eq!(0, metrics.lock().pods_left_in_queue);
}

#[test]
fn test_removed_node_is_not_used() {
    let mut cluster = cluster_trace(vec![
        (0.0, Node::new("node_1".to_string(), 4000, 8 * GIB)),
        (0.0, Node::new("node_2".to_string(), 16000, 32 * GIB)),
    ]);
    remove_node(&mut cluster, 5.0, "node_2");
    let mut workload = workload_trace(vec![(6.0, Pod::new("pod_1".to_string(), 1000, GIB))]);

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        Arc::new(Mutex::new(MetricsCollector::new())),
    )
    .unwrap();

    assert_eq!(placements(&[("pod_1", "node_1")]), result.placements);
}

#[test]
fn test_replay_from_yaml_traces() {
    let cluster_yaml = r#"
    events:
    - timestamp: 0.0
      event_type:
        !CreateNode
          node:
            metadata:
              name: ssd_node
              labels:
                disk: ssd
            status:
              capacity:
                cpu: 8000
                ram: 17179869184
    - timestamp: 0.0
      event_type:
        !CreateNode
          node:
            metadata:
              name: hdd_node
              labels:
                disk: hdd
            status:
              capacity:
                cpu: 8000
                ram: 17179869184
    "#;
    let workload_yaml = r#"
    events:
    - timestamp: 3.0
      event_type:
        !CreatePod
          pod:
            metadata:
              name: db
              namespace: prod
            spec:
              resources:
                requests:
                  cpu: 2000
                  ram: 4294967296
              node_selector:
                disk: ssd
    - timestamp: 4.0
      event_type:
        !CreatePod
          pod:
            metadata:
              name: pinned
              namespace: prod
            spec:
              node_name: hdd_node
              resources:
                requests:
                  cpu: 1000
                  ram: 1073741824
    "#;
    let mut cluster: GenericClusterTrace = serde_yaml::from_str(cluster_yaml).unwrap();
    let mut workload: GenericWorkloadTrace = serde_yaml::from_str(workload_yaml).unwrap();

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        Arc::new(Mutex::new(MetricsCollector::new())),
    )
    .unwrap();

    assert_eq!(
        placements(&[("prod/db", "ssd_node"), ("prod/pinned", "hdd_node")]),
        result.placements
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = default_test_config();
    config.scheduling_cycle_interval = 0.0;
    assert!(replay_scheduling(
        &config,
        &mut GenericClusterTrace::default(),
        &mut GenericWorkloadTrace::default(),
        Arc::new(Mutex::new(MetricsCollector::new())),
    )
    .is_err());
}

#[test]
fn test_idle_gap_does_not_spin_cycles() {
    // Epoch-like timestamps, the queue is empty for almost the whole gap.
    let mut cluster = cluster_trace(vec![(0.0, Node::new("node_1".to_string(), 4000, 8 * GIB))]);
    let mut workload = workload_trace(vec![
        (1.0, Pod::new("pod_1".to_string(), 1000, GIB)),
        (1_000_000_000.0, Pod::new("pod_2".to_string(), 1000, GIB)),
    ]);

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        Arc::new(Mutex::new(MetricsCollector::new())),
    )
    .unwrap();

    assert_eq!(
        placements(&[("pod_1", "node_1"), ("pod_2", "node_1")]),
        result.placements
    );
    // one cycle at 10.0 and one right at the second pod's arrival
    assert_eq!(2, result.scheduling_cycles);
}

#[test]
fn test_non_finite_timestamp_is_rejected() {
    let mut cluster = cluster_trace(vec![(0.0, Node::new("node_1".to_string(), 4000, 8 * GIB))]);
    let mut workload = workload_trace(vec![(f64::INFINITY, Pod::new("pod_1".to_string(), 1000, GIB))]);

    let result = replay_scheduling(
        &default_test_config(),
        &mut cluster,
        &mut workload,
        Arc::new(Mutex::new(MetricsCollector::new())),
    );
    assert!(matches!(result, Err(ReplayError::NonFiniteTimestamp(ts)) if ts == f64::INFINITY));
}
