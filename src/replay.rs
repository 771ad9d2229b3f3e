//! Replays traces through the scheduler and the load balancer and collects their metrics.
//!
//! Scheduling replay merges cluster and workload events by timestamp and runs a scheduling
//! cycle every `scheduling_cycle_interval` seconds of trace time. Balancing replay drives a
//! manual clock with event timestamps, so session affinity expiry follows trace time.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::config::{ConfigError, SchedulerConfig};
use crate::core::scheduler::cache::SchedulerCache;
use crate::core::scheduler::kube_scheduler::KubeScheduler;
use crate::core::scheduler::scheduler::Scheduler;
use crate::metrics::collector::MetricsCollector;
use crate::metrics::instrumented::{InstrumentedAlgorithm, InstrumentedBalancer};
use crate::proxy::clock::ManualClock;
use crate::proxy::roundrobin::{LoadBalancer, LoadBalancerRR};
use crate::proxy::types::ServicePortName;
use crate::trace::interface::{BalancingEvent, SchedulingEvent, Trace};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trace event has non-finite timestamp {0}")]
    NonFiniteTimestamp(f64),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulingReplayResult {
    /// Final node of every pod placed during replay and not removed afterwards.
    pub placements: BTreeMap<String, String>,
    /// Pods still waiting in the queue, with the last scheduling failure.
    pub unschedulable: BTreeMap<String, String>,
    pub scheduling_cycles: usize,
}

/// Rejects infinite and NaN timestamps, then sorts events by time.
fn sort_by_timestamp<E>(events: &mut [(f64, E)]) -> Result<(), ReplayError> {
    if let Some((timestamp, _)) = events.iter().find(|(timestamp, _)| !timestamp.is_finite()) {
        return Err(ReplayError::NonFiniteTimestamp(*timestamp));
    }
    // Stable, so events with equal timestamps keep trace order.
    events.sort_by(|(lhs, _), (rhs, _)| lhs.total_cmp(rhs));
    Ok(())
}

/// First multiple of `interval` at or after `timestamp`, never earlier than `next_cycle`.
fn first_cycle_at_or_after(next_cycle: f64, interval: f64, timestamp: f64) -> f64 {
    let mut cycle = (timestamp / interval).ceil() * interval;
    if cycle < timestamp {
        cycle += interval;
    }
    cycle.max(next_cycle)
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn count_events<E, F: Fn(&E) -> bool>(events: &[(f64, E)], predicate: F) -> u64 {
    events.iter().filter(|(_, event)| predicate(event)).count() as u64
}

/// Runs one cycle, returns the number of placed pods.
fn run_cycle(scheduler: &mut Scheduler, now: f64, result: &mut SchedulingReplayResult) -> usize {
    let cycle = scheduler.run_scheduling_cycle(now);
    result.scheduling_cycles += 1;
    for (pod_key, _) in cycle.placements.iter() {
        result.unschedulable.remove(pod_key);
    }
    result.unschedulable.extend(cycle.unschedulable);
    cycle.placements.len()
}

pub fn replay_scheduling<C, W>(
    config: &SchedulerConfig,
    cluster_trace: &mut C,
    workload_trace: &mut W,
    metrics_collector: Arc<Mutex<MetricsCollector>>,
) -> Result<SchedulingReplayResult, ReplayError>
where
    C: Trace<Event = SchedulingEvent>,
    W: Trace<Event = SchedulingEvent>,
{
    config.validate()?;

    // Cluster events go first, so nodes created at the same time as pods are ready for them.
    let mut events = cluster_trace.convert_to_replay_events();
    events.extend(workload_trace.convert_to_replay_events());
    sort_by_timestamp(&mut events)?;

    {
        let mut metrics = metrics_collector.lock();
        metrics.total_nodes_in_trace =
            count_events(&events, |e| matches!(e, SchedulingEvent::CreateNode(_)));
        metrics.total_pods_in_trace =
            count_events(&events, |e| matches!(e, SchedulingEvent::CreatePod(_)));
    }
    info!("Replaying {} scheduling events", events.len());

    let cache = Arc::new(SchedulerCache::new());
    let algorithm = InstrumentedAlgorithm::new(
        KubeScheduler::from_config(config, cache.clone())?,
        metrics_collector.clone(),
    );
    let mut scheduler = Scheduler::new(cache, Box::new(algorithm), metrics_collector.clone());

    let interval = config.scheduling_cycle_interval;
    let mut next_cycle = interval;
    let mut result = SchedulingReplayResult::default();

    for (timestamp, event) in events {
        if scheduler.queue_len() == 0 && next_cycle < timestamp {
            // Nothing to schedule, skip idle cycles up to the event.
            next_cycle = first_cycle_at_or_after(next_cycle, interval, timestamp);
        }
        while next_cycle < timestamp {
            run_cycle(&mut scheduler, next_cycle, &mut result);
            next_cycle += interval;
        }
        match event {
            SchedulingEvent::CreateNode(node) => {
                info!("Node {:?} created at {}", node.name(), timestamp);
                scheduler.add_node(node);
            }
            SchedulingEvent::RemoveNode(node_name) => {
                if !scheduler.remove_node(&node_name) {
                    warn!("Trace removes unknown node {:?}", node_name);
                }
            }
            SchedulingEvent::CreatePod(pod) => {
                let pod_key = pod.metadata.key();
                if let Err(err) = scheduler.add_pod(pod, timestamp) {
                    warn!("Failed to add pod {:?}: {}", pod_key, err);
                }
            }
            SchedulingEvent::RemovePod(pod_key) => {
                result.unschedulable.remove(&pod_key);
                if let Err(err) = scheduler.remove_pod(&pod_key) {
                    warn!("Failed to remove pod {:?}: {}", pod_key, err);
                }
            }
        }
    }

    // Drain the queue while cycles still make progress.
    loop {
        let placed = run_cycle(&mut scheduler, next_cycle, &mut result);
        next_cycle += interval;
        if placed == 0 || scheduler.queue_len() == 0 {
            break;
        }
    }

    result.placements = scheduler.placements();
    metrics_collector.lock().pods_left_in_queue = scheduler.queue_len() as u64;
    info!(
        "Scheduling replay finished after {} cycles: {} pods placed, {} left in queue",
        result.scheduling_cycles,
        result.placements.len(),
        scheduler.queue_len()
    );
    Ok(result)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOutcome {
    pub timestamp: f64,
    pub service: ServicePortName,
    pub source: Option<SocketAddr>,
    /// Selected endpoint or the error text.
    pub endpoint: Result<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BalancingReplayResult {
    pub connections: Vec<ConnectionOutcome>,
}

fn advance_clock(clock: &ManualClock, now: &mut f64, timestamp: f64) {
    if timestamp > *now {
        clock.advance(Duration::from_secs_f64(timestamp - *now));
        *now = timestamp;
    }
}

pub fn replay_balancing<T>(
    config: &SchedulerConfig,
    trace: &mut T,
    metrics_collector: Arc<Mutex<MetricsCollector>>,
) -> Result<BalancingReplayResult, ReplayError>
where
    T: Trace<Event = BalancingEvent>,
{
    config.validate()?;

    let mut events = trace.convert_to_replay_events();
    sort_by_timestamp(&mut events)?;
    info!("Replaying {} load balancer events", events.len());

    let clock = Arc::new(ManualClock::new());
    let balancer = InstrumentedBalancer::new(
        LoadBalancerRR::with_clock(rng_from_seed(config.seed), clock.clone())
            .with_default_ttl_minutes(config.load_balancer.default_affinity_ttl_minutes),
        metrics_collector,
    );

    let cleanup_interval = config.load_balancer.sticky_session_cleanup_interval;
    let mut next_cleanup = cleanup_interval;
    let mut now = 0.0;
    let mut result = BalancingReplayResult::default();

    for (timestamp, event) in events {
        if let (Some(interval), Some(mut cleanup_at)) = (cleanup_interval, next_cleanup) {
            while cleanup_at <= timestamp {
                advance_clock(&clock, &mut now, cleanup_at);
                for svc_port in balancer.inner().services() {
                    balancer.cleanup_stale_sticky_sessions(&svc_port);
                }
                cleanup_at += interval;
            }
            next_cleanup = Some(cleanup_at);
        }
        advance_clock(&clock, &mut now, timestamp);

        match event {
            BalancingEvent::NewService {
                service,
                session_affinity,
                ttl_minutes,
            } => balancer.new_service(&service, session_affinity, ttl_minutes),
            BalancingEvent::UpdateEndpoints(endpoints) => balancer.on_endpoints_update(&endpoints),
            BalancingEvent::Connect {
                service,
                source,
                reset_affinity,
            } => {
                let endpoint = balancer
                    .next_endpoint(&service, source, reset_affinity)
                    .map_err(|err| {
                        warn!("Connection to {} failed: {}", service, err);
                        err.to_string()
                    });
                result.connections.push(ConnectionOutcome {
                    timestamp,
                    service,
                    source,
                    endpoint,
                });
            }
            BalancingEvent::CleanupStaleSessions(service) => {
                balancer.cleanup_stale_sticky_sessions(&service)
            }
            BalancingEvent::DeleteService(service) => balancer.delete_service(&service),
        }
    }

    info!(
        "Load balancer replay finished: {} connections",
        result.connections.len()
    );
    Ok(result)
}
