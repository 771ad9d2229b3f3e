//! Implementation of scheduler component which is responsible for scheduling pods for nodes.
//!
//! The scheduler keeps a queue of pending pods and the cache of node occupancy. Every
//! scheduling cycle pops all queued pods, runs the scheduling algorithm for each, assumes
//! successful placements into the cache and requeues the pods that could not be placed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::scheduler::cache::{bound_node, CacheError, SchedulerCache};
use crate::core::scheduler::interface::{PodSchedulingAlgorithm, ScheduleError};
use crate::metrics::collector::MetricsCollector;

#[derive(Clone, Debug)]
pub struct QueuedPodInfo {
    /// The time pod was (re)added to the scheduling queue.
    pub timestamp: f64,
    /// Number of schedule attempts made so far.
    pub attempts: usize,
    /// The time when the pod was added to the queue for the first time. It's used to record
    /// the queue time of a pod which may be requeued many times before it is placed.
    pub initial_attempt_timestamp: f64,
    pub pod: Pod,
}

/// Outcome of one scheduling cycle, keyed by pod key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulingCycleResult {
    pub placements: Vec<(String, String)>,
    pub unschedulable: Vec<(String, String)>,
}

pub struct Scheduler {
    cache: Arc<SchedulerCache>,
    scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,

    pod_queue: VecDeque<QueuedPodInfo>,
    /// Pods placed by this scheduler or added already bound, by pod key.
    bound_pods: HashMap<String, Pod>,

    metrics_collector: Arc<Mutex<MetricsCollector>>,
}

impl Scheduler {
    pub fn new(
        cache: Arc<SchedulerCache>,
        scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,
        metrics_collector: Arc<Mutex<MetricsCollector>>,
    ) -> Self {
        Self {
            cache,
            scheduler_algorithm,
            pod_queue: Default::default(),
            bound_pods: Default::default(),
            metrics_collector,
        }
    }

    pub fn cache(&self) -> &Arc<SchedulerCache> {
        &self.cache
    }

    pub fn set_scheduler_algorithm(
        &mut self,
        scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,
    ) {
        self.scheduler_algorithm = scheduler_algorithm
    }

    pub fn add_node(&mut self, node: Node) {
        self.cache.add_node(node);
    }

    pub fn remove_node(&mut self, node_name: &str) -> bool {
        self.cache.remove_node(node_name)
    }

    /// Bound pods are accounted in the cache right away, others wait for the next cycle.
    pub fn add_pod(&mut self, pod: Pod, timestamp: f64) -> Result<(), CacheError> {
        let pod_key = pod.metadata.key();
        if bound_node(&pod).is_some() {
            self.cache.add_pod(pod.clone())?;
            self.bound_pods.insert(pod_key, pod);
            return Ok(());
        }
        debug!("Pod {:?} queued for scheduling", pod_key);
        self.pod_queue.push_back(QueuedPodInfo {
            timestamp,
            attempts: 0,
            initial_attempt_timestamp: timestamp,
            pod,
        });
        Ok(())
    }

    /// Drops a pending pod from the queue or releases a bound pod's resources.
    pub fn remove_pod(&mut self, pod_key: &str) -> Result<(), CacheError> {
        if let Some(pos) = self
            .pod_queue
            .iter()
            .position(|queued| queued.pod.metadata.key() == pod_key)
        {
            self.pod_queue.remove(pos);
            return Ok(());
        }
        let pod = self
            .bound_pods
            .remove(pod_key)
            .ok_or_else(|| CacheError::PodNotFound(pod_key.to_string()))?;
        self.cache.remove_pod(&pod)
    }

    pub fn queue_len(&self) -> usize {
        self.pod_queue.len()
    }

    pub fn assigned_node(&self, pod_key: &str) -> Option<&str> {
        self.bound_pods.get(pod_key).and_then(bound_node)
    }

    /// Node of every bound pod, by pod key.
    pub fn placements(&self) -> BTreeMap<String, String> {
        self.bound_pods
            .iter()
            .filter_map(|(pod_key, pod)| {
                bound_node(pod).map(|node_name| (pod_key.clone(), node_name.to_string()))
            })
            .collect()
    }

    pub fn schedule_one(&self, pod: &Pod) -> Result<String, ScheduleError> {
        self.scheduler_algorithm.schedule(pod, self.cache.as_ref())
    }

    pub fn run_scheduling_cycle(&mut self, now: f64) -> SchedulingCycleResult {
        let mut result = SchedulingCycleResult::default();
        let mut unscheduled_queue: VecDeque<QueuedPodInfo> = Default::default();

        while let Some(mut queued) = self.pod_queue.pop_front() {
            queued.attempts += 1;
            let pod_key = queued.pod.metadata.key();
            let assigned_node = match self.schedule_one(&queued.pod) {
                Ok(assigned_node) => assigned_node,
                Err(err) => {
                    if err.is_fit_error() {
                        warn!("Pod {:?} is unschedulable: {}", pod_key, err);
                    } else {
                        warn!("Failed to schedule pod {:?}: {}", pod_key, err);
                    }
                    result.unschedulable.push((pod_key, err.to_string()));
                    queued.timestamp = now;
                    unscheduled_queue.push_back(queued);
                    continue;
                }
            };

            self.cache.assume_pod(&queued.pod, &assigned_node);
            info!(
                "Pod {:?} has been assigned a Node {:?}",
                pod_key, assigned_node
            );
            {
                let mut metrics = self.metrics_collector.lock();
                metrics.increment_pod_queue_time(now - queued.initial_attempt_timestamp);
                metrics.increment_pod_scheduling_attempts(queued.attempts);
            }

            let mut pod = queued.pod;
            pod.status.assigned_node = assigned_node.clone();
            self.bound_pods.insert(pod_key.clone(), pod);
            result.placements.push((pod_key, assigned_node));
        }

        self.pod_queue = unscheduled_queue;
        result
    }
}
