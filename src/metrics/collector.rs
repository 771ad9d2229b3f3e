//! Implements centralized storage for metrics. The scheduler driver, the instrumented
//! algorithm and the instrumented balancer report here.

use average::{concatenate, Estimate, Max, Mean, Min, Variance};

concatenate!(
    Estimator,
    [Min, min],
    [Max, max],
    [Mean, mean],
    [Variance, population_variance]
);

#[derive(Debug, Default)]
pub struct EstimatorWrapper {
    estimator: Estimator,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("mean", &self.mean)
            .field("population_variance", &self.population_variance)
            .finish()
    }
}

impl EstimatorWrapper {
    pub fn new() -> Self {
        Self {
            estimator: Estimator::new(),
        }
    }

    pub fn add(&mut self, value: f64) {
        self.estimator.add(value);
    }

    pub fn len(&self) -> u64 {
        self.estimator.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min(&self) -> f64 {
        self.estimator.min()
    }

    pub fn max(&self) -> f64 {
        self.estimator.max()
    }

    pub fn mean(&self) -> f64 {
        self.estimator.mean()
    }

    pub fn population_variance(&self) -> f64 {
        self.estimator.population_variance()
    }
}

impl PartialEq for EstimatorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.min() == other.min()
            && self.max() == other.max()
            && self.mean() == other.mean()
            && self.population_variance() == other.population_variance()
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    /// The number of created nodes in replayed trace. Calculated before replay starts.
    pub total_nodes_in_trace: u64,
    /// The number of created pods in replayed trace. Calculated before replay starts.
    pub total_pods_in_trace: u64,

    /// Scheduling attempts that returned a node.
    pub pods_scheduled: u64,
    /// Scheduling attempts that failed because no node fits the pod.
    pub pods_unschedulable: u64,
    /// Scheduling attempts aborted by an error other than a fit error.
    pub scheduling_errors: u64,
    /// Pods still waiting in the scheduling queue when replay finished.
    pub pods_left_in_queue: u64,

    /// Successful endpoint selections.
    pub endpoints_selected: u64,
    /// Endpoint selections failed because of a missing service or empty endpoint list.
    pub endpoint_lookup_failures: u64,

    /// Estimations for the wall time spent in the scheduling algorithm per attempt.
    pub scheduling_algorithm_latency_stats: EstimatorWrapper,

    /// Estimations for the time a pod spent between it was firstly pushed to the scheduling
    /// queue and its successful placement, counting requeues of unschedulable pods.
    pub pod_queue_time_stats: EstimatorWrapper,

    /// Estimations for the number of attempts a pod needed to be placed.
    pub pod_scheduling_attempts_stats: EstimatorWrapper,

    /// Estimations for the wall time spent selecting an endpoint.
    pub endpoint_selection_latency_stats: EstimatorWrapper,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment_scheduling_algorithm_latency(&mut self, value: f64) {
        self.scheduling_algorithm_latency_stats.add(value);
    }

    pub fn increment_pod_queue_time(&mut self, value: f64) {
        self.pod_queue_time_stats.add(value);
    }

    pub fn increment_pod_scheduling_attempts(&mut self, attempts: usize) {
        self.pod_scheduling_attempts_stats.add(attempts as f64);
    }

    pub fn increment_endpoint_selection_latency(&mut self, value: f64) {
        self.endpoint_selection_latency_stats.add(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_wrapper() {
        let mut stats = EstimatorWrapper::new();
        assert!(stats.is_empty());
        for value in [1.0, 2.0, 3.0] {
            stats.add(value);
        }
        assert_eq!(3, stats.len());
        assert_eq!(1.0, stats.min());
        assert_eq!(3.0, stats.max());
        assert_eq!(2.0, stats.mean());
    }
}
