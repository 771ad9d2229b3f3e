//! Decorators recording latency and outcomes of scheduling and endpoint selection calls.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::Mutex;

use crate::core::pod::Pod;
use crate::core::scheduler::interface::{NodeLister, PodSchedulingAlgorithm, ScheduleError};
use crate::metrics::collector::MetricsCollector;
use crate::proxy::roundrobin::{BalancerError, LoadBalancer};
use crate::proxy::types::{Endpoints, ServicePortName, SessionAffinityType};

pub struct InstrumentedAlgorithm<A> {
    inner: A,
    metrics_collector: Arc<Mutex<MetricsCollector>>,
}

impl<A: PodSchedulingAlgorithm> InstrumentedAlgorithm<A> {
    pub fn new(inner: A, metrics_collector: Arc<Mutex<MetricsCollector>>) -> Self {
        Self {
            inner,
            metrics_collector,
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: PodSchedulingAlgorithm> PodSchedulingAlgorithm for InstrumentedAlgorithm<A> {
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String, ScheduleError> {
        let start = Instant::now();
        let result = self.inner.schedule(pod, node_lister);
        let elapsed = start.elapsed().as_secs_f64();

        let mut metrics = self.metrics_collector.lock();
        metrics.increment_scheduling_algorithm_latency(elapsed);
        match &result {
            Ok(_) => metrics.pods_scheduled += 1,
            Err(err) if err.is_fit_error() => metrics.pods_unschedulable += 1,
            Err(_) => metrics.scheduling_errors += 1,
        }
        debug!(
            "Scheduling attempt for pod {:?} took {:.6}s",
            pod.metadata.key(),
            elapsed
        );
        result
    }
}

pub struct InstrumentedBalancer<B> {
    inner: B,
    metrics_collector: Arc<Mutex<MetricsCollector>>,
}

impl<B: LoadBalancer> InstrumentedBalancer<B> {
    pub fn new(inner: B, metrics_collector: Arc<Mutex<MetricsCollector>>) -> Self {
        Self {
            inner,
            metrics_collector,
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: LoadBalancer> LoadBalancer for InstrumentedBalancer<B> {
    fn new_service(
        &self,
        svc_port: &ServicePortName,
        affinity_type: SessionAffinityType,
        ttl_minutes: u64,
    ) {
        self.inner.new_service(svc_port, affinity_type, ttl_minutes)
    }

    fn next_endpoint(
        &self,
        svc_port: &ServicePortName,
        src_addr: Option<SocketAddr>,
        reset_affinity: bool,
    ) -> Result<String, BalancerError> {
        let start = Instant::now();
        let result = self.inner.next_endpoint(svc_port, src_addr, reset_affinity);
        let elapsed = start.elapsed().as_secs_f64();

        let mut metrics = self.metrics_collector.lock();
        metrics.increment_endpoint_selection_latency(elapsed);
        match &result {
            Ok(_) => metrics.endpoints_selected += 1,
            Err(_) => metrics.endpoint_lookup_failures += 1,
        }
        result
    }

    fn on_endpoints_update(&self, all_endpoints: &[Endpoints]) {
        self.inner.on_endpoints_update(all_endpoints)
    }

    fn cleanup_stale_sticky_sessions(&self, svc_port: &ServicePortName) {
        self.inner.cleanup_stale_sticky_sessions(svc_port)
    }

    fn service_has_endpoints(&self, svc_port: &ServicePortName) -> bool {
        self.inner.service_has_endpoints(svc_port)
    }

    fn delete_service(&self, svc_port: &ServicePortName) {
        self.inner.delete_service(svc_port)
    }
}
