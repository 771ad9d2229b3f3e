//! Round-robin load balancer with client IP session affinity.
//!
//! All services, their endpoint lists, rotation indices and affinity maps sit behind one
//! mutex. Every operation takes it for the duration of a single in-memory update and never
//! performs I/O while holding it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::proxy::clock::{Clock, SystemClock};
use crate::proxy::types::{join_host_port, Endpoints, ServicePortName, SessionAffinityType};

pub const DEFAULT_AFFINITY_TTL_MINUTES: u64 = 180;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    #[error("missing service entry for {0}")]
    MissingServiceEntry(ServicePortName),
    #[error("missing endpoints for {0}")]
    MissingEndpoints(ServicePortName),
    #[error("malformed source address for {0}: session affinity needs a client ip")]
    MalformedSourceAddress(ServicePortName),
}

pub trait LoadBalancer: Send + Sync {
    /// Registers a service port. For an already known one only the affinity type changes.
    fn new_service(
        &self,
        svc_port: &ServicePortName,
        affinity_type: SessionAffinityType,
        ttl_minutes: u64,
    );

    /// Picks the endpoint ("ip:port") serving a new connection from `src_addr`.
    fn next_endpoint(
        &self,
        svc_port: &ServicePortName,
        src_addr: Option<SocketAddr>,
        reset_affinity: bool,
    ) -> Result<String, BalancerError>;

    /// Reconciles against a complete endpoints snapshot of all services.
    fn on_endpoints_update(&self, all_endpoints: &[Endpoints]);

    /// Drops affinity entries idle for at least the service's TTL.
    fn cleanup_stale_sticky_sessions(&self, svc_port: &ServicePortName);

    fn service_has_endpoints(&self, svc_port: &ServicePortName) -> bool;

    fn delete_service(&self, svc_port: &ServicePortName);
}

#[derive(Debug, Clone)]
struct AffinityState {
    endpoint: String,
    last_used: Instant,
}

#[derive(Debug)]
struct AffinityPolicy {
    affinity_type: SessionAffinityType,
    affinity_map: HashMap<IpAddr, AffinityState>,
    ttl_minutes: u64,
}

impl AffinityPolicy {
    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

#[derive(Debug)]
struct BalancerState {
    endpoints: Vec<String>,
    index: usize,
    affinity: AffinityPolicy,
}

struct Inner {
    services: HashMap<ServicePortName, BalancerState>,
    rng: StdRng,
}

/// Read-only view of one service port, for inspection and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub endpoints: Vec<String>,
    pub index: usize,
    pub affinity_type: SessionAffinityType,
    pub ttl_minutes: u64,
    pub sticky_sessions: BTreeMap<IpAddr, String>,
}

pub struct LoadBalancerRR {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    default_ttl_minutes: u64,
}

impl LoadBalancerRR {
    pub fn new(rng: StdRng) -> Self {
        Self::with_clock(rng, Arc::new(SystemClock))
    }

    pub fn with_clock(rng: StdRng, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                services: HashMap::new(),
                rng,
            }),
            clock,
            default_ttl_minutes: DEFAULT_AFFINITY_TTL_MINUTES,
        }
    }

    /// TTL used for services registered with a TTL of zero.
    pub fn with_default_ttl_minutes(mut self, ttl_minutes: u64) -> Self {
        if ttl_minutes > 0 {
            self.default_ttl_minutes = ttl_minutes;
        }
        self
    }

    pub fn service_snapshot(&self, svc_port: &ServicePortName) -> Option<ServiceSnapshot> {
        let inner = self.inner.lock();
        inner.services.get(svc_port).map(|state| ServiceSnapshot {
            endpoints: state.endpoints.clone(),
            index: state.index,
            affinity_type: state.affinity.affinity_type,
            ttl_minutes: state.affinity.ttl_minutes,
            sticky_sessions: state
                .affinity
                .affinity_map
                .iter()
                .map(|(ip, affinity)| (*ip, affinity.endpoint.clone()))
                .collect(),
        })
    }

    pub fn services(&self) -> Vec<ServicePortName> {
        let mut services: Vec<ServicePortName> =
            self.inner.lock().services.keys().cloned().collect();
        services.sort();
        services
    }

    fn new_service_internal<'a>(
        services: &'a mut HashMap<ServicePortName, BalancerState>,
        svc_port: &ServicePortName,
        affinity_type: Option<SessionAffinityType>,
        ttl_minutes: u64,
        default_ttl_minutes: u64,
    ) -> &'a mut BalancerState {
        let ttl_minutes = if ttl_minutes == 0 {
            default_ttl_minutes
        } else {
            ttl_minutes
        };
        let state = services.entry(svc_port.clone()).or_insert_with(|| {
            info!("LoadBalancerRR service {:?} did not exist, created", svc_port.to_string());
            BalancerState {
                endpoints: Vec::new(),
                index: 0,
                affinity: AffinityPolicy {
                    affinity_type: affinity_type.unwrap_or_default(),
                    affinity_map: HashMap::new(),
                    ttl_minutes,
                },
            }
        });
        if let Some(affinity_type) = affinity_type {
            state.affinity.affinity_type = affinity_type;
        }
        state
    }
}

/// Groups valid "ip:port" endpoints of a snapshot by service port.
fn build_ports_to_endpoints(endpoints: &Endpoints) -> BTreeMap<String, Vec<String>> {
    let mut ports_to_endpoints: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for subset in endpoints.subsets.iter() {
        for port in subset.ports.iter() {
            for address in subset.addresses.iter() {
                if address.ip.is_empty() || port.port == 0 {
                    debug!(
                        "Skipping invalid endpoint {:?}:{} of {:?}",
                        address.ip,
                        port.port,
                        endpoints.metadata.key()
                    );
                    continue;
                }
                ports_to_endpoints
                    .entry(port.name.clone())
                    .or_default()
                    .push(join_host_port(&address.ip, port.port));
            }
        }
    }
    ports_to_endpoints
}

/// Same endpoints regardless of order.
fn endpoints_equivalent(current: &[String], new: &[String]) -> bool {
    if current.len() != new.len() {
        return false;
    }
    let mut current = current.to_vec();
    let mut new = new.to_vec();
    current.sort();
    new.sort();
    current == new
}

impl LoadBalancer for LoadBalancerRR {
    fn new_service(
        &self,
        svc_port: &ServicePortName,
        affinity_type: SessionAffinityType,
        ttl_minutes: u64,
    ) {
        debug!("LoadBalancerRR new service {:?}", svc_port.to_string());
        let mut inner = self.inner.lock();
        Self::new_service_internal(
            &mut inner.services,
            svc_port,
            Some(affinity_type),
            ttl_minutes,
            self.default_ttl_minutes,
        );
    }

    fn next_endpoint(
        &self,
        svc_port: &ServicePortName,
        src_addr: Option<SocketAddr>,
        reset_affinity: bool,
    ) -> Result<String, BalancerError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let state = inner
            .services
            .get_mut(svc_port)
            .ok_or_else(|| BalancerError::MissingServiceEntry(svc_port.clone()))?;
        if state.endpoints.is_empty() {
            return Err(BalancerError::MissingEndpoints(svc_port.clone()));
        }

        let client_ip = match state.affinity.affinity_type {
            SessionAffinityType::ClientIP => Some(
                src_addr
                    .ok_or_else(|| BalancerError::MalformedSourceAddress(svc_port.clone()))?
                    .ip(),
            ),
            SessionAffinityType::None => None,
        };

        if let Some(ip) = client_ip {
            if !reset_affinity {
                let ttl = state.affinity.ttl();
                if let Some(sticky) = state.affinity.affinity_map.get_mut(&ip) {
                    if now.saturating_duration_since(sticky.last_used) < ttl {
                        sticky.last_used = now;
                        debug!(
                            "NextEndpoint for service {:?} from IP {} with sessionAffinity {:?}",
                            svc_port.to_string(),
                            ip,
                            sticky.endpoint
                        );
                        return Ok(sticky.endpoint.clone());
                    }
                }
            }
        }

        let endpoint = state.endpoints[state.index].clone();
        debug!(
            "NextEndpoint for service {:?}, srcAddr={:?}: endpoints: {:?} (index {})",
            svc_port.to_string(),
            src_addr,
            state.endpoints,
            state.index
        );
        state.index = (state.index + 1) % state.endpoints.len();

        if let Some(ip) = client_ip {
            state.affinity.affinity_map.insert(
                ip,
                AffinityState {
                    endpoint: endpoint.clone(),
                    last_used: now,
                },
            );
            debug!("Updated affinity key {}: endpoint {:?}", ip, endpoint);
        }
        Ok(endpoint)
    }

    fn on_endpoints_update(&self, all_endpoints: &[Endpoints]) {
        let mut inner = self.inner.lock();
        let Inner { services, rng } = &mut *inner;
        let mut registered: HashSet<ServicePortName> = HashSet::new();

        for endpoints in all_endpoints {
            for (port_name, new_endpoints) in build_ports_to_endpoints(endpoints) {
                let svc_port = ServicePortName::new(
                    &endpoints.metadata.namespace,
                    &endpoints.metadata.name,
                    &port_name,
                );
                let unchanged = services
                    .get(&svc_port)
                    .map(|state| endpoints_equivalent(&state.endpoints, &new_endpoints))
                    .unwrap_or(false);
                if !unchanged {
                    info!(
                        "LoadBalancerRR: Setting endpoints for {} to {:?}",
                        svc_port, new_endpoints
                    );
                    // Endpoints may arrive before the service is registered; it then starts
                    // without affinity until new_service sets the type.
                    let state = Self::new_service_internal(
                        services,
                        &svc_port,
                        None,
                        0,
                        self.default_ttl_minutes,
                    );
                    let live: HashSet<&String> = new_endpoints.iter().collect();
                    state.affinity.affinity_map.retain(|ip, affinity| {
                        let keep = live.contains(&affinity.endpoint);
                        if !keep {
                            debug!(
                                "Removing client {} from affinity map of {}: endpoint {:?} is gone",
                                ip, svc_port, affinity.endpoint
                            );
                        }
                        keep
                    });
                    let mut shuffled = new_endpoints.clone();
                    shuffled.shuffle(&mut *rng);
                    state.endpoints = shuffled;
                    state.index = 0;
                }
                registered.insert(svc_port);
            }
        }

        services.retain(|svc_port, _| {
            let keep = registered.contains(svc_port);
            if !keep {
                info!("LoadBalancerRR: Removing endpoints for {}", svc_port);
            }
            keep
        });
    }

    fn cleanup_stale_sticky_sessions(&self, svc_port: &ServicePortName) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(state) = inner.services.get_mut(svc_port) else {
            debug!(
                "Cleanup skipped for unknown service {:?}",
                svc_port.to_string()
            );
            return;
        };
        let ttl = state.affinity.ttl();
        state.affinity.affinity_map.retain(|ip, affinity| {
            let stale = now.saturating_duration_since(affinity.last_used) >= ttl;
            if stale {
                debug!("Removing client {} from affinity map of {}", ip, svc_port);
            }
            !stale
        });
    }

    fn service_has_endpoints(&self, svc_port: &ServicePortName) -> bool {
        self.inner
            .lock()
            .services
            .get(svc_port)
            .map(|state| !state.endpoints.is_empty())
            .unwrap_or(false)
    }

    fn delete_service(&self, svc_port: &ServicePortName) {
        debug!("Deleting service {:?}", svc_port.to_string());
        self.inner.lock().services.remove(svc_port);
    }
}
