//! Hard constraints: a node failing any predicate is excluded from scheduling.

use crate::core::node::{Node, TaintEffect};
use crate::core::node_info::NodeInfo;
use crate::core::pod::{tolerations_tolerate_taint, Pod};
use crate::core::scheduler::interface::{AlgorithmError, PredicateFailureReason, ResourceName};
use crate::core::scheduler::metadata::PredicateMetadata;

pub const CHECK_NODE_UNSCHEDULABLE: &str = "CheckNodeUnschedulable";
pub const POD_FITS_HOST: &str = "PodFitsHost";
pub const POD_FITS_HOST_PORTS: &str = "PodFitsHostPorts";
pub const MATCH_NODE_SELECTOR: &str = "MatchNodeSelector";
pub const POD_FITS_RESOURCES: &str = "PodFitsResources";
pub const POD_TOLERATES_NODE_TAINTS: &str = "PodToleratesNodeTaints";
pub const GENERAL_PREDICATES: &str = "GeneralPredicates";

/// Whether the node fits and, if not, why.
pub type PredicateResult = Result<(bool, Vec<PredicateFailureReason>), AlgorithmError>;

pub trait FitPredicate: Send + Sync {
    fn name(&self) -> &str;

    fn fits(&self, pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult;
}

/// Predicate backed by a closure.
pub struct PredicateFn<F> {
    name: String,
    predicate: F,
}

impl<F> PredicateFn<F>
where
    F: Fn(&Pod, &PredicateMetadata, &NodeInfo) -> PredicateResult + Send + Sync,
{
    pub fn new(name: &str, predicate: F) -> Self {
        Self {
            name: name.to_string(),
            predicate,
        }
    }
}

impl<F> FitPredicate for PredicateFn<F>
where
    F: Fn(&Pod, &PredicateMetadata, &NodeInfo) -> PredicateResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn fits(&self, pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        (self.predicate)(pod, meta, node_info)
    }
}

fn node_of(node_info: &NodeInfo) -> Result<&Node, AlgorithmError> {
    node_info.node().ok_or(AlgorithmError::NodeNotFound)
}

fn verdict(reasons: Vec<PredicateFailureReason>) -> PredicateResult {
    Ok((reasons.is_empty(), reasons))
}

fn single(fits: bool, reason: PredicateFailureReason) -> PredicateResult {
    if fits {
        Ok((true, Vec::new()))
    } else {
        Ok((false, vec![reason]))
    }
}

pub struct CheckNodeUnschedulable;

impl FitPredicate for CheckNodeUnschedulable {
    fn name(&self) -> &str {
        CHECK_NODE_UNSCHEDULABLE
    }

    fn fits(&self, _pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let node = node_of(node_info)?;
        single(
            !node.spec.unschedulable,
            PredicateFailureReason::NodeUnschedulable,
        )
    }
}

/// Pods with an explicit node name fit only that node.
pub struct PodFitsHost;

impl FitPredicate for PodFitsHost {
    fn name(&self) -> &str {
        POD_FITS_HOST
    }

    fn fits(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let node = node_of(node_info)?;
        let fits = match pod.spec.node_name.as_deref() {
            None | Some("") => true,
            Some(requested) => requested == node.name(),
        };
        single(fits, PredicateFailureReason::HostNameMismatch)
    }
}

pub struct PodFitsHostPorts;

impl FitPredicate for PodFitsHostPorts {
    fn name(&self) -> &str {
        POD_FITS_HOST_PORTS
    }

    fn fits(&self, pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let wanted = meta.pod_ports(pod);
        // Port 0 means "any port" and never conflicts.
        let conflict = wanted
            .iter()
            .any(|port| *port != 0 && node_info.is_port_used(*port));
        single(!conflict, PredicateFailureReason::HostPortsConflict)
    }
}

/// Node selector labels and required node affinity terms.
pub struct MatchNodeSelector;

pub(crate) fn pod_matches_node_labels(pod: &Pod, node: &Node) -> bool {
    let labels = &node.metadata.labels;
    let selector_matches = pod
        .spec
        .node_selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value));
    selector_matches
        && pod
            .node_affinity()
            .map_or(true, |affinity| affinity.required_matches(labels))
}

impl FitPredicate for MatchNodeSelector {
    fn name(&self) -> &str {
        MATCH_NODE_SELECTOR
    }

    fn fits(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let node = node_of(node_info)?;
        single(
            pod_matches_node_labels(pod, node),
            PredicateFailureReason::NodeSelectorMismatch,
        )
    }
}

/// Checks pod count, cpu and memory against node allocatable. Reports every insufficient
/// resource, not only the first one.
pub struct PodFitsResources;

impl FitPredicate for PodFitsResources {
    fn name(&self) -> &str {
        POD_FITS_RESOURCES
    }

    fn fits(&self, pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let node = node_of(node_info)?;
        let mut reasons = Vec::new();

        if let Some(allowed) = node.status.max_pods {
            let pods = node_info.pods().len();
            if pods + 1 > allowed {
                reasons.push(PredicateFailureReason::InsufficientResource {
                    resource: ResourceName::Pods,
                    requested: 1,
                    used: pods as u64,
                    capacity: allowed as u64,
                });
            }
        }

        let request = meta.pod_request(pod);
        if request.is_zero() {
            return verdict(reasons);
        }

        let allocatable = node_info.allocatable();
        let requested = node_info.requested();
        if u64::from(allocatable.cpu) < u64::from(request.cpu) + u64::from(requested.cpu) {
            reasons.push(PredicateFailureReason::InsufficientResource {
                resource: ResourceName::Cpu,
                requested: u64::from(request.cpu),
                used: u64::from(requested.cpu),
                capacity: u64::from(allocatable.cpu),
            });
        }
        if allocatable.ram < request.ram.saturating_add(requested.ram) {
            reasons.push(PredicateFailureReason::InsufficientResource {
                resource: ResourceName::Memory,
                requested: request.ram,
                used: requested.ram,
                capacity: allocatable.ram,
            });
        }
        verdict(reasons)
    }
}

/// NoSchedule and NoExecute taints must all be tolerated. PreferNoSchedule is left to the
/// TaintToleration priority.
pub struct PodToleratesNodeTaints;

impl FitPredicate for PodToleratesNodeTaints {
    fn name(&self) -> &str {
        POD_TOLERATES_NODE_TAINTS
    }

    fn fits(&self, pod: &Pod, _meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let node = node_of(node_info)?;
        let tolerated = node
            .spec
            .taints
            .iter()
            .filter(|taint| taint.effect != TaintEffect::PreferNoSchedule)
            .all(|taint| tolerations_tolerate_taint(&pod.spec.tolerations, taint));
        single(tolerated, PredicateFailureReason::TaintsNotTolerated)
    }
}

/// Resources, host name, host ports and node selector in one pass, accumulating reasons of
/// all of them.
pub struct GeneralPredicates;

impl FitPredicate for GeneralPredicates {
    fn name(&self) -> &str {
        GENERAL_PREDICATES
    }

    fn fits(&self, pod: &Pod, meta: &PredicateMetadata, node_info: &NodeInfo) -> PredicateResult {
        let parts: [&dyn FitPredicate; 4] = [
            &PodFitsResources,
            &PodFitsHost,
            &PodFitsHostPorts,
            &MatchNodeSelector,
        ];
        let mut reasons = Vec::new();
        for predicate in parts {
            let (_, part_reasons) = predicate.fits(pod, meta, node_info)?;
            reasons.extend(part_reasons);
        }
        verdict(reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::Taint;
    use crate::core::pod::{NodeAffinity, NodeSelectorOperator, NodeSelectorRequirement, NodeSelectorTerm, Toleration};

    fn node_info_with(node: Node, pods: Vec<Pod>) -> NodeInfo {
        NodeInfo::with_pods(node, pods)
    }

    fn check(predicate: &dyn FitPredicate, pod: &Pod, node_info: &NodeInfo) -> (bool, Vec<PredicateFailureReason>) {
        predicate
            .fits(pod, &PredicateMetadata::default(), node_info)
            .unwrap()
    }

    #[test]
    fn test_missing_node_is_an_error() {
        let pod = Pod::new("pod".to_string(), 1, 1);
        let node_info = NodeInfo::default();
        assert_eq!(
            Err(AlgorithmError::NodeNotFound),
            PodFitsResources.fits(&pod, &PredicateMetadata::default(), &node_info)
        );
    }

    #[test]
    fn test_pod_fits_resources() {
        let node = Node::new("node".to_string(), 4000, 16000);
        let node_info = node_info_with(node, vec![Pod::new("running".to_string(), 3000, 8000)]);

        let fitting = Pod::new("fitting".to_string(), 1000, 8000);
        assert_eq!((true, vec![]), check(&PodFitsResources, &fitting, &node_info));

        let too_big = Pod::new("too_big".to_string(), 2000, 9000);
        let (fits, reasons) = check(&PodFitsResources, &too_big, &node_info);
        assert!(!fits);
        assert_eq!(
            vec![
                PredicateFailureReason::InsufficientResource {
                    resource: ResourceName::Cpu,
                    requested: 2000,
                    used: 3000,
                    capacity: 4000,
                },
                PredicateFailureReason::InsufficientResource {
                    resource: ResourceName::Memory,
                    requested: 9000,
                    used: 8000,
                    capacity: 16000,
                },
            ],
            reasons
        );
    }

    #[test]
    fn test_pod_count_limit_applies_to_zero_request_pods() {
        let mut node = Node::new("node".to_string(), 4000, 16000);
        node.status.max_pods = Some(1);
        let node_info = node_info_with(node, vec![Pod::new("running".to_string(), 0, 0)]);

        let (fits, reasons) = check(&PodFitsResources, &Pod::new("pod".to_string(), 0, 0), &node_info);
        assert!(!fits);
        assert!(matches!(
            reasons[0],
            PredicateFailureReason::InsufficientResource {
                resource: ResourceName::Pods,
                ..
            }
        ));
    }

    #[test]
    fn test_pod_fits_host() {
        let node_info = NodeInfo::new(Node::new("node_1".to_string(), 1, 1));
        let mut pod = Pod::new("pod".to_string(), 1, 1);
        assert!(check(&PodFitsHost, &pod, &node_info).0);
        pod.spec.node_name = Some("node_2".to_string());
        assert_eq!(
            (false, vec![PredicateFailureReason::HostNameMismatch]),
            check(&PodFitsHost, &pod, &node_info)
        );
        pod.spec.node_name = Some("node_1".to_string());
        assert!(check(&PodFitsHost, &pod, &node_info).0);
    }

    #[test]
    fn test_pod_fits_host_ports() {
        let mut running = Pod::new("running".to_string(), 1, 1);
        running.spec.host_ports = vec![8080];
        let node_info = node_info_with(Node::new("node".to_string(), 10, 10), vec![running]);

        let mut pod = Pod::new("pod".to_string(), 1, 1);
        pod.spec.host_ports = vec![0, 9090];
        assert!(check(&PodFitsHostPorts, &pod, &node_info).0);
        pod.spec.host_ports = vec![8080];
        assert!(!check(&PodFitsHostPorts, &pod, &node_info).0);
    }

    #[test]
    fn test_match_node_selector_and_affinity() {
        let mut node = Node::new("node".to_string(), 1, 1);
        node.metadata
            .labels
            .insert("zone".to_string(), "a".to_string());
        let node_info = NodeInfo::new(node);

        let mut pod = Pod::new("pod".to_string(), 1, 1);
        pod.spec
            .node_selector
            .insert("zone".to_string(), "a".to_string());
        assert!(check(&MatchNodeSelector, &pod, &node_info).0);

        pod.spec.affinity = Some(NodeAffinity {
            required_during_scheduling: vec![NodeSelectorTerm {
                match_expressions: vec![NodeSelectorRequirement {
                    key: "zone".to_string(),
                    operator: NodeSelectorOperator::In,
                    values: vec!["b".to_string()],
                }],
            }],
            preferred_during_scheduling: vec![],
        });
        assert_eq!(
            (false, vec![PredicateFailureReason::NodeSelectorMismatch]),
            check(&MatchNodeSelector, &pod, &node_info)
        );
    }

    #[test]
    fn test_taints_and_tolerations() {
        let mut node = Node::new("node".to_string(), 1, 1);
        node.spec.taints = vec![
            Taint {
                key: "dedicated".to_string(),
                value: "gpu".to_string(),
                effect: TaintEffect::NoSchedule,
            },
            Taint {
                key: "flaky".to_string(),
                value: String::new(),
                effect: TaintEffect::PreferNoSchedule,
            },
        ];
        let node_info = NodeInfo::new(node);

        let mut pod = Pod::new("pod".to_string(), 1, 1);
        assert!(!check(&PodToleratesNodeTaints, &pod, &node_info).0);

        pod.spec.tolerations = vec![Toleration {
            key: "dedicated".to_string(),
            value: "gpu".to_string(),
            ..Default::default()
        }];
        assert!(check(&PodToleratesNodeTaints, &pod, &node_info).0);
    }

    #[test]
    fn test_general_predicates_accumulate_reasons() {
        let node_info = NodeInfo::new(Node::new("node_1".to_string(), 1000, 1000));
        let mut pod = Pod::new("pod".to_string(), 2000, 10);
        pod.spec.node_name = Some("node_2".to_string());

        let (fits, reasons) = check(&GeneralPredicates, &pod, &node_info);
        assert!(!fits);
        assert_eq!(2, reasons.len());
        assert_eq!(PredicateFailureReason::HostNameMismatch, reasons[1]);
    }

    #[test]
    fn test_predicate_fn() {
        let predicate = PredicateFn::new("AlwaysFalse", |_, _, _| {
            Ok((false, vec![PredicateFailureReason::Custom("nope".to_string())]))
        });
        let node_info = NodeInfo::new(Node::new("node".to_string(), 1, 1));
        assert_eq!("AlwaysFalse", predicate.name());
        assert!(!check(&predicate, &Pod::new("pod".to_string(), 1, 1), &node_info).0);
    }
}
