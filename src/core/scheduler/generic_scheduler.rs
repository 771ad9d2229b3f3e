//! Generic scheduling algorithm: filter nodes with fit predicates, score the survivors with
//! weighted priorities, let extenders veto and rescore, and pick one of the best hosts at
//! random.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;

use crate::core::node::Node;
use crate::core::node_info::{NodeInfo, NodeInfoMap};
use crate::core::pod::Pod;
use crate::core::scheduler::extender::SchedulerExtender;
use crate::core::scheduler::interface::{
    AlgorithmError, FailedPredicateMap, FitError, HostPriority, HostPriorityList, NodeInfoSource,
    NodeLister, PodSchedulingAlgorithm, PredicateFailureReason, ScheduleError,
};
use crate::core::scheduler::metadata::{
    DefaultMetadataProducer, PredicateMetadata, PredicateMetadataProducer, PriorityMetadata,
    PriorityMetadataProducer,
};
use crate::core::scheduler::parallelize::parallelize;
use crate::core::scheduler::predicates::FitPredicate;
use crate::core::scheduler::priorities::{Prioritizer, PriorityConfig};

pub const DEFAULT_PARALLELISM: usize = 16;

pub struct GenericScheduler {
    cache: Arc<dyn NodeInfoSource>,
    predicates: Vec<Arc<dyn FitPredicate>>,
    predicate_meta_producer: Arc<dyn PredicateMetadataProducer>,
    priorities: Vec<PriorityConfig>,
    priority_meta_producer: Arc<dyn PriorityMetadataProducer>,
    extenders: Vec<Arc<dyn SchedulerExtender>>,
    parallelism: usize,
    always_check_all_predicates: bool,
    rng: Mutex<StdRng>,
}

impl GenericScheduler {
    pub fn new(
        cache: Arc<dyn NodeInfoSource>,
        predicates: Vec<Arc<dyn FitPredicate>>,
        priorities: Vec<PriorityConfig>,
        rng: StdRng,
    ) -> Self {
        Self {
            cache,
            predicates,
            predicate_meta_producer: Arc::new(DefaultMetadataProducer),
            priorities,
            priority_meta_producer: Arc::new(DefaultMetadataProducer),
            extenders: Vec::new(),
            parallelism: DEFAULT_PARALLELISM,
            always_check_all_predicates: false,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_extenders(mut self, extenders: Vec<Arc<dyn SchedulerExtender>>) -> Self {
        self.extenders = extenders;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_always_check_all_predicates(mut self, always_check_all_predicates: bool) -> Self {
        self.always_check_all_predicates = always_check_all_predicates;
        self
    }

    pub fn with_metadata_producers(
        mut self,
        predicate_meta_producer: Arc<dyn PredicateMetadataProducer>,
        priority_meta_producer: Arc<dyn PriorityMetadataProducer>,
    ) -> Self {
        self.predicate_meta_producer = predicate_meta_producer;
        self.priority_meta_producer = priority_meta_producer;
        self
    }

    pub fn predicates(&self) -> &[Arc<dyn FitPredicate>] {
        &self.predicates
    }

    pub fn priorities(&self) -> &[PriorityConfig] {
        &self.priorities
    }

    /// Applies extender filters to the feasible nodes and extender scores to the internal
    /// priority list. Vetoed nodes are dropped from both and recorded in `failed_predicates`.
    fn run_extenders(
        &self,
        pod: &Pod,
        node_info_map: &NodeInfoMap,
        mut nodes: Vec<Node>,
        mut priority_list: HostPriorityList,
        failed_predicates: &mut FailedPredicateMap,
    ) -> Result<HostPriorityList, ScheduleError> {
        for extender in self.extenders.iter() {
            if nodes.is_empty() {
                break;
            }
            if !extender.is_interested(pod) {
                continue;
            }
            let (kept, extender_failed) =
                extender
                    .filter(pod, &nodes, node_info_map)
                    .map_err(|err| ScheduleError::Extender {
                        extender: extender.name().to_string(),
                        message: err.to_string(),
                    })?;
            let kept: HashSet<String> = kept.into_iter().map(|node| node.metadata.name).collect();
            for node in nodes.iter().filter(|node| !kept.contains(node.name())) {
                if !extender_failed.contains_key(node.name()) {
                    failed_predicates
                        .entry(node.name().to_string())
                        .or_default()
                        .push(PredicateFailureReason::Custom(format!(
                            "node(s) were filtered out by extender {}",
                            extender.name()
                        )));
                }
            }
            for (node_name, reasons) in extender_failed {
                failed_predicates.entry(node_name).or_default().extend(reasons);
            }
            nodes.retain(|node| kept.contains(node.name()));
            priority_list.retain(|host_priority| kept.contains(&host_priority.host));
        }

        for extender in self.extenders.iter() {
            if nodes.is_empty() {
                break;
            }
            if !extender.is_interested(pod) {
                continue;
            }
            let (scores, weight) =
                extender
                    .prioritize(pod, &nodes)
                    .map_err(|err| ScheduleError::Extender {
                        extender: extender.name().to_string(),
                        message: err.to_string(),
                    })?;
            for extender_score in scores {
                if let Some(host_priority) = priority_list
                    .iter_mut()
                    .find(|host_priority| host_priority.host == extender_score.host)
                {
                    // Extender weights are unbounded.
                    host_priority.score = host_priority
                        .score
                        .saturating_add(extender_score.score.saturating_mul(weight));
                }
            }
        }

        Ok(priority_list)
    }
}

impl PodSchedulingAlgorithm for GenericScheduler {
    fn schedule(&self, pod: &Pod, node_lister: &dyn NodeLister) -> Result<String, ScheduleError> {
        let nodes = node_lister.list();
        if nodes.is_empty() {
            return Err(ScheduleError::NoNodesAvailable);
        }

        let node_info_map = self.cache.snapshot();
        let predicate_meta = self.predicate_meta_producer.produce(pod, &node_info_map);
        let (filtered, mut failed_predicates) = find_nodes_that_fit(
            pod,
            &node_info_map,
            &nodes,
            &self.predicates,
            &predicate_meta,
            self.parallelism,
            self.always_check_all_predicates,
        )?;
        debug!(
            "{} of {} nodes fit pod {:?}",
            filtered.len(),
            nodes.len(),
            pod.metadata.key()
        );

        if filtered.is_empty() {
            return Err(FitError {
                pod: pod.clone(),
                failed_predicates,
            }
            .into());
        }
        if filtered.len() == 1 && self.extenders.is_empty() {
            return Ok(filtered[0].metadata.name.clone());
        }

        let priority_meta = self.priority_meta_producer.produce(pod, &node_info_map);
        let priority_list = prioritize_nodes(
            pod,
            &node_info_map,
            &priority_meta,
            &self.priorities,
            &filtered,
            self.parallelism,
        )?;
        let priority_list = self.run_extenders(
            pod,
            &node_info_map,
            filtered,
            priority_list,
            &mut failed_predicates,
        )?;
        if priority_list.is_empty() {
            return Err(FitError {
                pod: pod.clone(),
                failed_predicates,
            }
            .into());
        }

        let mut rng = self.rng.lock();
        select_host(&priority_list, &mut *rng)
    }
}

/// Runs all predicates for one node. Unless `always_check_all` is set, evaluation stops at
/// the first predicate that does not fit.
pub fn pod_fits_on_node(
    pod: &Pod,
    meta: &PredicateMetadata,
    node_info: &NodeInfo,
    predicates: &[Arc<dyn FitPredicate>],
    always_check_all: bool,
) -> Result<(bool, Vec<PredicateFailureReason>), ScheduleError> {
    let mut fits = true;
    let mut failure_reasons = Vec::new();
    for predicate in predicates {
        let (predicate_fits, reasons) =
            predicate
                .fits(pod, meta, node_info)
                .map_err(|source| ScheduleError::Predicate {
                    predicate: predicate.name().to_string(),
                    node: node_info
                        .node()
                        .map(|node| node.metadata.name.clone())
                        .unwrap_or_default(),
                    source,
                })?;
        if !predicate_fits {
            fits = false;
            failure_reasons.extend(reasons);
            if !always_check_all {
                break;
            }
        }
    }
    Ok((fits, failure_reasons))
}

/// Splits `nodes` into those passing every predicate, in their original order, and failure
/// reasons for the rest. Nodes are checked in parallel; any predicate error aborts the search.
pub fn find_nodes_that_fit(
    pod: &Pod,
    node_info_map: &NodeInfoMap,
    nodes: &[Node],
    predicates: &[Arc<dyn FitPredicate>],
    meta: &PredicateMetadata,
    parallelism: usize,
    always_check_all: bool,
) -> Result<(Vec<Node>, FailedPredicateMap), ScheduleError> {
    let mut failed_predicates = FailedPredicateMap::new();
    if predicates.is_empty() {
        return Ok((nodes.to_vec(), failed_predicates));
    }

    // A listed node missing from the snapshot is evaluated without a descriptor, which
    // predicates report as an error.
    let missing = NodeInfo::default();
    let checks = parallelize(parallelism, nodes.len(), |idx| {
        let node_name = nodes[idx].name();
        let node_info = node_info_map
            .get(node_name)
            .map(|node_info| node_info.as_ref())
            .unwrap_or(&missing);
        pod_fits_on_node(pod, meta, node_info, predicates, always_check_all).map_err(
            |err| match err {
                ScheduleError::Predicate {
                    predicate, source, ..
                } => ScheduleError::Predicate {
                    predicate,
                    node: node_name.to_string(),
                    source,
                },
                other => other,
            },
        )
    })?;

    let mut filtered = Vec::new();
    for (node, (fits, reasons)) in nodes.iter().zip(checks) {
        if fits {
            filtered.push(node.clone());
        } else {
            failed_predicates.insert(node.metadata.name.clone(), reasons);
        }
    }
    Ok((filtered, failed_predicates))
}

/// Scores every node with every priority config and sums `score * weight` per node.
///
/// Map functions run per node in parallel, whole-list functions run once, and reduce
/// functions run once per config after all maps finished. The result follows the order of
/// `nodes`. Without any configs every node gets the same score of 1.
pub fn prioritize_nodes(
    pod: &Pod,
    node_info_map: &NodeInfoMap,
    meta: &PriorityMetadata,
    priorities: &[PriorityConfig],
    nodes: &[Node],
    parallelism: usize,
) -> Result<HostPriorityList, ScheduleError> {
    if priorities.is_empty() {
        return Ok(nodes
            .iter()
            .map(|node| HostPriority::new(node.name(), 1))
            .collect());
    }

    let priority_error = |config: &PriorityConfig, source: AlgorithmError| ScheduleError::Priority {
        priority: config.name.clone(),
        source,
    };

    let mut results: Vec<HostPriorityList> = vec![Vec::new(); priorities.len()];
    for (i, config) in priorities.iter().enumerate() {
        if let Prioritizer::Function(function) = &config.prioritizer {
            results[i] = function
                .prioritize(pod, node_info_map, nodes)
                .map_err(|source| priority_error(config, source))?;
        }
    }

    let missing = NodeInfo::default();
    let mapped = parallelize(
        parallelism,
        nodes.len(),
        |idx| -> Result<Vec<Option<HostPriority>>, ScheduleError> {
            let node_info = node_info_map
                .get(nodes[idx].name())
                .map(|node_info| node_info.as_ref())
                .unwrap_or(&missing);
            priorities
                .iter()
                .map(|config| match &config.prioritizer {
                    Prioritizer::MapReduce { map, .. } => map
                        .map(pod, meta, node_info)
                        .map(Some)
                        .map_err(|source| priority_error(config, source)),
                    Prioritizer::Function(_) => Ok(None),
                })
                .collect()
        },
    )?;
    for node_scores in mapped {
        for (i, score) in node_scores.into_iter().enumerate() {
            if let Some(score) = score {
                results[i].push(score);
            }
        }
    }

    for (i, config) in priorities.iter().enumerate() {
        if let Prioritizer::MapReduce {
            reduce: Some(reduce),
            ..
        } = &config.prioritizer
        {
            reduce
                .reduce(pod, meta, node_info_map, &mut results[i])
                .map_err(|source| priority_error(config, source))?;
        }
    }

    for (config, scores) in priorities.iter().zip(results.iter()) {
        if scores.len() != nodes.len() {
            return Err(priority_error(
                config,
                AlgorithmError::Internal(format!(
                    "{} scores returned for {} nodes",
                    scores.len(),
                    nodes.len()
                )),
            ));
        }
    }

    Ok(nodes
        .iter()
        .enumerate()
        .map(|(j, node)| {
            let score = priorities
                .iter()
                .zip(results.iter())
                .map(|(config, scores)| scores[j].score.saturating_mul(config.weight))
                .fold(0, i64::saturating_add);
            HostPriority::new(node.name(), score)
        })
        .collect())
}

/// Picks uniformly at random among the hosts sharing the highest score.
pub fn select_host<R: Rng + ?Sized>(
    priority_list: &HostPriorityList,
    rng: &mut R,
) -> Result<String, ScheduleError> {
    let max_score = priority_list
        .iter()
        .map(|host_priority| host_priority.score)
        .max()
        .ok_or(ScheduleError::EmptyPriorityList)?;
    let best: Vec<&HostPriority> = priority_list
        .iter()
        .filter(|host_priority| host_priority.score == max_score)
        .collect();
    let ix = rng.gen_range(0..best.len());
    Ok(best[ix].host.clone())
}
