pub mod cache;
pub mod extender;
pub mod generic_scheduler;
pub mod interface;
pub mod kube_scheduler;
pub mod metadata;
pub mod parallelize;
pub mod plugin;
pub mod predicates;
pub mod priorities;
pub mod scheduler;
