pub mod config;
pub mod core;
pub mod metrics;
pub mod proxy;
pub mod replay;
pub mod test_util;
pub mod trace;
