//! Endpoint selection for services: round-robin rotation with optional client IP session
//! affinity.

pub mod clock;
pub mod roundrobin;
pub mod types;
