//! Service and endpoint descriptors consumed by the load balancer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::common::ObjectMeta;

/// Identifies one named port of a service.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServicePortName {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub port: String,
}

impl ServicePortName {
    pub fn new(namespace: &str, name: &str, port: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port: port.to_string(),
        }
    }
}

impl fmt::Display for ServicePortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum SessionAffinityType {
    #[default]
    None,
    ClientIP,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointAddress {
    pub ip: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointPort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

/// Addresses sharing the same set of ports.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Vec<EndpointAddress>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

/// Full endpoint snapshot of one service.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Endpoints {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subsets: Vec<EndpointSubset>,
}

impl Endpoints {
    pub fn new(namespace: &str, name: &str, subsets: Vec<EndpointSubset>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            subsets,
        }
    }
}

/// "ip:port", with IPv6 addresses bracketed.
pub fn join_host_port(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_port_name_display() {
        assert_eq!(
            "testnamespace/foo:p",
            ServicePortName::new("testnamespace", "foo", "p").to_string()
        );
        assert_eq!("/foo:", ServicePortName::new("", "foo", "").to_string());
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!("10.0.0.1:80", join_host_port("10.0.0.1", 80));
        assert_eq!("[fd00::1]:443", join_host_port("fd00::1", 443));
    }
}
