//! The data model alignment operates on: in-flight test bundles, raw
//! alerts, and the aligned bundles the oracles consume.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use nidsfuzz_rules::Rule;

pub type Endpoint = (IpAddr, u16);

/// Emitted by injection, consumed by alignment.
#[derive(Debug, Clone)]
pub struct TestBundle {
    pub rules: Vec<Arc<Rule>>,
    pub initiator_endpoint: Endpoint,
    pub responder_endpoint: Endpoint,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

impl TestBundle {
    /// Identity for alignment: the initiator's tuned-channel port, unique
    /// within the port reorder window.
    pub fn port(&self) -> u16 {
        self.initiator_endpoint.1
    }
}

/// `(rule_id, src_ip, src_port, dst_ip, dst_port)`, parsed from one NIDS
/// log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub rule_id: String,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl Alert {
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        ((self.src_ip, self.src_port), (self.dst_ip, self.dst_port))
    }
}

/// Created when a TestBundle leaves the in-flight queue; accumulates
/// per-platform alerts until the reorder window slides past it.
#[derive(Debug, Clone)]
pub struct AlignedBundle {
    test_bundle: TestBundle,
    per_platform_alerts: HashMap<String, Vec<Alert>>,
}

impl AlignedBundle {
    pub fn new(test_bundle: TestBundle) -> AlignedBundle {
        AlignedBundle {
            test_bundle,
            per_platform_alerts: HashMap::new(),
        }
    }

    pub fn test_bundle(&self) -> &TestBundle {
        &self.test_bundle
    }

    pub fn per_platform_alerts(&self) -> &HashMap<String, Vec<Alert>> {
        &self.per_platform_alerts
    }

    pub fn port(&self) -> u16 {
        self.test_bundle.port()
    }

    pub fn add_alert(&mut self, platform: &str, alert: Alert) {
        self.per_platform_alerts.entry(platform.to_string()).or_default().push(alert);
    }

    /// Ensures `platform` has an entry even if it never alerts on this
    /// bundle, so a silent platform still participates in the consistency
    /// oracle's comparison instead of being invisible to it.
    pub fn seed_platform(&mut self, platform: &str) {
        self.per_platform_alerts.entry(platform.to_string()).or_default();
    }

    pub fn input_rule_ids(&self) -> Vec<String> {
        self.test_bundle.rules.iter().map(|r| r.id()).collect()
    }
}
