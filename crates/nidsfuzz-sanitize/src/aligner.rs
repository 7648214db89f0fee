//! Windowed, port-keyed alignment of NIDS alerts back to the test bundle
//! that produced them, plus the oracle pass run on bundles that fall out of
//! the window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use nidsfuzz_inject::PortAllocator;

use crate::bundle::{Alert, AlignedBundle, Endpoint, TestBundle};
use crate::oracle::{Finding, OracleRegistry};

const DEFAULT_LAG_SIZE: usize = 5;

pub struct Aligner {
    in_flight: VecDeque<TestBundle>,
    fifos: HashMap<String, Arc<Mutex<VecDeque<Alert>>>>,
    aligned_window: VecDeque<AlignedBundle>,
    window_size: usize,
    lag_size: usize,
    oracles: OracleRegistry,
}

impl Aligner {
    pub fn new(fifos: HashMap<String, Arc<Mutex<VecDeque<Alert>>>>, window_size: usize) -> Aligner {
        Aligner {
            in_flight: VecDeque::new(),
            fifos,
            aligned_window: VecDeque::new(),
            window_size,
            lag_size: DEFAULT_LAG_SIZE,
            oracles: OracleRegistry::standard(),
        }
    }

    pub fn submit(&mut self, bundle: TestBundle) {
        self.in_flight.push_back(bundle);
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Drains the in-flight queue down to `lag_size`, per §4.9.
    pub async fn validate(&mut self, port_allocator: &PortAllocator) -> Vec<(AlignedBundle, Finding)> {
        let mut findings = Vec::new();
        while self.in_flight.len() > self.lag_size {
            self.sanitize_one(port_allocator, &mut findings).await;
        }
        findings
    }

    /// Drains everything: in-flight queue and the aligned window, run at
    /// fuzz-loop shutdown.
    pub async fn finalize(&mut self, port_allocator: &PortAllocator) -> Vec<(AlignedBundle, Finding)> {
        let mut findings = Vec::new();
        while !self.in_flight.is_empty() {
            self.sanitize_one(port_allocator, &mut findings).await;
        }
        while let Some(oldest) = self.aligned_window.pop_front() {
            for finding in self.oracles.run(&oldest) {
                findings.push((oldest.clone(), finding));
            }
        }
        debug_assert!(self.in_flight.is_empty());
        for fifo in self.fifos.values() {
            debug_assert!(fifo.try_lock().map(|f| f.is_empty()).unwrap_or(true));
        }
        findings
    }

    async fn sanitize_one(&mut self, port_allocator: &PortAllocator, findings: &mut Vec<(AlignedBundle, Finding)>) {
        let Some(test_bundle) = self.in_flight.pop_front() else {
            return;
        };

        let mut bundle = AlignedBundle::new(test_bundle);
        for platform in self.fifos.keys() {
            bundle.seed_platform(platform);
        }
        self.align_one(&mut bundle, port_allocator).await;
        self.aligned_window.push_back(bundle);

        if self.aligned_window.len() >= self.window_size {
            if let Some(oldest) = self.aligned_window.pop_front() {
                for finding in self.oracles.run(&oldest) {
                    findings.push((oldest.clone(), finding));
                }
            }
        }
    }

    async fn align_one(&mut self, bundle: &mut AlignedBundle, port_allocator: &PortAllocator) {
        let initiator = bundle.test_bundle().initiator_endpoint;
        let responder = bundle.test_bundle().responder_endpoint;

        for (platform, fifo) in &self.fifos {
            loop {
                let mut queue = fifo.lock().await;
                let Some(alert) = queue.front().cloned() else {
                    break;
                };
                let (a, b) = alert.endpoints();

                if endpoints_match(a, b, initiator, responder) {
                    queue.pop_front();
                    drop(queue);
                    bundle.add_alert(platform, alert);
                    continue;
                }

                let client_port = if a == responder { b.1 } else { a.1 };

                if let Some(earlier) = self.aligned_window.iter_mut().rev().find(|b| b.port() == client_port) {
                    queue.pop_front();
                    drop(queue);
                    earlier.add_alert(platform, alert);
                    continue;
                }

                if !port_allocator.contains(client_port) {
                    queue.pop_front();
                    tracing::debug!(client_port, "discarding stale alert outside the reorder window");
                    continue;
                }

                break;
            }
        }
    }
}

fn endpoints_match(a: Endpoint, b: Endpoint, initiator: Endpoint, responder: Endpoint) -> bool {
    (a == initiator && b == responder) || (a == responder && b == initiator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nidsfuzz_rules::Rule;
    use std::sync::Arc as StdArc;

    fn test_bundle(port: u16) -> TestBundle {
        TestBundle {
            rules: vec![StdArc::new(
                Rule::parse(r#"alert tcp any any -> any any (content:"x"; sid:1;)"#).unwrap(),
            )],
            initiator_endpoint: ("127.0.0.1".parse().unwrap(), port),
            responder_endpoint: ("127.0.0.1".parse().unwrap(), 9000),
            request: vec![],
            response: vec![],
        }
    }

    fn alert_for(rule_id: &str, client_port: u16) -> Alert {
        Alert {
            rule_id: rule_id.to_string(),
            src_ip: "127.0.0.1".parse().unwrap(),
            src_port: client_port,
            dst_ip: "127.0.0.1".parse().unwrap(),
            dst_port: 9000,
        }
    }

    #[tokio::test]
    async fn exact_match_attaches_alert_to_its_bundle() {
        let fifo: Arc<Mutex<VecDeque<Alert>>> = Arc::new(Mutex::new(VecDeque::from([alert_for("1:1:1", 40001)])));
        let mut fifos = HashMap::new();
        fifos.insert("suricata".to_string(), fifo);

        let mut aligner = Aligner::new(fifos, 10);
        aligner.submit(test_bundle(40001));

        let allocator = PortAllocator::new(10);
        let findings = aligner.finalize(&allocator).await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn stale_alert_outside_reorder_window_is_discarded() {
        let fifo: Arc<Mutex<VecDeque<Alert>>> = Arc::new(Mutex::new(VecDeque::from([alert_for("1:1:1", 59999)])));
        let mut fifos = HashMap::new();
        fifos.insert("suricata".to_string(), fifo.clone());

        let mut aligner = Aligner::new(fifos, 10);
        aligner.submit(test_bundle(40001));

        let allocator = PortAllocator::new(10);
        aligner.finalize(&allocator).await;
        assert!(fifo.lock().await.is_empty());
    }
}
