//! The fuzz-loop orchestrator: wires selection, mutation, injection, and
//! sanitization into one runnable campaign.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use nidsfuzz_core::error::Result;
use nidsfuzz_core::ProtoType;
use nidsfuzz_inject::{Initiator, MessageBroker, PortAllocator, Responder};
use nidsfuzz_mutate::MutationConfig;
use nidsfuzz_render::Grammar;
use nidsfuzz_rules::RuleSet;
use nidsfuzz_sanitize::{Aligner, Alert, AlertMonitor, MonitorHandle, TestBundle};
use nidsfuzz_select::{RuleSelector, SelectionAlgorithm};

use crate::accumulation::AccumulationAnalyzer;
use crate::persistence::save;

const HIGH_WATER_MARK: usize = 50;
const INTER_CASE_DELAY: Duration = Duration::from_millis(100);

pub enum MutationAlgorithm {
    PassThrough,
    Blending,
    Repetition(MutationConfig),
    Obfuscation(ProtoType, MutationConfig),
}

/// Builds a [`Fuzzer`] from its constituent parts, mirroring the source's
/// `setup_selection`/`setup_generation`/`setup_sanitization` fluent API.
pub struct FuzzerBuilder {
    initiator_addr: String,
    responder_addr: String,
    tuning_port: u16,
    tuned_port: u16,
    output_dir: PathBuf,
    protocol: Option<String>,
    ruleset: RuleSet,
    selector: Option<Box<dyn RuleSelector>>,
    mutation: MutationAlgorithm,
    nids_logs: HashMap<String, (PathBuf, Regex)>,
    accumulation_threshold: u32,
    port_window: usize,
}

impl FuzzerBuilder {
    pub fn new(initiator_addr: impl Into<String>, responder_addr: impl Into<String>, tuning_port: u16, tuned_port: u16) -> FuzzerBuilder {
        FuzzerBuilder {
            initiator_addr: initiator_addr.into(),
            responder_addr: responder_addr.into(),
            tuning_port,
            tuned_port,
            output_dir: PathBuf::from("./nidsfuzz-output"),
            protocol: None,
            ruleset: RuleSet::default(),
            selector: None,
            mutation: MutationAlgorithm::PassThrough,
            nids_logs: HashMap::new(),
            accumulation_threshold: 1,
            port_window: 1000,
        }
    }

    pub fn setup_selection(
        mut self,
        ruleset: RuleSet,
        algorithm: SelectionAlgorithm,
        protocol: Option<String>,
        batch_size: usize,
        batch_num: usize,
    ) -> Self {
        self.protocol = protocol.clone();
        self.selector = Some(algorithm.build(&ruleset, protocol, batch_size, batch_num));
        self.ruleset = ruleset;
        self
    }

    pub fn setup_generation(mut self, mutation: MutationAlgorithm) -> Self {
        self.mutation = mutation;
        self
    }

    pub fn setup_sanitization(mut self, nids_logs: HashMap<String, (PathBuf, Regex)>, accumulation_threshold: u32, port_window: usize) -> Self {
        self.nids_logs = nids_logs;
        self.accumulation_threshold = accumulation_threshold;
        self.port_window = port_window;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn build(self) -> Fuzzer {
        let grammar = Grammar::fallback();
        let grammar = self.protocol.as_deref().map(nidsfuzz_render::grammar::lookup).unwrap_or(grammar);

        Fuzzer {
            initiator_addr: self.initiator_addr,
            responder_addr: self.responder_addr,
            tuning_port: self.tuning_port,
            tuned_port: self.tuned_port,
            output_dir: self.output_dir,
            ruleset: self.ruleset,
            selector: self.selector.expect("setup_selection must be called before build"),
            mutation: self.mutation,
            grammar,
            nids_logs: self.nids_logs,
            accumulation: AccumulationAnalyzer::new(self.accumulation_threshold),
            port_window: self.port_window,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub struct Fuzzer {
    initiator_addr: String,
    responder_addr: String,
    tuning_port: u16,
    tuned_port: u16,
    output_dir: PathBuf,
    ruleset: RuleSet,
    selector: Box<dyn RuleSelector>,
    mutation: MutationAlgorithm,
    grammar: Grammar,
    nids_logs: HashMap<String, (PathBuf, Regex)>,
    accumulation: AccumulationAnalyzer,
    port_window: usize,
    stop: Arc<AtomicBool>,
}

impl Fuzzer {
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs the fuzz loop until the selector is exhausted or `stop()` is
    /// called, then finalizes and returns the number of findings persisted.
    pub async fn run(mut self) -> Result<usize> {
        let mut fifos: HashMap<String, Arc<Mutex<std::collections::VecDeque<Alert>>>> = HashMap::new();
        let mut monitor_handles = Vec::new();
        let mut monitor_controls: Vec<MonitorHandle> = Vec::new();
        for (platform, (path, regex)) in &self.nids_logs {
            let monitor = AlertMonitor::new(path.clone(), regex.clone());
            fifos.insert(platform.clone(), monitor.fifo());
            monitor_controls.push(monitor.handle());
            monitor_handles.push(tokio::spawn(monitor.run()));
        }

        let mut aligner = Aligner::new(fifos, self.port_window);
        let mut port_allocator = PortAllocator::new(self.port_window);
        let broker = MessageBroker::new();
        let mut findings_count = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) || self.selector.exhausted() {
                break;
            }

            let Some(batch) = self.selector.next_batch() else {
                break;
            };

            // Each entry may itself hold several pairs (a rule's own
            // unresolved flowbit prerequisites rendered as leading pairs);
            // every one of them is injected and aligned as its own
            // independent bilateral exchange below.
            let pairs: Vec<(Vec<u8>, Vec<u8>)> = match &self.mutation {
                MutationAlgorithm::PassThrough => batch
                    .iter()
                    .filter_map(|rule| nidsfuzz_mutate::pass_through(vec![rule.clone()], &self.ruleset, &self.grammar).ok())
                    .flatten()
                    .collect(),
                MutationAlgorithm::Blending => nidsfuzz_mutate::blending(batch.clone(), &self.ruleset, &self.grammar)
                    .ok()
                    .into_iter()
                    .flatten()
                    .collect(),
                MutationAlgorithm::Repetition(cfg) => batch
                    .iter()
                    .filter_map(|rule| nidsfuzz_mutate::repetition(vec![rule.clone()], &self.ruleset, &self.grammar, cfg).ok())
                    .flatten()
                    .collect(),
                MutationAlgorithm::Obfuscation(proto_type, cfg) => batch
                    .iter()
                    .filter_map(|rule| nidsfuzz_mutate::obfuscate(vec![rule.clone()], &self.ruleset, &self.grammar, *proto_type, cfg).ok())
                    .flatten()
                    .collect(),
            };

            if pairs.is_empty() {
                continue;
            }

            let responder = Responder::bind(&format!("{}:{}", self.responder_addr, self.tuned_port), broker.clone()).await?;
            let initiator = Initiator::new(
                format!("{}:{}", self.responder_addr, self.tuning_port),
                format!("{}:{}", self.responder_addr, self.tuned_port),
                self.initiator_addr.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap()),
            );

            for (request, response) in &pairs {
                let bind_port = port_allocator.allocate(true).await?;
                let accept = responder.accept_one();
                let inject = initiator.inject(request, response, bind_port);
                let (_accept_result, _echoed) = tokio::join!(accept, inject);

                let bundle = TestBundle {
                    rules: batch.clone(),
                    initiator_endpoint: (self.initiator_addr.parse::<IpAddr>().unwrap_or_else(|_| "127.0.0.1".parse().unwrap()), bind_port),
                    responder_endpoint: (self.responder_addr.parse::<IpAddr>().unwrap_or_else(|_| "127.0.0.1".parse().unwrap()), self.tuned_port),
                    request: request.clone(),
                    response: response.clone(),
                };
                aligner.submit(bundle);
            }

            if aligner.in_flight_len() > HIGH_WATER_MARK {
                for control in &monitor_controls {
                    control.pause();
                }
                let findings = aligner.validate(&port_allocator).await;
                for control in &monitor_controls {
                    control.resume();
                }
                findings_count += findings.len();
                for (bundle, finding) in &findings {
                    tracing::info!(oracle = finding.oracle, detail = %finding.detail, "oracle finding");
                    if let Err(err) = save(&self.output_dir, bundle) {
                        tracing::warn!(error = %err, "failed to persist finding");
                    }
                }
            }

            let burst = self.accumulation.update(&batch.iter().map(|r| r.id()).collect::<Vec<_>>());
            if !burst.is_empty() {
                self.selector.filter(&burst);
            }

            sleep(INTER_CASE_DELAY).await;
        }

        std::fs::create_dir_all(&self.output_dir)?;

        for control in &monitor_controls {
            control.pause();
        }
        let final_findings = aligner.finalize(&port_allocator).await;
        findings_count += final_findings.len();
        for (bundle, finding) in &final_findings {
            tracing::info!(oracle = finding.oracle, detail = %finding.detail, "oracle finding");
            if let Err(err) = save(&self.output_dir, bundle) {
                tracing::warn!(error = %err, "failed to persist finding");
            }
        }

        for handle in monitor_handles {
            handle.abort();
        }

        Ok(findings_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset() -> RuleSet {
        RuleSet::from_rules(vec![r#"alert tcp any any -> any any (content:"x"; sid:1;)"#.to_string()])
    }

    #[test]
    fn builder_carries_batch_num_through_to_exhaustion() {
        let fuzzer = FuzzerBuilder::new("127.0.0.1", "127.0.0.1", 9100, 9101)
            .setup_selection(ruleset(), SelectionAlgorithm::Sequential, None, 1, 1)
            .build();
        assert_eq!(fuzzer.selector.batch_num(), 1);
    }

    #[tokio::test]
    async fn stop_flag_halts_the_loop_before_any_batch_runs() {
        let fuzzer = FuzzerBuilder::new("127.0.0.1", "127.0.0.1", 9102, 9103)
            .setup_selection(ruleset(), SelectionAlgorithm::Sequential, None, 1, 5)
            .output_dir(std::env::temp_dir().join("nidsfuzz-test-stop"))
            .build();
        fuzzer.stop();
        let findings = fuzzer.run().await.unwrap();
        assert_eq!(findings, 0);
    }
}
