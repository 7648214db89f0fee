//! Differential test oracles, registered against a shared registry so new
//! oracles can be added without touching the aligner.

use std::collections::HashMap;

use crate::bundle::AlignedBundle;

#[derive(Debug, Clone)]
pub struct Finding {
    pub oracle: &'static str,
    pub detail: String,
}

pub type OracleFn = fn(&AlignedBundle) -> Option<Finding>;

pub struct OracleRegistry {
    oracles: Vec<OracleFn>,
}

impl OracleRegistry {
    pub fn new() -> OracleRegistry {
        OracleRegistry { oracles: Vec::new() }
    }

    /// The default registry: rule orthogonality + cross-platform
    /// consistency.
    pub fn standard() -> OracleRegistry {
        let mut registry = OracleRegistry::new();
        registry.register(rule_orthogonality_oracle);
        registry.register(nids_consistency_oracle);
        registry
    }

    pub fn register(&mut self, oracle: OracleFn) {
        self.oracles.push(oracle);
    }

    pub fn run(&self, bundle: &AlignedBundle) -> Vec<Finding> {
        self.oracles.iter().filter_map(|oracle| oracle(bundle)).collect()
    }
}

impl Default for OracleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Every alert's rule_id must appear in the bundle's input rules.
fn rule_orthogonality_oracle(bundle: &AlignedBundle) -> Option<Finding> {
    let input_rules: std::collections::HashSet<String> = bundle.input_rule_ids().into_iter().collect();

    for (platform, alerts) in bundle.per_platform_alerts() {
        for alert in alerts {
            if !input_rules.contains(&alert.rule_id) {
                return Some(Finding {
                    oracle: "rule_orthogonality",
                    detail: format!(
                        "platform {platform} raised rule {} which is not among the bundle's input rules",
                        alert.rule_id
                    ),
                });
            }
        }
    }
    None
}

/// The multiset of rule_ids produced must be identical across platforms.
fn nids_consistency_oracle(bundle: &AlignedBundle) -> Option<Finding> {
    let mut counts_per_platform: HashMap<&String, HashMap<&str, usize>> = HashMap::new();

    for (platform, alerts) in bundle.per_platform_alerts() {
        let counts = counts_per_platform.entry(platform).or_default();
        for alert in alerts {
            *counts.entry(alert.rule_id.as_str()).or_insert(0) += 1;
        }
    }

    let mut platforms: Vec<&&String> = counts_per_platform.keys().collect();
    platforms.sort();

    let Some((first_platform, rest)) = platforms.split_first() else {
        return None;
    };
    let baseline = &counts_per_platform[**first_platform];

    for platform in rest {
        let counts = &counts_per_platform[**platform];
        if counts != baseline {
            return Some(Finding {
                oracle: "nids_consistency",
                detail: format!(
                    "platform {} disagrees with {} on rule multiset: {:?} vs {:?}",
                    platform, first_platform, counts, baseline
                ),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Alert, TestBundle};
    use nidsfuzz_rules::Rule;
    use std::sync::Arc;

    fn bundle_with_rules(rule_ids: &[&str]) -> AlignedBundle {
        let rules: Vec<Arc<Rule>> = rule_ids
            .iter()
            .map(|sid| {
                Arc::new(Rule::parse(&format!(r#"alert tcp any any -> any any (content:"x"; sid:{sid};)"#)).unwrap())
            })
            .collect();

        AlignedBundle::new(TestBundle {
            rules,
            initiator_endpoint: ("127.0.0.1".parse().unwrap(), 1),
            responder_endpoint: ("127.0.0.1".parse().unwrap(), 2),
            request: vec![],
            response: vec![],
        })
    }

    fn alert(rule_id: &str) -> Alert {
        Alert {
            rule_id: rule_id.to_string(),
            src_ip: "127.0.0.1".parse().unwrap(),
            src_port: 1,
            dst_ip: "127.0.0.1".parse().unwrap(),
            dst_port: 2,
        }
    }

    #[test]
    fn orthogonality_passes_when_alert_rule_is_an_input_rule() {
        let mut bundle = bundle_with_rules(&["1"]);
        bundle.add_alert("suricata", alert("1:1:1"));
        let registry = OracleRegistry::standard();
        assert!(registry.run(&bundle).is_empty());
    }

    #[test]
    fn orthogonality_flags_an_unrelated_rule() {
        let mut bundle = bundle_with_rules(&["1"]);
        bundle.add_alert("suricata", alert("1:999:1"));
        let registry = OracleRegistry::standard();
        let findings = registry.run(&bundle);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].oracle, "rule_orthogonality");
    }

    #[test]
    fn consistency_flags_disagreeing_platforms() {
        let mut bundle = bundle_with_rules(&["1"]);
        bundle.add_alert("suricata", alert("1:1:1"));
        bundle.add_alert("snort", alert("1:1:1"));
        bundle.add_alert("snort", alert("1:1:1"));
        let registry = OracleRegistry::standard();
        let findings = registry.run(&bundle);
        assert!(findings.iter().any(|f| f.oracle == "nids_consistency"));
    }

    #[test]
    fn consistency_flags_a_platform_that_silently_never_alerts() {
        let mut bundle = bundle_with_rules(&["1"]);
        bundle.add_alert("suricata", alert("1:1:1"));
        bundle.seed_platform("snort");
        let registry = OracleRegistry::standard();
        let findings = registry.run(&bundle);
        assert!(findings.iter().any(|f| f.oracle == "nids_consistency"));
    }

    #[test]
    fn consistency_passes_on_identical_multisets() {
        let mut bundle = bundle_with_rules(&["1"]);
        bundle.add_alert("suricata", alert("1:1:1"));
        bundle.add_alert("snort", alert("1:1:1"));
        let registry = OracleRegistry::standard();
        assert!(registry.run(&bundle).is_empty());
    }
}
