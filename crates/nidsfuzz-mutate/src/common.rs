//! Shared setup every mutation strategy runs before rendering: flowbit
//! prerequisite resolution, per-buffer option merging, and the triangular
//! repeat-count distribution shared by repetition and obfuscation.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use nidsfuzz_rules::{Option as RuleOption, Rule, RuleSet, StickyBuffer};

/// `random.triangular(low, high, mode)`: a continuous triangular
/// distribution, rounded to the nearest integer repeat count.
pub fn triangular(low: usize, high: usize, mode: usize) -> usize {
    if low >= high {
        return low;
    }
    let mut rng = rand::thread_rng();
    let u: f64 = rng.gen_range(0.0..1.0);
    let (low, high, mode) = (low as f64, high as f64, mode as f64);
    let fc = (mode - low) / (high - low);

    let sample = if u < fc {
        low + (u * (high - low) * (mode - low)).sqrt()
    } else {
        high - ((1.0 - u) * (high - low) * (high - mode)).sqrt()
    };

    sample.round().max(0.0) as usize
}

/// Walks the batch's rules, collecting checker-flowbit names that no rule in
/// the batch itself sets, then resolves one setter rule per name from the
/// full ruleset.
pub fn resolve_prerequisites(batch: &[Arc<Rule>], ruleset: &RuleSet) -> Vec<Arc<Rule>> {
    let mut set_in_batch = std::collections::HashSet::new();
    for rule in batch {
        for flowbits in &rule.body.flowbits {
            set_in_batch.extend(flowbits.setters().iter().cloned());
        }
    }

    let mut needed_checkers = std::collections::HashSet::new();
    for rule in batch {
        for flowbits in &rule.body.flowbits {
            for checker in flowbits.checkers() {
                if !set_in_batch.contains(checker) {
                    needed_checkers.insert(checker.clone());
                }
            }
        }
    }

    let mut prerequisites = Vec::new();
    for checker in needed_checkers {
        if let Some(setter_id) = ruleset
            .activated()
            .iter()
            .find(|r| r.body.flowbits.iter().any(|fb| fb.setters().contains(&checker)))
            .map(|r| r.id())
        {
            if let Some(rule) = ruleset.find_rule(&setter_id) {
                prerequisites.push(Arc::new(rule.clone()));
            }
        }
    }
    prerequisites
}

/// Merges a batch's per-buffer option lists, in rule order, then drops any
/// content whose bytes are subsumed by a later non-relative pcre in the same
/// buffer (content-consumed-by-global-pcre elimination).
pub fn merge_buffers(batch: &[Arc<Rule>]) -> HashMap<StickyBuffer, Vec<RuleOption>> {
    let mut merged: HashMap<StickyBuffer, Vec<RuleOption>> = HashMap::new();

    for rule in batch {
        for (buffer, options) in &rule.body.signature {
            merged.entry(*buffer).or_default().extend(options.iter().cloned());
        }
    }

    for options in merged.values_mut() {
        let pcre_sources: Vec<String> = options
            .iter()
            .filter_map(|o| match o {
                RuleOption::Pcre(p) if !p.relative() => Some(p.pattern.clone()),
                _ => None,
            })
            .collect();

        options.retain(|o| match o {
            RuleOption::Content(c) => !pcre_sources.iter().any(|src| src.contains(&c.ascii_match)),
            _ => true,
        });
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangular_stays_within_bounds() {
        for _ in 0..1000 {
            let v = triangular(1, 10, 5);
            assert!(v >= 1 && v <= 10);
        }
    }

    #[test]
    fn triangular_collapses_when_low_equals_high() {
        assert_eq!(triangular(3, 3, 3), 3);
    }
}
