//! Rule selection strategies: sequential, random, and combination, each
//! yielding `(protocol, Vec<Arc<Rule>>)` batches drawn from a RuleSet.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;

use nidsfuzz_rules::{Rule, RuleSet};

/// Common surface every strategy implements: draw the next batch, accept
/// burst-rule feedback from the fuzz loop, and report exhaustion.
pub trait RuleSelector {
    fn next_batch(&mut self) -> Option<Vec<Arc<Rule>>>;
    fn filter(&mut self, rule_ids: &[String]);
    fn count(&self) -> usize;
    fn batch_num(&self) -> usize;
    fn exhausted(&self) -> bool {
        self.count() >= self.batch_num()
    }
}

/// Which concrete [`RuleSelector`] a campaign should use; lets callers (the
/// CLI, a config file) pick a strategy without naming its type directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAlgorithm {
    Sequential,
    Random,
    Combination,
}

impl SelectionAlgorithm {
    pub fn build(self, ruleset: &RuleSet, protocol: Option<String>, batch_size: usize, batch_num: usize) -> Box<dyn RuleSelector> {
        match self {
            SelectionAlgorithm::Sequential => Box::new(SequentialSelector::new(ruleset, protocol, batch_size, batch_num)),
            SelectionAlgorithm::Random => Box::new(RandomSelector::new(ruleset, protocol, batch_size, batch_num)),
            SelectionAlgorithm::Combination => Box::new(CombinationSelector::new(ruleset, protocol, batch_size, batch_num)),
        }
    }
}

fn eligible_rules<'a>(ruleset: &'a RuleSet, protocol: Option<&str>) -> Vec<&'a Rule> {
    ruleset
        .activated()
        .iter()
        .filter(|rule| protocol.map(|p| rule.service().eq_ignore_ascii_case(p)).unwrap_or(true))
        .collect()
}

pub struct SequentialSelector {
    candidates: Vec<Arc<Rule>>,
    protocol: Option<String>,
    batch_size: usize,
    batch_num: usize,
    cursor: usize,
    count: usize,
    excluded: HashSet<String>,
}

impl SequentialSelector {
    pub fn new(ruleset: &RuleSet, protocol: Option<String>, batch_size: usize, batch_num: usize) -> SequentialSelector {
        let candidates = eligible_rules(ruleset, protocol.as_deref())
            .into_iter()
            .map(|r| Arc::new(r.clone()))
            .collect();
        SequentialSelector {
            candidates,
            protocol,
            batch_size,
            batch_num,
            cursor: 0,
            count: 0,
            excluded: HashSet::new(),
        }
    }

    fn remaining(&self) -> Vec<Arc<Rule>> {
        self.candidates[self.cursor..]
            .iter()
            .filter(|r| !self.excluded.contains(&r.id()))
            .cloned()
            .collect()
    }
}

impl RuleSelector for SequentialSelector {
    fn next_batch(&mut self) -> Option<Vec<Arc<Rule>>> {
        if self.count >= self.batch_num || self.cursor >= self.candidates.len() {
            return None;
        }

        let batch: Vec<Arc<Rule>> = self.remaining().into_iter().take(self.batch_size).collect();
        self.cursor = (self.cursor + self.batch_size).min(self.candidates.len());
        self.count += 1;

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    fn filter(&mut self, rule_ids: &[String]) {
        self.excluded.extend(rule_ids.iter().cloned());
    }

    fn count(&self) -> usize {
        self.count
    }

    fn batch_num(&self) -> usize {
        self.batch_num
    }
}

pub struct RandomSelector {
    candidates: Vec<Arc<Rule>>,
    batch_size: usize,
    batch_num: usize,
    count: usize,
    excluded: HashSet<String>,
}

impl RandomSelector {
    pub fn new(ruleset: &RuleSet, protocol: Option<String>, batch_size: usize, batch_num: usize) -> RandomSelector {
        let candidates = eligible_rules(ruleset, protocol.as_deref())
            .into_iter()
            .map(|r| Arc::new(r.clone()))
            .collect();
        RandomSelector {
            candidates,
            batch_size,
            batch_num,
            count: 0,
            excluded: HashSet::new(),
        }
    }
}

impl RuleSelector for RandomSelector {
    fn next_batch(&mut self) -> Option<Vec<Arc<Rule>>> {
        if self.count >= self.batch_num {
            return None;
        }

        let pool: Vec<&Arc<Rule>> = self.candidates.iter().filter(|r| !self.excluded.contains(&r.id())).collect();
        if pool.len() < self.batch_size {
            return None;
        }

        let mut rng = rand::thread_rng();
        let chosen: Vec<Arc<Rule>> = pool.choose_multiple(&mut rng, self.batch_size).map(|r| (*r).clone()).collect();
        self.count += 1;
        Some(chosen)
    }

    fn filter(&mut self, rule_ids: &[String]) {
        self.excluded.extend(rule_ids.iter().cloned());
    }

    fn count(&self) -> usize {
        self.count
    }

    fn batch_num(&self) -> usize {
        self.batch_num
    }
}

/// Enumerates `batch_size`-sized combinations of the filtered rule set,
/// capped at `batch_num` combinations. Intended for the blending strategy.
pub struct CombinationSelector {
    candidates: Vec<Arc<Rule>>,
    batch_size: usize,
    batch_num: usize,
    combination_cursor: Vec<usize>,
    count: usize,
    excluded: HashSet<String>,
    started: bool,
}

impl CombinationSelector {
    pub fn new(ruleset: &RuleSet, protocol: Option<String>, batch_size: usize, batch_num: usize) -> CombinationSelector {
        let candidates = eligible_rules(ruleset, protocol.as_deref())
            .into_iter()
            .map(|r| Arc::new(r.clone()))
            .collect();
        CombinationSelector {
            candidates,
            batch_size: batch_size.max(2),
            batch_num,
            combination_cursor: Vec::new(),
            count: 0,
            excluded: HashSet::new(),
            started: false,
        }
    }

    fn advance(&mut self) -> bool {
        let n = self.candidates.len();
        let k = self.batch_size;

        if !self.started {
            if k > n {
                return false;
            }
            self.combination_cursor = (0..k).collect();
            self.started = true;
            return true;
        }

        let mut i = k;
        loop {
            if i == 0 {
                return false;
            }
            i -= 1;
            if self.combination_cursor[i] != i + n - k {
                self.combination_cursor[i] += 1;
                for j in i + 1..k {
                    self.combination_cursor[j] = self.combination_cursor[j - 1] + 1;
                }
                return true;
            }
        }
    }
}

impl RuleSelector for CombinationSelector {
    fn next_batch(&mut self) -> Option<Vec<Arc<Rule>>> {
        if self.count >= self.batch_num {
            return None;
        }

        loop {
            if !self.advance() {
                return None;
            }

            let batch: Vec<Arc<Rule>> = self
                .combination_cursor
                .iter()
                .map(|&i| self.candidates[i].clone())
                .collect();

            if batch.iter().any(|r| self.excluded.contains(&r.id())) {
                continue;
            }

            self.count += 1;
            return Some(batch);
        }
    }

    fn filter(&mut self, rule_ids: &[String]) {
        self.excluded.extend(rule_ids.iter().cloned());
    }

    fn count(&self) -> usize {
        self.count
    }

    fn batch_num(&self) -> usize {
        self.batch_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset(n: usize) -> RuleSet {
        let lines: Vec<String> = (0..n)
            .map(|i| format!(r#"alert tcp any any -> any any (content:"x"; sid:{i};)"#))
            .collect();
        RuleSet::from_rules(lines)
    }

    #[test]
    fn sequential_yields_batch_size_one_until_exhaustion() {
        // S9: 3 rules, batch_size=1, batch_num=10 -> exactly 3 batches.
        let rules = ruleset(3);
        let mut selector = SequentialSelector::new(&rules, None, 1, 10);

        let mut batches = 0;
        while selector.next_batch().is_some() {
            batches += 1;
        }
        assert_eq!(batches, 3);
    }

    #[test]
    fn sequential_filter_drops_burst_rule_from_remaining_batches() {
        // S9: filtering the rule that would be next removes it from the
        // remaining selection, leaving one fewer batch than candidates.
        let rules = ruleset(3);
        let mut selector = SequentialSelector::new(&rules, None, 1, 10);

        let first = selector.next_batch().unwrap();
        let next_up = selector.remaining()[0].id();
        selector.filter(&[next_up]);

        let mut batches = 1;
        while selector.next_batch().is_some() {
            batches += 1;
        }
        assert_eq!(batches, 2);
        let _ = first;
    }

    #[test]
    fn combination_selector_enumerates_pairs() {
        let rules = ruleset(3);
        let mut selector = CombinationSelector::new(&rules, None, 2, 10);

        let mut batches = 0;
        while let Some(batch) = selector.next_batch() {
            assert_eq!(batch.len(), 2);
            batches += 1;
        }
        assert_eq!(batches, 3); // C(3,2) = 3
    }

    #[test]
    fn random_selector_stops_when_pool_smaller_than_batch_size() {
        let rules = ruleset(1);
        let mut selector = RandomSelector::new(&rules, None, 2, 10);
        assert!(selector.next_batch().is_none());
    }

    #[test]
    fn selection_algorithm_builds_the_matching_selector() {
        let rules = ruleset(3);
        let mut combination = SelectionAlgorithm::Combination.build(&rules, None, 2, 10);
        let mut batches = 0;
        while combination.next_batch().is_some() {
            batches += 1;
        }
        assert_eq!(batches, 3);
    }
}
