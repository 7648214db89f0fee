//! A loaded collection of rules with flowbit resolution and the
//! selection/grouping views the rest of the pipeline needs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nidsfuzz_core::error::{Error, Result};

use crate::rule::Rule;

#[derive(Debug, Default)]
pub struct RuleSet {
    activated: Vec<Rule>,
    commented: Vec<Rule>,
    unresolved: Vec<(String, Error)>,
    /// bit name -> rule ids that set it
    set_flowbits: HashMap<String, Vec<String>>,
    /// bit name -> rule ids that check it
    check_flowbits: HashMap<String, Vec<String>>,
}

impl RuleSet {
    pub fn from_rules(lines: impl IntoIterator<Item = String>) -> RuleSet {
        let mut set = RuleSet::default();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match Rule::parse(trimmed) {
                Ok(rule) => {
                    if rule.enabled {
                        set.index_flowbits(&rule);
                        set.activated.push(rule);
                    } else {
                        set.commented.push(rule);
                    }
                }
                Err(e) => set.unresolved.push((trimmed.to_string(), e)),
            }
        }
        set
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<RuleSet> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_rules(content.lines().map(|l| l.to_string())))
    }

    pub fn from_files(paths: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<RuleSet> {
        let mut combined = RuleSet::default();
        for path in paths {
            combined = combined.merge(Self::from_file(path)?);
        }
        Ok(combined)
    }

    fn index_flowbits(&mut self, rule: &Rule) {
        for flowbits in &rule.body.flowbits {
            for bit in flowbits.setters() {
                self.set_flowbits.entry(bit.clone()).or_default().push(rule.id());
            }
            for bit in flowbits.checkers() {
                self.check_flowbits.entry(bit.clone()).or_default().push(rule.id());
            }
        }
    }

    pub fn merge(mut self, other: RuleSet) -> RuleSet {
        self.activated.extend(other.activated);
        self.commented.extend(other.commented);
        self.unresolved.extend(other.unresolved);
        for (bit, ids) in other.set_flowbits {
            self.set_flowbits.entry(bit).or_default().extend(ids);
        }
        for (bit, ids) in other.check_flowbits {
            self.check_flowbits.entry(bit).or_default().extend(ids);
        }
        self
    }

    pub fn activated(&self) -> &[Rule] {
        &self.activated
    }

    pub fn commented(&self) -> &[Rule] {
        &self.commented
    }

    pub fn unresolved(&self) -> &[(String, Error)] {
        &self.unresolved
    }

    pub fn find_rule(&self, id: &str) -> Option<&Rule> {
        self.activated.iter().find(|r| r.id() == id)
    }

    /// Case-insensitive substring match on protocol, port and service,
    /// `None` meaning "don't filter on this dimension".
    pub fn group(&self, protocol: Option<&str>, port: Option<&str>, service: Option<&str>) -> Vec<&Rule> {
        self.activated
            .iter()
            .filter(|rule| {
                protocol
                    .map(|p| rule.header.protocol.to_lowercase().contains(&p.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|rule| port.map(|p| rule.port().contains(p)).unwrap_or(true))
            .filter(|rule| {
                service
                    .map(|s| rule.service().to_lowercase().contains(&s.to_lowercase()))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Which other rules' flowbit-set must fire before a given rule's
    /// flowbit-check prerequisites are satisfied.
    pub fn resolve_flowbits(&self, rule: &Rule) -> Vec<String> {
        let mut prerequisites = Vec::new();
        for flowbits in &rule.body.flowbits {
            for bit in flowbits.checkers() {
                if let Some(setters) = self.set_flowbits.get(bit) {
                    prerequisites.extend(setters.iter().cloned());
                }
            }
        }
        prerequisites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
alert tcp any any -> any 80 (msg:"a"; content:"GET"; sid:1;)
# alert tcp any any -> any 80 (msg:"b"; content:"disabled"; sid:2;)
alert tcp any any -> any 8080 (msg:"c"; flowbits:set,did_get; content:"GET"; sid:3;)
alert tcp any any -> any 8080 (msg:"d"; flowbits:isset,did_get; content:"follow-up"; sid:4;)
not a valid rule at all
"#;

    #[test]
    fn partitions_activated_commented_and_unresolved() {
        let set = RuleSet::from_rules(RULES.lines().map(|l| l.to_string()));
        assert_eq!(set.activated().len(), 3);
        assert_eq!(set.commented().len(), 1);
        assert_eq!(set.unresolved().len(), 1);
    }

    #[test]
    fn find_rule_looks_up_by_id() {
        let set = RuleSet::from_rules(RULES.lines().map(|l| l.to_string()));
        let rule = set.find_rule("1:1:1").unwrap();
        assert_eq!(rule.header.dst_port, "80");
    }

    #[test]
    fn group_filters_by_port() {
        let set = RuleSet::from_rules(RULES.lines().map(|l| l.to_string()));
        let grouped = set.group(None, Some("8080"), None);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn resolve_flowbits_finds_setter_prerequisite() {
        let set = RuleSet::from_rules(RULES.lines().map(|l| l.to_string()));
        let checker = set.find_rule("1:4:1").unwrap();
        let prereqs = set.resolve_flowbits(checker);
        assert_eq!(prereqs, vec!["1:3:1".to_string()]);
    }
}
