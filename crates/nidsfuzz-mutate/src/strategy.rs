//! The four mutation strategies. Each is a lazy iterator over
//! `(request_bytes, response_bytes)` pairs produced from a selected rule
//! batch.

use std::collections::HashMap;
use std::sync::Arc;

use nidsfuzz_core::{Error, ProtoType, Result};
use nidsfuzz_render::{Direction, Grammar, RenderMode, SignatureRender};
use nidsfuzz_rules::{Option as RuleOption, Rule, RuleSet};

use crate::common::{merge_buffers, resolve_prerequisites, triangular};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionMode {
    BlockWise,
    ElementWise,
}

#[derive(Debug, Clone)]
pub struct MutationConfig {
    pub repetition_mode: RepetitionMode,
    pub repeat_times: usize,
    pub repeat_min: usize,
    pub repeat_max: usize,
    pub obfuscation_times: usize,
    pub obfuscation_min: usize,
    pub obfuscation_max: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        MutationConfig {
            repetition_mode: RepetitionMode::BlockWise,
            repeat_times: 3,
            repeat_min: 1,
            repeat_max: 8,
            obfuscation_times: 2,
            obfuscation_min: 1,
            obfuscation_max: 4,
        }
    }
}

/// Each prerequisite is rendered as its own independent pass-through pair and
/// must be injected and aligned separately from the main pair it unblocks.
fn render_prerequisites(batch: &[Arc<Rule>], ruleset: &RuleSet, grammar: &Grammar) -> Vec<(Vec<u8>, Vec<u8>)> {
    resolve_prerequisites(batch, ruleset)
        .into_iter()
        .filter_map(|prereq| render_batch(std::slice::from_ref(&prereq), ruleset, grammar, RenderMode::PassThrough))
        .collect()
}

fn render_batch(batch: &[Arc<Rule>], ruleset: &RuleSet, grammar: &Grammar, mode: RenderMode) -> Option<(Vec<u8>, Vec<u8>)> {
    let _ = ruleset;
    let proto_type = batch.first().map(|r| ProtoType::of(r.service())).unwrap_or(ProtoType::Text);
    let merged = merge_buffers(batch);

    let mut request_buffers: HashMap<String, Vec<u8>> = HashMap::new();
    for (buffer, options) in &merged {
        let mut render = SignatureRender::new(mode, proto_type);
        for option in options {
            if !render.push(option) {
                return None;
            }
        }
        request_buffers.insert(buffer.as_str().to_string(), render.render());
    }

    let request = grammar.generate(Direction::Request, &request_buffers);
    let response = grammar.generate(Direction::Response, &HashMap::new());
    Some((request, response))
}

/// Arity 1. Each rule in the batch yields its own buffer independently, with
/// any unresolved flowbit prerequisite rendered as its own leading pair.
pub fn pass_through(
    rules: Vec<Arc<Rule>>,
    ruleset: &RuleSet,
    grammar: &Grammar,
) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
    if rules.len() != 1 {
        return Err(Error::RenderInfeasibility(format!(
            "pass-through requires arity 1, got {}",
            rules.len()
        )));
    }

    let ruleset = ruleset;
    let grammar = grammar;
    Ok(rules.into_iter().flat_map(move |rule| {
        let mut pairs = render_prerequisites(std::slice::from_ref(&rule), ruleset, grammar);
        pairs.extend(render_batch(&[rule], ruleset, grammar, RenderMode::PassThrough));
        pairs
    }))
}

/// Arity >= 2. Blends multiple rules' options into shared buffers via the
/// gap-aware renderer. Returns every prerequisite pair first, then the
/// blended main pair.
pub fn blending(rules: Vec<Arc<Rule>>, ruleset: &RuleSet, grammar: &Grammar) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if rules.len() < 2 {
        return Err(Error::RenderInfeasibility(format!(
            "blending requires arity >= 2, got {}",
            rules.len()
        )));
    }

    let mut pairs = render_prerequisites(&rules, ruleset, grammar);
    pairs.extend(render_batch(&rules, ruleset, grammar, RenderMode::Blending));
    Ok(pairs)
}

/// Arity 1. Repeats the rule's option list block-wise or element-wise, with
/// a triangular-distributed repeat count. Any unresolved flowbit
/// prerequisite is returned as its own leading pair.
pub fn repetition(
    rules: Vec<Arc<Rule>>,
    ruleset: &RuleSet,
    grammar: &Grammar,
    config: &MutationConfig,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if rules.len() != 1 {
        return Err(Error::RenderInfeasibility(format!(
            "repetition requires arity 1, got {}",
            rules.len()
        )));
    }

    let rule = &rules[0];
    let proto_type = ProtoType::of(rule.service());
    let n = triangular(config.repeat_min, config.repeat_max, config.repeat_times);

    let merged = merge_buffers(&rules);
    let mut request_buffers: HashMap<String, Vec<u8>> = HashMap::new();

    for (buffer, options) in &merged {
        let mut render = SignatureRender::new(RenderMode::Repetition, proto_type);
        let repeated: Vec<&RuleOption> = match config.repetition_mode {
            RepetitionMode::BlockWise => (0..n).flat_map(|_| options.iter()).collect(),
            RepetitionMode::ElementWise => options.iter().flat_map(|opt| std::iter::repeat(opt).take(n)).collect(),
        };
        for option in repeated {
            if !render.push(option) {
                return Ok(Vec::new());
            }
        }
        request_buffers.insert(buffer.as_str().to_string(), render.render());
    }

    let mut pairs = render_prerequisites(&rules, ruleset, grammar);
    let request = grammar.generate(Direction::Request, &request_buffers);
    let response = grammar.generate(Direction::Response, &HashMap::new());
    pairs.push((request, response));
    Ok(pairs)
}

/// Arity 1, text protocols only. Applies path-shifting and URL-encoding to
/// content bytes before pushing them into a pass-through render. Any
/// unresolved flowbit prerequisite is returned as its own leading pair.
pub fn obfuscation(
    rules: Vec<Arc<Rule>>,
    ruleset: &RuleSet,
    grammar: &Grammar,
    proto_type: ProtoType,
    config: &MutationConfig,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if rules.len() != 1 {
        return Err(Error::RenderInfeasibility(format!(
            "obfuscation requires arity 1, got {}",
            rules.len()
        )));
    }
    if proto_type != ProtoType::Text {
        return Err(Error::RenderInfeasibility(
            "obfuscation is only valid for text-based protocols".to_string(),
        ));
    }

    let replace_times = triangular(config.obfuscation_min, config.obfuscation_max, config.obfuscation_times);
    let insert_times = triangular(config.obfuscation_min, config.obfuscation_max, config.obfuscation_times);

    let merged = merge_buffers(&rules);
    let mut request_buffers: HashMap<String, Vec<u8>> = HashMap::new();

    for (buffer, options) in &merged {
        let mut render = SignatureRender::new(RenderMode::PassThrough, proto_type);
        for option in options {
            let transformed = match option {
                RuleOption::Content(c) => {
                    let mut content = c.clone();
                    content.ascii_match = crate::obfuscation::path_shift(&content.ascii_match, insert_times);
                    content.ascii_match = crate::obfuscation::url_encode(&content.ascii_match, replace_times);
                    RuleOption::Content(content)
                }
                other => other.clone(),
            };
            if !render.push(&transformed) {
                return Ok(Vec::new());
            }
        }
        request_buffers.insert(buffer.as_str().to_string(), render.render());
    }

    let mut pairs = render_prerequisites(&rules, ruleset, grammar);
    let request = grammar.generate(Direction::Request, &request_buffers);
    let response = grammar.generate(Direction::Response, &HashMap::new());
    pairs.push((request, response));
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nidsfuzz_rules::Rule;

    fn rule(raw: &str) -> Arc<Rule> {
        Arc::new(Rule::parse(raw).unwrap())
    }

    #[test]
    fn pass_through_rejects_arity_other_than_one() {
        let ruleset = RuleSet::default();
        let grammar = Grammar::fallback();
        let result = pass_through(vec![], &ruleset, &grammar);
        assert!(result.is_err());
    }

    #[test]
    fn blending_rejects_arity_below_two() {
        let ruleset = RuleSet::default();
        let grammar = Grammar::fallback();
        let r = rule(r#"alert tcp any any -> any any (content:"A"; sid:1;)"#);
        let result = blending(vec![r], &ruleset, &grammar);
        assert!(result.is_err());
    }

    #[test]
    fn obfuscation_rejects_binary_protocols() {
        let ruleset = RuleSet::default();
        let grammar = Grammar::fallback();
        let r = rule(r#"alert tcp any any -> any any (content:"A"; sid:1;)"#);
        let result = obfuscation(vec![r], &ruleset, &grammar, ProtoType::Binary, &MutationConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn pass_through_yields_one_pair_per_rule() {
        let ruleset = RuleSet::default();
        let grammar = Grammar::fallback();
        let r = rule(r#"alert tcp any any -> any any (content:"A"; sid:1;)"#);
        let pairs: Vec<_> = pass_through(vec![r], &ruleset, &grammar).unwrap().collect();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn pass_through_emits_the_setter_prerequisite_as_its_own_leading_pair() {
        let ruleset = RuleSet::from_rules(vec![
            r#"alert tcp any any -> any any (content:"login"; flowbits:set,authenticated; sid:1;)"#.to_string(),
            r#"alert tcp any any -> any any (content:"secret"; flowbits:isset,authenticated; sid:2;)"#.to_string(),
        ]);
        let grammar = Grammar::fallback();
        let checker = ruleset.find_rule("1:2:1").unwrap().clone();
        let pairs: Vec<_> = pass_through(vec![Arc::new(checker)], &ruleset, &grammar).unwrap().collect();

        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].0.windows(5).any(|w| w == b"login"));
        assert!(pairs[1].0.windows(6).any(|w| w == b"secret"));
    }
}
