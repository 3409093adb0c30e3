//! Tolerant parsing of model output into a [`RuleSet`].
//!
//! Models wrap their answer in code fences, prepend chatter, or emit JSON
//! where YAML was asked for. Parsing tries progressively narrower slices of
//! the text and gives up with an empty rule set rather than an error.

use serde_yaml::Value;

use super::model::{RuleKind, RuleSet};

/// Parse raw model output into a rule set. Never fails.
///
/// Attempts, in order: the fence-stripped text, the span from the first `{`
/// to the last `}`, and the span from the first collection key (such as
/// `allowed:`) to the end. When that last span does not parse, trailing
/// lines are dropped one at a time until it does. The first attempt that
/// yields a mapping with at least one known key wins.
pub fn parse_rule_output(raw: &str) -> RuleSet {
    let cleaned = strip_code_fence(raw);

    let whole = [Some(cleaned), brace_span(cleaned)];
    let anchored = key_anchor_span(cleaned).into_iter().flat_map(trailing_line_cuts);

    if let Some(rules) = whole.into_iter().flatten().chain(anchored).find_map(parse_candidate) {
        return rules;
    }

    tracing::warn!(bytes = raw.len(), "model output held no parsable rule set");
    tracing::trace!(raw = %raw, "unparsed rule output");
    RuleSet::default()
}

/// Remove a surrounding code fence and its language tag.
///
/// If the text contains a fenced block anywhere, the content of the first
/// block is returned. An unterminated fence runs to the end of the text.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_ticks = &trimmed[open + 3..];
    // The rest of the opening line is the language tag (e.g. `yaml`).
    let body = match after_ticks.find('\n') {
        Some(nl) => &after_ticks[nl + 1..],
        None => after_ticks.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };

    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn key_anchor_span(text: &str) -> Option<&str> {
    RuleKind::ALL
        .iter()
        .filter_map(|kind| text.find(&format!("{}:", kind.as_str())))
        .min()
        .map(|start| &text[start..])
}

/// `span`, then `span` with its last line removed, and so on down to the
/// first line.
fn trailing_line_cuts(span: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(span), |rest| {
        let rest = *rest;
        rest.trim_end().rfind('\n').map(|nl| &rest[..nl])
    })
}

fn parse_candidate(text: &str) -> Option<RuleSet> {
    let value = serde_yaml::from_str::<Value>(text).ok()?;
    if !has_rule_key(&value) {
        return None;
    }
    RuleSet::from_value(&value)
}

fn has_rule_key(value: &Value) -> bool {
    match value {
        Value::Mapping(map) => RuleKind::ALL
            .iter()
            .any(|kind| map.contains_key(kind.as_str())),
        Value::Tagged(tagged) => has_rule_key(&tagged.value),
        _ => false,
    }
}
