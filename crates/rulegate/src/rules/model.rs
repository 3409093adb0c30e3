//! Rule set data model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use thiserror::Error;

/// Errors raised when a caller names or builds a rule incorrectly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The rule type is not one of `allowed`, `forbidden`, `required`.
    #[error("invalid rule type: {0:?} (expected allowed, forbidden or required)")]
    InvalidRuleType(String),
    /// Keyed conditions only make sense in the `required` collection.
    #[error("keyed conditions are only valid for required rules, not {0}")]
    UnexpectedCondition(RuleKind),
}

/// One of the three rule collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Allow-list patterns. Empty means no restriction.
    Allowed,
    /// Patterns that reject a command outright.
    Forbidden,
    /// Patterns or conditions every command must satisfy.
    Required,
}

impl RuleKind {
    /// All rule kinds, in the order they appear in a rule file.
    pub const ALL: [RuleKind; 3] = [RuleKind::Allowed, RuleKind::Forbidden, RuleKind::Required];

    /// The key used for this collection in rule files.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Allowed => "allowed",
            RuleKind::Forbidden => "forbidden",
            RuleKind::Required => "required",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allowed" => Ok(RuleKind::Allowed),
            "forbidden" => Ok(RuleKind::Forbidden),
            "required" => Ok(RuleKind::Required),
            other => Err(RuleError::InvalidRuleType(other.to_string())),
        }
    }
}

/// A single rule entry.
///
/// Plain patterns are stored lower-cased and trimmed. Keyed conditions keep
/// the model's text as written; the key is the trigger a command must
/// mention and the detail is the human justification.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuleItem {
    /// A substring pattern, e.g. `sudo`.
    Pattern(String),
    /// A single-key mapping such as `{network_restart: "admin approval required"}`.
    Condition {
        /// Trigger keyword.
        key: String,
        /// Requirement or justification text.
        detail: String,
    },
}

impl RuleItem {
    /// Build a normalized plain pattern. Returns `None` for blank input.
    pub fn pattern(text: &str) -> Option<Self> {
        normalize_pattern(text).map(RuleItem::Pattern)
    }

    /// Build a keyed condition. Returns `None` when the key is blank.
    pub fn condition(key: impl Into<String>, detail: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return None;
        }
        Some(RuleItem::Condition {
            key,
            detail: detail.into(),
        })
    }

    /// The text a command has to contain to satisfy this item, lower-cased.
    pub fn trigger(&self) -> String {
        match self {
            RuleItem::Pattern(p) => p.clone(),
            RuleItem::Condition { key, .. } => key.trim().to_lowercase(),
        }
    }

    /// Coerce a loosely-typed value into rule items.
    ///
    /// Scalars become patterns, mappings become one condition per entry,
    /// everything else (null, nested sequences) is dropped.
    pub fn from_value(value: &Value) -> Vec<Self> {
        match value {
            Value::Mapping(map) => map
                .iter()
                .filter_map(|(k, v)| {
                    let key = scalar_text(k)?;
                    RuleItem::condition(key, detail_text(v))
                })
                .collect(),
            Value::Tagged(tagged) => RuleItem::from_value(&tagged.value),
            other => scalar_text(other)
                .and_then(|s| RuleItem::pattern(&s))
                .into_iter()
                .collect(),
        }
    }
}

impl fmt::Display for RuleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleItem::Pattern(p) => f.write_str(p),
            RuleItem::Condition { key, detail } => write!(f, "{key}: {detail}"),
        }
    }
}

impl Serialize for RuleItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        match self {
            RuleItem::Pattern(p) => serializer.serialize_str(p),
            RuleItem::Condition { key, detail } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(key, detail)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RuleItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let mut items = RuleItem::from_value(&value);
        if items.len() > 1 {
            return Err(serde::de::Error::custom(
                "a keyed condition must have exactly one key",
            ));
        }
        items
            .pop()
            .ok_or_else(|| serde::de::Error::custom("rule value is empty"))
    }
}

/// The three-collection policy structure.
///
/// Every collection is deduplicated and keeps first-insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    /// Allow-list patterns.
    pub allowed: Vec<String>,
    /// Forbidden patterns.
    pub forbidden: Vec<String>,
    /// Required patterns and keyed conditions.
    pub required: Vec<RuleItem>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no collection has any entry.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.forbidden.is_empty() && self.required.is_empty()
    }

    /// Total number of entries across all collections.
    pub fn len(&self) -> usize {
        self.allowed.len() + self.forbidden.len() + self.required.len()
    }

    /// Build a rule set from a parsed document.
    ///
    /// Returns `None` unless the value is a mapping. Unknown keys are
    /// ignored, a missing or non-sequence collection counts as empty (a
    /// lone scalar is accepted as a one-element collection).
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Mapping(map) => map,
            Value::Tagged(tagged) => return RuleSet::from_value(&tagged.value),
            _ => return None,
        };

        let mut rules = RuleSet::new();
        for kind in RuleKind::ALL {
            let Some(entries) = map.get(kind.as_str()) else {
                continue;
            };
            let entries: Vec<&Value> = match entries {
                Value::Sequence(seq) => seq.iter().collect(),
                Value::Null => Vec::new(),
                other => vec![other],
            };
            for entry in entries {
                for item in RuleItem::from_value(entry) {
                    // Conditions outside `required` are dropped.
                    let _ = rules.insert(kind, item);
                }
            }
        }
        Some(rules)
    }

    /// Insert an item, returning whether the set changed.
    ///
    /// Duplicates are ignored. Keyed conditions are only accepted for
    /// [`RuleKind::Required`].
    pub fn insert(&mut self, kind: RuleKind, item: RuleItem) -> Result<bool, RuleError> {
        match (kind, item) {
            (RuleKind::Allowed, RuleItem::Pattern(p)) => Ok(push_unique(&mut self.allowed, p)),
            (RuleKind::Forbidden, RuleItem::Pattern(p)) => Ok(push_unique(&mut self.forbidden, p)),
            (RuleKind::Required, item) => Ok(push_unique(&mut self.required, item)),
            (kind, RuleItem::Condition { .. }) => Err(RuleError::UnexpectedCondition(kind)),
        }
    }

    /// Remove an item, returning whether it was present.
    pub fn remove(&mut self, kind: RuleKind, item: &RuleItem) -> bool {
        match (kind, item) {
            (RuleKind::Allowed, RuleItem::Pattern(p)) => remove_value(&mut self.allowed, p),
            (RuleKind::Forbidden, RuleItem::Pattern(p)) => remove_value(&mut self.forbidden, p),
            (RuleKind::Required, item) => remove_value(&mut self.required, item),
            _ => false,
        }
    }

    /// Returns true if the collection already holds the item.
    pub fn contains(&self, kind: RuleKind, item: &RuleItem) -> bool {
        match (kind, item) {
            (RuleKind::Allowed, RuleItem::Pattern(p)) => self.allowed.contains(p),
            (RuleKind::Forbidden, RuleItem::Pattern(p)) => self.forbidden.contains(p),
            (RuleKind::Required, item) => self.required.contains(item),
            _ => false,
        }
    }

    /// Union another rule set into this one, keeping existing order.
    pub fn merge(&mut self, other: &RuleSet) {
        for p in &other.allowed {
            push_unique(&mut self.allowed, p.clone());
        }
        for p in &other.forbidden {
            push_unique(&mut self.forbidden, p.clone());
        }
        for item in &other.required {
            push_unique(&mut self.required, item.clone());
        }
    }

    /// Serialize to the canonical YAML rule-file form.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RuleSet::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("rule set must be a mapping"))
    }
}

/// Lower-case and trim a plain pattern, dropping blanks.
pub fn normalize_pattern(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) -> bool {
    if items.contains(&item) {
        false
    } else {
        items.push(item);
        true
    }
}

fn remove_value<T: PartialEq>(items: &mut Vec<T>, item: &T) -> bool {
    let before = items.len();
    items.retain(|existing| existing != item);
    items.len() != before
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn detail_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Sequence(_) | Value::Mapping(_) => serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        other => scalar_text(other).unwrap_or_default(),
    }
}
