use crate::error::{EmberError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound on entries accepted in a single request.
pub const MAX_ENTRIES: usize = 50;

/// Namespace prefix for plan cache keys.
pub const CACHE_KEY_PREFIX: &str = "ember:plan:";

/// How urgently the caller needs guidance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item the plan has to deal with (a burning object, a hazard, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEntry {
    pub name: String,
    pub category: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

fn default_quantity() -> u32 {
    1
}

impl RequestEntry {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            quantity: 1,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Environment attributes (location, occupancy, weather, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RequestContext {
    attributes: BTreeMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }

    /// True when at least one attribute carries a value. Nulls and blank
    /// strings do not count.
    pub fn has_content(&self) -> bool {
        self.attributes.values().any(value_has_content)
    }
}

fn value_has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Context keys that name where the incident is, in preference order.
const LOCATION_KEYS: [&str; 3] = ["location", "area", "environment"];

/// The knowledge-source view of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeQuery {
    /// Free text for similarity search.
    pub text: String,
    /// Distinct lookup terms, one per entry: its `material` attribute when
    /// set, otherwise its category. Normalized, first-seen order.
    pub terms: Vec<String>,
    /// Normalized incident location from the context, if any.
    pub location: Option<String>,
}

impl KnowledgeQuery {
    /// A text-only query with no terms or location.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terms: Vec::new(),
            location: None,
        }
    }
}

/// A coordination request. Immutable for the duration of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub entries: Vec<RequestEntry>,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Request {
    pub fn new(entries: Vec<RequestEntry>, context: RequestContext) -> Self {
        Self {
            entries,
            context,
            urgency: Urgency::default(),
            notes: None,
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(EmberError::Validation(
                "request must contain at least one entry".into(),
            ));
        }
        if self.entries.len() > MAX_ENTRIES {
            return Err(EmberError::Validation(format!(
                "request has {} entries, at most {} are allowed",
                self.entries.len(),
                MAX_ENTRIES
            )));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(EmberError::Validation(format!("entry {}: name must not be blank", i)));
            }
            if entry.category.trim().is_empty() {
                return Err(EmberError::Validation(format!(
                    "entry {} ('{}'): category must not be blank",
                    i, entry.name
                )));
            }
            if entry.quantity == 0 {
                return Err(EmberError::Validation(format!(
                    "entry {} ('{}'): quantity must be greater than zero",
                    i, entry.name
                )));
            }
        }
        if !self.context.has_content() {
            return Err(EmberError::Validation("request context must not be empty".into()));
        }
        Ok(())
    }

    /// Distinct entry categories, normalized, in first-seen order.
    pub fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for entry in &self.entries {
            let category = normalize_text(&entry.category);
            if !out.contains(&category) {
                out.push(category);
            }
        }
        out
    }

    /// Free text describing every entry, joined with "; ".
    pub fn query_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} {}", e.name.trim(), e.category.trim()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// What every knowledge source is asked about.
    pub fn knowledge_query(&self) -> KnowledgeQuery {
        let mut terms: Vec<String> = Vec::new();
        for entry in &self.entries {
            let term = entry
                .attributes
                .get("material")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .map(normalize_text)
                .unwrap_or_else(|| normalize_text(&entry.category));
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        let location = LOCATION_KEYS
            .iter()
            .filter_map(|key| self.context.get(key))
            .filter_map(Value::as_str)
            .map(normalize_text)
            .find(|l| !l.is_empty());
        KnowledgeQuery {
            text: self.query_text(),
            terms,
            location,
        }
    }

    /// Canonical JSON form used for cache keys. Equivalent requests
    /// (entry order, key case, surrounding whitespace) produce identical bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<(String, Value)> = self
            .entries
            .iter()
            .map(|e| {
                let mut obj = Map::new();
                obj.insert("attributes".into(), normalize_map(&e.attributes));
                obj.insert("category".into(), Value::String(normalize_text(&e.category)));
                obj.insert("name".into(), Value::String(normalize_text(&e.name)));
                obj.insert("quantity".into(), Value::from(e.quantity));
                let value = Value::Object(obj);
                (value.to_string(), value)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut root = Map::new();
        root.insert("context".into(), normalize_map(&self.context.attributes));
        root.insert(
            "entries".into(),
            Value::Array(entries.into_iter().map(|(_, v)| v).collect()),
        );
        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| Value::String(n.to_string()))
            .unwrap_or(Value::Null);
        root.insert("notes".into(), notes);
        root.insert("urgency".into(), Value::String(self.urgency.as_str().into()));

        Ok(serde_json::to_vec(&Value::Object(root))?)
    }

    /// `ember:plan:` followed by the SHA-256 hex digest of the canonical form.
    pub fn cache_key(&self) -> Result<String> {
        let digest = Sha256::digest(self.canonical_bytes()?);
        Ok(format!("{}{}", CACHE_KEY_PREFIX, hex::encode(digest)))
    }
}

/// Trim, collapse inner whitespace, lower-case.
pub(crate) fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn normalize_map(map: &BTreeMap<String, Value>) -> Value {
    let sorted: BTreeMap<String, Value> = map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (normalize_text(k), normalize_value(v)))
        .collect();
    Value::Object(sorted.into_iter().collect())
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(obj) => {
            let sorted: BTreeMap<String, Value> = obj
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (normalize_text(k), normalize_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        other => other.clone(),
    }
}
