//! Typed field records: per-page extractions and the accumulated document state.
//!
//! Both records share the same shape: a closed map from schema field name to
//! a scalar [`FieldValue`], plus the two sender-confidence meta values that
//! the merge policy reads. The meta values are kept out of the field map so
//! the policy never has to re-parse them from text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Meta key carrying the model's sender-attribution confidence.
pub const SENDER_CONFIDENCE_KEY: &str = "senderConfidence";

/// Meta key carrying the model's justification for [`SENDER_CONFIDENCE_KEY`].
pub const SENDER_CONFIDENCE_REASON_KEY: &str = "senderConfidenceReason";

/// Field name → value, sorted by name.
pub type FieldMap = BTreeMap<String, FieldValue>;

// Blank strings and the textual nulls models like to emit.
static RE_NULL_SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:null|None)?\s*$").unwrap());

/// True for blank text and the literal strings `null` / `None`.
pub fn is_null_sentinel(s: &str) -> bool {
    RE_NULL_SENTINEL.is_match(s)
}

/// Scalar value of one field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Convert a JSON scalar. Arrays and objects have no field
    /// representation and yield `None`.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(FieldValue::Null),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(b)),
            serde_json::Value::Number(n) => Some(FieldValue::Number(n)),
            serde_json::Value::String(s) => Some(FieldValue::Text(s)),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Value::Number(n.clone()),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// True when the value carries information: not null, not blank text,
    /// not a textual `null` / `None`.
    pub fn is_present(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Text(s) => !is_null_sentinel(s),
            FieldValue::Bool(_) | FieldValue::Number(_) => true,
        }
    }

    /// Collapse uninformative values to [`FieldValue::Null`].
    pub fn normalized(&self) -> FieldValue {
        if self.is_present() {
            self.clone()
        } else {
            FieldValue::Null
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

/// Fields extracted from one page, as returned by an
/// [`crate::engine::ExtractionClient`].
///
/// Contains exactly one entry per schema data field.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PageExtraction {
    #[serde(flatten)]
    pub fields: FieldMap,

    #[serde(rename = "senderConfidence", skip_serializing_if = "Option::is_none")]
    pub sender_confidence: Option<f64>,

    #[serde(rename = "senderConfidenceReason", skip_serializing_if = "Option::is_none")]
    pub sender_confidence_reason: Option<String>,
}

impl PageExtraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldValue::Null);
        self
    }

    pub fn with_confidence(mut self, confidence: f64, reason: impl Into<String>) -> Self {
        self.sender_confidence = Some(confidence);
        self.sender_confidence_reason = Some(reason.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// The record as a key-sorted JSON object, meta keys included.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        canonical_json(
            &self.fields,
            self.sender_confidence,
            self.sender_confidence_reason.as_deref(),
        )
    }
}

/// Best-known value of every field after some prefix of the pages.
///
/// Each page step produces a fresh state (see [`crate::engine::merge`]);
/// the previous state is never mutated in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AccumulatedState {
    #[serde(flatten)]
    pub fields: FieldMap,

    #[serde(rename = "senderConfidence")]
    pub sender_confidence: Option<f64>,

    #[serde(rename = "senderConfidenceReason")]
    pub sender_confidence_reason: Option<String>,
}

impl AccumulatedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.sender_confidence.is_none()
            && self.sender_confidence_reason.is_none()
    }

    /// Replace every blank / textual-null value with an explicit null.
    ///
    /// Idempotent: normalising a normalised state is a no-op.
    pub fn normalized(&self) -> AccumulatedState {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.normalized()))
            .collect();
        let reason = self
            .sender_confidence_reason
            .as_ref()
            .filter(|r| !is_null_sentinel(r))
            .cloned();
        AccumulatedState {
            fields,
            sender_confidence: self.sender_confidence,
            sender_confidence_reason: reason,
        }
    }

    /// Key-sorted JSON with both meta keys always present (null when unknown).
    pub fn to_canonical_json(&self) -> serde_json::Value {
        let mut json = canonical_json(
            &self.fields,
            self.sender_confidence,
            self.sender_confidence_reason.as_deref(),
        );
        if let Some(map) = json.as_object_mut() {
            for key in [SENDER_CONFIDENCE_KEY, SENDER_CONFIDENCE_REASON_KEY] {
                map.entry(key).or_insert(serde_json::Value::Null);
            }
        }
        json
    }
}

fn canonical_json(
    fields: &FieldMap,
    confidence: Option<f64>,
    reason: Option<&str>,
) -> serde_json::Value {
    // serde_json::Map is a BTreeMap without `preserve_order`, so keys come out sorted.
    let mut map: serde_json::Map<String, serde_json::Value> =
        fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    if let Some(c) = confidence {
        map.insert(SENDER_CONFIDENCE_KEY.to_string(), serde_json::json!(c));
    }
    if let Some(r) = reason {
        map.insert(
            SENDER_CONFIDENCE_REASON_KEY.to_string(),
            serde_json::Value::String(r.to_string()),
        );
    }
    serde_json::Value::Object(map)
}
