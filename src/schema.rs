//! Caller-supplied field schema.
//!
//! The schema is the closed field-name space for a whole run: the model is
//! asked to fill exactly these keys, page extractions are validated against
//! them, and the accumulated record carries one value per key. It is
//! deserialised from the same JSON shape the form front-end sends:
//!
//! ```json
//! {
//!   "letterDate": { "type": "date", "required": true },
//!   "deliveryMode": { "type": "select", "options": ["Electronic", "Physical"] },
//!   "name": { "type": "text", "currentValue": null }
//! }
//! ```

use crate::error::Letter2JsonError;
use crate::record::{SENDER_CONFIDENCE_KEY, SENDER_CONFIDENCE_REASON_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Number,
    #[serde(alias = "checkbox")]
    Boolean,
    /// One of the descriptor's `options`.
    Select,
    /// Free text. Unknown type names also land here.
    #[default]
    #[serde(other)]
    Text,
}

/// Per-field metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    /// `null` in the incoming JSON means "not required".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,

    /// Form default the model may fall back to when the page is silent.
    #[serde(
        rename = "currentValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_value: Option<serde_json::Value>,
}

impl FieldDescriptor {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }
}

/// Mapping from unique field name to its descriptor.
///
/// Backed by a `BTreeMap`, so iteration order (and therefore every derived
/// ordering: prompt rendering, summaries, output) is the sorted key order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests and examples.
    pub fn with_field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }

    /// Parse and validate a schema from its JSON form.
    pub fn from_json_str(json: &str) -> Result<Self, Letter2JsonError> {
        let schema: FieldSchema = serde_json::from_str(json)
            .map_err(|e| Letter2JsonError::InvalidSchema(format!("not a valid schema document: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Reject schemas that cannot drive an extraction.
    pub fn validate(&self) -> Result<(), Letter2JsonError> {
        if self.data_fields().next().is_none() {
            return Err(Letter2JsonError::InvalidSchema(
                "schema declares no extractable fields".into(),
            ));
        }
        if let Some(name) = self.fields.keys().find(|k| k.trim().is_empty()) {
            return Err(Letter2JsonError::InvalidSchema(format!(
                "field name {name:?} is blank"
            )));
        }
        for (name, desc) in &self.fields {
            if let Some(opts) = &desc.options {
                if desc.field_type == FieldType::Select && opts.is_empty() {
                    return Err(Letter2JsonError::InvalidSchema(format!(
                        "select field '{name}' has an empty options list"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fields that carry extracted values, i.e. everything except the
    /// sender-confidence meta keys, which some schemas list explicitly.
    pub fn data_fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.iter()
            .filter(|(k, _)| *k != SENDER_CONFIDENCE_KEY && *k != SENDER_CONFIDENCE_REASON_KEY)
    }

    /// Pretty JSON for inclusion in the model prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
