//! Model response → validated [`PageExtraction`].
//!
//! Models wrap their JSON in prose, markdown fences or both. Rather than
//! trimming known prefixes, we find the first balanced `{…}` span (skipping
//! braces inside string literals) and parse exactly that span. If it is not
//! a valid JSON object the page fails; later spans are never tried. The
//! object is then checked against the schema: unknown, repeated and missing
//! required keys fail the page, non-scalar values fail the page, and only
//! lossless coercions are applied.

use crate::error::ExtractionFailure;
use crate::record::{FieldValue, PageExtraction, SENDER_CONFIDENCE_KEY, SENDER_CONFIDENCE_REASON_KEY};
use crate::schema::{FieldDescriptor, FieldSchema, FieldType};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Byte range of the first balanced `{…}` span that starts at an unquoted `{`.
fn first_balanced_span(raw: &str) -> Option<(usize, usize)> {
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            // Quotes only matter inside an object; prose apostrophes and
            // stray quotes before the JSON must not hide it.
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Top-level members of a JSON object in document order, repeats kept.
struct ObjectEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for ObjectEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ObjectEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ObjectEntries, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(ObjectEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Locate and parse the first JSON object embedded in `raw`.
///
/// Returns the object's members in document order; a key the model wrote
/// twice appears twice.
pub fn locate_json_object(raw: &str) -> Result<Vec<(String, Value)>, String> {
    let (s, e) =
        first_balanced_span(raw).ok_or_else(|| "no balanced JSON object found".to_string())?;
    serde_json::from_str::<ObjectEntries>(&raw[s..e])
        .map(|entries| entries.0)
        .map_err(|err| err.to_string())
}

/// Parse and validate one page's raw model output.
pub fn parse_page_response(
    raw: &str,
    schema: &FieldSchema,
    page: usize,
) -> Result<PageExtraction, ExtractionFailure> {
    if raw.trim().is_empty() {
        return Err(ExtractionFailure::EmptyResponse { page });
    }

    let entries = locate_json_object(raw)
        .map_err(|detail| ExtractionFailure::MalformedResponse { page, detail })?;

    let mut map = Map::new();
    let mut duplicated: Vec<String> = Vec::new();
    for (key, value) in entries {
        if map.contains_key(&key) {
            if !duplicated.contains(&key) {
                duplicated.push(key);
            }
        } else {
            map.insert(key, value);
        }
    }

    let confidence_raw = map.remove(SENDER_CONFIDENCE_KEY);
    let reason_raw = map.remove(SENDER_CONFIDENCE_REASON_KEY);

    let unexpected: Vec<String> = map
        .keys()
        .filter(|k| !schema.contains(k))
        .cloned()
        .collect();
    let missing: Vec<String> = schema
        .data_fields()
        .filter(|(k, d)| d.is_required() && !map.contains_key(*k))
        .map(|(k, _)| k.to_string())
        .collect();
    if !unexpected.is_empty() || !missing.is_empty() || !duplicated.is_empty() {
        return Err(ExtractionFailure::SchemaViolation {
            page,
            unexpected,
            missing,
            duplicated,
        });
    }

    let mut extraction = PageExtraction::new();
    for (name, descriptor) in schema.data_fields() {
        let value = match map.remove(name) {
            Some(v) => FieldValue::from_json(v).ok_or_else(|| ExtractionFailure::NonScalarValue {
                page,
                field: name.to_string(),
            })?,
            None => FieldValue::Null,
        };
        extraction
            .fields
            .insert(name.to_string(), coerce(name, value, descriptor, page));
    }

    extraction.sender_confidence = confidence_raw.and_then(|v| parse_confidence(&v, page));
    extraction.sender_confidence_reason = reason_raw.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    });

    debug!(
        "Page {}: parsed {} fields, sender confidence {:?}",
        page,
        extraction.fields.len(),
        extraction.sender_confidence
    );
    Ok(extraction)
}

/// Accept numbers and numeric strings; clamp to [0, 1].
fn parse_confidence(v: &Value, page: usize) -> Option<f64> {
    let c = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite());
    if c.is_none() && !v.is_null() {
        warn!("Page {}: ignoring unreadable senderConfidence {}", page, v);
    }
    c.map(|c| c.clamp(0.0, 1.0))
}

/// Apply the lossless coercions for the field's declared type.
fn coerce(name: &str, value: FieldValue, descriptor: &FieldDescriptor, page: usize) -> FieldValue {
    match (descriptor.field_type, value) {
        (FieldType::Number, FieldValue::Text(s)) => {
            match serde_json::from_str::<serde_json::Number>(s.trim()) {
                Ok(n) => FieldValue::Number(n),
                Err(_) => FieldValue::Text(s),
            }
        }
        (FieldType::Boolean, FieldValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::Text(s),
        },
        (FieldType::Select, FieldValue::Null) => FieldValue::Null,
        (FieldType::Select, v) => {
            let options = descriptor.options.as_deref().unwrap_or_default();
            if options.is_empty() {
                return v;
            }
            let wanted = v.to_string();
            let wanted = wanted.trim();
            match options.iter().find(|o| o.trim().eq_ignore_ascii_case(wanted)) {
                Some(option) => FieldValue::Text(option.clone()),
                None if !v.is_present() => FieldValue::Null,
                None => {
                    warn!(
                        "Page {}: '{}' is not an option of select field '{}'; using null",
                        page, wanted, name
                    );
                    FieldValue::Null
                }
            }
        }
        (_, v) => v,
    }
}
