//! Prompts for per-page letter extraction and document summaries.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the user message is
//! always built by [`page_user_message`] because the response parser depends
//! on its contract (one flat JSON object, schema keys only).

use crate::record::{SENDER_CONFIDENCE_KEY, SENDER_CONFIDENCE_REASON_KEY};
use crate::schema::FieldSchema;

/// Default system prompt for extracting one page of a multi-page letter.
pub const SEQUENTIAL_SYSTEM_PROMPT: &str = r#"You extract structured data from official letters, one page at a time.

For each page you receive:
1. the form schema: field names with type, required flag, options and currentValue
2. context from earlier pages: a summary of every processed page, the recent
   sender-confidence history and the previous page's JSON

FIELD RULES
- Extract from the current page first. If the page is silent on a field, use
  the field's currentValue if one is given, else the previous page's value,
  else null.
- text: copy exactly as written.
- date: keep the original format ("15 July 2024"); never fix or infer.
- number: digits only, as written.
- boolean: true or false only when the page states it or it is visually clear.
- select: the closest option from the list, or null if none fits.
- letterRefNo and letterDate belong to THIS letter, not to letters it cites.

SENDER RULES
- Sender fields (name, designation, organisation, contact details, address)
  come ONLY from the signature block: a signature, a typed name with "Sd/-",
  or a digital-signature marker near the end of the letter.
- Ignore names in headers, footers, CC lists, the body or quoted letters.
- Always report senderConfidence (0.0 to 1.0) and senderConfidenceReason.

OUTPUT
- A single flat JSON object containing every schema key exactly once plus
  senderConfidence and senderConfidenceReason.
- null for missing values, never "".
- No extra keys, no commentary, no markdown outside the JSON."#;

/// System prompt for a whole-document summary over every page image at once.
pub const DOCUMENT_SUMMARY_PROMPT: &str = r#"You read scanned documents. You are given every page of one document as images, in order.

Write a plain-text summary of the whole document:
- what it is, who sent it, to whom, when, and its reference number if any
- the substance of the request, decision or information it carries
- any deadlines, amounts or actions required

Then describe every image, stamp, seal, signature, table or chart in the
document in detail, naming the page it appears on.

Report only what the pages show. Do not invent missing details."#;

/// System prompt for describing a single page.
pub const PAGE_DESCRIPTION_PROMPT: &str = r#"You read one page of a scanned document.

Summarise the text on this page in a few sentences, then describe every
image, stamp, seal, signature, table or chart on it in detail.

Report only what the page shows."#;

/// User text accompanying the page images of a summary request.
pub fn summary_user_message(first_page: usize, page_count: usize) -> String {
    if page_count == 1 {
        format!("Page {first_page} of the document is attached.")
    } else {
        format!(
            "Pages {}-{} of the document are attached, in order.",
            first_page,
            first_page + page_count - 1
        )
    }
}

/// Build the text part of the user message for one page.
pub fn page_user_message(schema: &FieldSchema, context: &str) -> String {
    format!(
        "FORM SCHEMA TO POPULATE:\n{}\n\nAlso include \"{}\" (number 0.0-1.0) and \"{}\" (string).\n\nCONTEXT:\n{}",
        schema.to_prompt_json(),
        SENDER_CONFIDENCE_KEY,
        SENDER_CONFIDENCE_REASON_KEY,
        context
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FieldType};

    #[test]
    fn user_message_carries_schema_and_context() {
        let schema = FieldSchema::new().with_field(
            "deliveryMode",
            FieldDescriptor::new(FieldType::Select).with_options(["Electronic", "Physical"]),
        );
        let msg = page_user_message(&schema, "Page 2 of 3.");
        assert!(msg.contains("\"deliveryMode\""));
        assert!(msg.contains("\"Physical\""));
        assert!(msg.contains("senderConfidenceReason"));
        assert!(msg.ends_with("CONTEXT:\nPage 2 of 3."));
    }

    #[test]
    fn system_prompt_demands_flat_json() {
        assert!(SEQUENTIAL_SYSTEM_PROMPT.contains("single flat JSON object"));
        assert!(SEQUENTIAL_SYSTEM_PROMPT.contains("signature block"));
    }

    #[test]
    fn summary_message_names_page_span() {
        assert_eq!(summary_user_message(1, 1), "Page 1 of the document is attached.");
        assert_eq!(
            summary_user_message(1, 4),
            "Pages 1-4 of the document are attached, in order."
        );
    }
}
