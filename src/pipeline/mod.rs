//! Pipeline stages around the engine: getting pages in and model answers out.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ [engine] ──▶ llm ──▶ parse
//! (path)    (pdfium)   (base64)               (VLM)    (JSON → record)
//! ```
//!
//! 1. [`input`]  — validate the path and PDF magic bytes
//! 2. [`render`] — rasterise selected pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`] — PNG-encode and base64-wrap each page
//! 4. [`llm`]    — the vision [`crate::engine::ExtractionClient`], with
//!    retry/backoff; the only stage with network I/O
//! 5. [`parse`]  — locate the JSON object in the reply and validate it
//!    against the schema

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
