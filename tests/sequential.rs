//! Offline integration tests for the document pipeline.
//!
//! Rendering and the model are replaced by in-memory fakes, so these run
//! without pdfium or network access:
//!   cargo test --test sequential

use edgequake_letter2json::pipeline::encode::page_from_png;
use edgequake_letter2json::{
    extract_document, CancellationToken, ExtractionClient, ExtractionConfig, ExtractionFailure,
    ExtractionProgressCallback, FieldDescriptor, FieldSchema, FieldType, FieldValue,
    Letter2JsonError, PageExtraction, PageImage, PageRenderer,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Hands back `n` tiny pages, or a render error.
struct FakeRenderer {
    pages: usize,
    fail: bool,
}

impl FakeRenderer {
    fn pages(n: usize) -> Self {
        Self { pages: n, fail: false }
    }
}

impl PageRenderer for FakeRenderer {
    fn render<'a>(
        &'a self,
        _pdf_path: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<PageImage>, Letter2JsonError>> {
        async move {
            if self.fail {
                return Err(Letter2JsonError::CorruptPdf {
                    path: "letter.pdf".into(),
                    detail: "xref table damaged".into(),
                });
            }
            Ok((1..=self.pages)
                .map(|n| page_from_png(b"\x89PNG fake", n, n))
                .collect())
        }
        .boxed()
    }
}

/// Replays canned responses in order and records the context of every call.
struct ScriptedClient {
    responses: Mutex<VecDeque<Result<PageExtraction, ExtractionFailure>>>,
    contexts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    /// Fires this token when the given call number (1-based) starts.
    cancel_on_call: Option<(usize, CancellationToken)>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<PageExtraction, ExtractionFailure>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            contexts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            cancel_on_call: None,
        })
    }

    fn cancelling(
        responses: Vec<Result<PageExtraction, ExtractionFailure>>,
        call: usize,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            contexts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            cancel_on_call: Some((call, token)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExtractionClient for ScriptedClient {
    fn extract<'a>(
        &'a self,
        _page: &'a PageImage,
        _schema: &'a FieldSchema,
        context: &'a str,
    ) -> BoxFuture<'a, Result<PageExtraction, ExtractionFailure>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts.lock().unwrap().push(context.to_string());
        if let Some((n, ref token)) = self.cancel_on_call {
            if n == call {
                token.cancel();
                // Never resolves; the extractor must drop it.
                return futures::future::pending().boxed();
            }
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("more calls than scripted responses");
        async move { next }.boxed()
    }
}

/// Records the callback sequence as short strings.
#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ExtractionProgressCallback for EventLog {
    fn on_extraction_start(&self, total_pages: usize) {
        self.0.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.0.lock().unwrap().push(format!("page {page_num}"));
    }
    fn on_page_merged(&self, page_num: usize, _total_pages: usize, _confidence: Option<f64>) {
        self.0.lock().unwrap().push(format!("merged {page_num}"));
    }
    fn on_page_error(&self, page_num: usize, _total_pages: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("error {page_num}"));
    }
    fn on_extraction_complete(&self, total_pages: usize, merged_count: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("done {merged_count}/{total_pages}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn letter_schema() -> FieldSchema {
    FieldSchema::new()
        .with_field("name", FieldDescriptor::new(FieldType::Text))
        .with_field("designation", FieldDescriptor::new(FieldType::Text))
        .with_field("letterDate", FieldDescriptor::new(FieldType::Date))
        .with_field("subject", FieldDescriptor::new(FieldType::Text))
}

async fn run(
    renderer: &FakeRenderer,
    client: Arc<ScriptedClient>,
    config: &ExtractionConfig,
    cancel: &CancellationToken,
) -> Result<edgequake_letter2json::ExtractionOutput, Letter2JsonError> {
    extract_document(
        renderer,
        client,
        Path::new("letter.pdf"),
        &letter_schema(),
        config,
        cancel,
    )
    .await
}

fn signature_page() -> PageExtraction {
    PageExtraction::new()
        .with_field("name", "A. Kumar")
        .with_field("designation", "Executive Engineer")
        .with_field("letterDate", "2024-03-01")
        .with_field("subject", "Road repair")
        .with_confidence(1.0, "signature block")
}

fn cc_page() -> PageExtraction {
    PageExtraction::new()
        .with_field("name", "B. Singh")
        .with_null("designation")
        .with_null("letterDate")
        .with_field("subject", "Road repair, ward 7")
        .with_confidence(0.4, "cc list")
}

fn malformed(page: usize) -> ExtractionFailure {
    ExtractionFailure::MalformedResponse {
        page,
        detail: "no JSON object found".into(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn strong_signature_survives_weaker_cc_page() {
    let client = ScriptedClient::new(vec![Ok(signature_page()), Ok(cc_page())]);
    let out = run(
        &FakeRenderer::pages(2),
        client.clone(),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let record = out.record_json();
    assert_eq!(record["name"], "A. Kumar");
    assert_eq!(record["designation"], "Executive Engineer");
    assert_eq!(record["letterDate"], "2024-03-01");
    assert_eq!(record["subject"], "Road repair, ward 7");
    assert_eq!(record["senderConfidence"], 1.0);
    assert_eq!(record["senderConfidenceReason"], "signature block");

    assert_eq!(out.stats.merged_pages, 2);
    assert_eq!(out.confidence_history.len(), 2);
    assert_eq!(out.best_page_confidence.map(|r| r.page), Some(1));

    // Page 2 saw page 1's structured result.
    let contexts = client.contexts.lock().unwrap();
    assert!(contexts[1].contains("A. Kumar"));
}

#[tokio::test]
async fn failed_middle_page_matches_run_without_it() {
    let page3 = PageExtraction::new()
        .with_field("subject", "Road repair (revised)")
        .with_confidence(0.3, "footer only");

    let with_failure = ScriptedClient::new(vec![
        Ok(signature_page()),
        Err(malformed(2)),
        Ok(page3.clone()),
    ]);
    let out3 = run(
        &FakeRenderer::pages(3),
        with_failure.clone(),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let without = ScriptedClient::new(vec![Ok(signature_page()), Ok(page3)]);
    let out2 = run(
        &FakeRenderer::pages(2),
        without,
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(out3.fields, out2.fields);
    assert_eq!(out3.stats.attempted_pages, 3);
    assert_eq!(out3.stats.merged_pages, 2);
    assert_eq!(out3.stats.failed_pages, 1);
    assert_eq!(out3.failures[0].page, 2);
    assert_eq!(out3.pages.len(), 3);
    assert!(out3.pages[1].text.starts_with("processing failed"));

    // Page 3 gets page 1 as its previous result and page 2's failure summary.
    let contexts = with_failure.contexts.lock().unwrap();
    assert!(contexts[2].contains("A. Kumar"));
    assert!(contexts[2].contains("processing failed"));
}

#[test]
fn empty_document_returns_empty_record_without_calls() {
    let client = ScriptedClient::new(vec![]);
    let out = tokio_test::block_on(run(
        &FakeRenderer::pages(0),
        client.clone(),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    ))
    .unwrap();

    assert_eq!(client.calls(), 0);
    assert_eq!(out.stats.total_pages, 0);
    assert!(out.fields.is_empty());
    assert!(out.pages.is_empty());
}

#[tokio::test]
async fn render_failure_is_fatal_and_skips_the_model() {
    let client = ScriptedClient::new(vec![Ok(signature_page())]);
    let renderer = FakeRenderer {
        pages: 1,
        fail: true,
    };
    let err = run(
        &renderer,
        client.clone(),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Letter2JsonError::CorruptPdf { .. }));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn all_pages_failing_is_ok_unless_success_required() {
    let responses = || vec![Err(malformed(1)), Err(malformed(2))];

    let out = run(
        &FakeRenderer::pages(2),
        ScriptedClient::new(responses()),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(out.stats.merged_pages, 0);
    assert!(out.fields.is_empty());
    assert!(out.record_json()["senderConfidence"].is_null());

    let strict = ExtractionConfig::builder()
        .require_success(true)
        .build()
        .unwrap();
    let err = run(
        &FakeRenderer::pages(2),
        ScriptedClient::new(responses()),
        &strict,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    match err {
        Letter2JsonError::NoPagesExtracted {
            attempted,
            first_error,
        } => {
            assert_eq!(attempted, 2);
            assert!(first_error.contains("no JSON object found"));
        }
        other => panic!("expected NoPagesExtracted, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_keeps_pages_already_merged() {
    let token = CancellationToken::new();
    let client = ScriptedClient::cancelling(vec![Ok(signature_page())], 2, token.clone());

    let out = run(
        &FakeRenderer::pages(3),
        client.clone(),
        &ExtractionConfig::default(),
        &token,
    )
    .await
    .unwrap();

    assert!(out.stats.cancelled);
    assert_eq!(client.calls(), 2);
    assert_eq!(out.stats.attempted_pages, 1);
    assert_eq!(out.stats.merged_pages, 1);
    assert_eq!(out.pages.len(), 1);
    assert_eq!(
        out.fields.get("name"),
        Some(&FieldValue::Text("A. Kumar".into()))
    );
}

#[tokio::test]
async fn progress_events_arrive_in_page_order() {
    let log = Arc::new(EventLog::default());
    let config = ExtractionConfig::builder()
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let client = ScriptedClient::new(vec![
        Ok(signature_page()),
        Err(malformed(2)),
        Ok(cc_page()),
    ]);

    run(
        &FakeRenderer::pages(3),
        client,
        &config,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let events = log.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 3", "page 1", "merged 1", "page 2", "error 2", "page 3", "merged 3",
            "done 2/3",
        ]
    );
}

#[tokio::test]
async fn unscored_sender_gets_default_confidence() {
    let page = PageExtraction::new()
        .with_field("name", "C. Rao")
        .with_field("subject", "Water supply");
    let out = run(
        &FakeRenderer::pages(1),
        ScriptedClient::new(vec![Ok(page)]),
        &ExtractionConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let record = out.record_json();
    assert_eq!(record["name"], "C. Rao");
    assert_eq!(record["senderConfidence"], 0.5);
    assert_eq!(record["senderConfidenceReason"], "confidence not specified");
}
