//! VLM interaction: the [`ExtractionClient`] backed by an edgequake-llm
//! provider.
//!
//! ## Message Layout
//!
//! 1. **System message** — the extraction prompt (or user-supplied override)
//! 2. **User message** — schema JSON + assembled context as text, with the
//!    page PNG attached
//!
//! Summary requests ([`SummaryClient`]) go through the same retry loop with
//! the summary prompt as system message and every page image attached.
//!
//! ## Retry Strategy
//!
//! Only provider errors (HTTP 429 / 5xx, network) are retried, with
//! exponential backoff `retry_backoff_ms * 2^(attempt-1)`: 500 ms → 1 s → 2 s.
//! A response that arrives but cannot be parsed fails the page at once;
//! asking again at temperature 0 would mostly reproduce it.

use crate::config::ExtractionConfig;
use crate::engine::client::{ExtractionClient, PageImage};
use crate::error::ExtractionFailure;
use crate::pipeline::parse::parse_page_response;
use crate::prompts::{page_user_message, summary_user_message, SEQUENTIAL_SYSTEM_PROMPT};
use crate::record::PageExtraction;
use crate::schema::FieldSchema;
use crate::summarize::SummaryClient;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Token totals across every call a client made.
#[derive(Debug, Default)]
pub struct TokenUsage {
    input: AtomicU64,
    output: AtomicU64,
}

impl TokenUsage {
    pub fn input_tokens(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    fn add(&self, input: u64, output: u64) {
        self.input.fetch_add(input, Ordering::Relaxed);
        self.output.fetch_add(output, Ordering::Relaxed);
    }
}

/// Sends one page image plus context to a vision model and parses the answer.
pub struct VisionExtractionClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    usage: Arc<TokenUsage>,
}

impl fmt::Debug for VisionExtractionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionExtractionClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl VisionExtractionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| SEQUENTIAL_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            usage: Arc::new(TokenUsage::default()),
        }
    }

    /// Shared handle to this client's token counters.
    pub fn usage(&self) -> Arc<TokenUsage> {
        Arc::clone(&self.usage)
    }

    async fn extract_page(
        &self,
        page: &PageImage,
        schema: &FieldSchema,
        context: &str,
    ) -> Result<PageExtraction, ExtractionFailure> {
        let page_num = page.page_num;
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(
                page_user_message(schema, context),
                vec![page.image.clone()],
            ),
        ];

        let content = self.complete(page_num, &messages).await?;
        parse_page_response(&content, schema, page_num)
    }

    /// One chat call with retry/backoff on provider errors; returns the
    /// reply text. Failures are attributed to `page_num`.
    async fn complete(
        &self,
        page_num: usize,
        messages: &[ChatMessage],
    ) -> Result<String, ExtractionFailure> {
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(messages, Some(&self.options)).await {
                Ok(response) => {
                    self.usage
                        .add(response.prompt_tokens as u64, response.completion_tokens as u64);
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ExtractionFailure::LlmFailed {
            page: page_num,
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

impl ExtractionClient for VisionExtractionClient {
    fn extract<'a>(
        &'a self,
        page: &'a PageImage,
        schema: &'a FieldSchema,
        context: &'a str,
    ) -> BoxFuture<'a, Result<PageExtraction, ExtractionFailure>> {
        self.extract_page(page, schema, context).boxed()
    }
}

impl SummaryClient for VisionExtractionClient {
    fn summarize<'a>(
        &'a self,
        first_page: usize,
        images: &'a [ImageData],
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, ExtractionFailure>> {
        async move {
            let messages = vec![
                ChatMessage::system(instruction),
                ChatMessage::user_with_images(
                    summary_user_message(first_page, images.len()),
                    images.to_vec(),
                ),
            ];
            let text = self.complete(first_page, &messages).await?;
            let text = text.trim();
            if text.is_empty() {
                return Err(ExtractionFailure::EmptyResponse { page: first_page });
            }
            Ok(text.to_string())
        }
        .boxed()
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
