//! Configuration types for letter extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Setters clamp to sane ranges; `build()`
//! rejects combinations that cannot drive a run.

use crate::engine::client::ExtractionClient;
use crate::engine::context::DEFAULT_CONFIDENCE_WINDOW;
use crate::engine::merge::MergePolicy;
use crate::engine::summary::DEFAULT_ITEM_CAP;
use crate::error::Letter2JsonError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for one letter extraction.
///
/// # Example
/// ```rust
/// use edgequake_letter2json::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .model("gpt-4.1-mini")
///     .require_success(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    ///
    /// Stamps, handwritten diary numbers and small letterhead print read
    /// noticeably better at 200 DPI; raise it for poor scans.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extraction client. Takes precedence over every
    /// provider setting; the model is never contacted directly.
    pub client: Option<Arc<dyn ExtractionClient>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction wants the same answer every time for the same page.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Maximum retry attempts on a provider error. Default: 3.
    ///
    /// Unparsable or schema-violating responses are not retried; they fail
    /// the page immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Per-page model-call timeout in seconds, retries included. Default: 120.
    pub api_timeout_secs: u64,

    /// Sender-confidence thresholds used by the merge step.
    pub merge_policy: MergePolicy,

    /// Maximum `field: value` items in a page summary. Default: 15.
    pub summary_item_cap: usize,

    /// Number of trailing confidence records shown to the model. Default: 3.
    pub confidence_history_window: usize,

    /// Fail the run with [`Letter2JsonError::NoPagesExtracted`] when every
    /// attempted page failed. Default: false (return the empty record).
    pub require_success: bool,

    /// Per-page progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            client: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            system_prompt: None,
            pages: PageSelection::default(),
            api_timeout_secs: 120,
            merge_policy: MergePolicy::default(),
            summary_item_cap: DEFAULT_ITEM_CAP,
            confidence_history_window: DEFAULT_CONFIDENCE_WINDOW,
            require_success: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("client", &self.client.as_ref().map(|_| "<dyn ExtractionClient>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("pages", &self.pages)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("merge_policy", &self.merge_policy)
            .field("summary_item_cap", &self.summary_item_cap)
            .field("confidence_history_window", &self.confidence_history_window)
            .field("require_success", &self.require_success)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn client(mut self, client: Arc<dyn ExtractionClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn summary_item_cap(mut self, n: usize) -> Self {
        self.config.summary_item_cap = n.max(1);
        self
    }

    pub fn confidence_history_window(mut self, n: usize) -> Self {
        self.config.confidence_history_window = n;
        self
    }

    pub fn require_success(mut self, v: bool) -> Self {
        self.config.require_success = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Letter2JsonError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Letter2JsonError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        let p = &c.merge_policy;
        let unit = 0.0..=1.0;
        for (name, v) in [
            ("retain_gap", p.retain_gap),
            ("retain_floor", p.retain_floor),
            ("adopt_margin", p.adopt_margin),
            ("default_confidence", p.default_confidence),
        ] {
            if !unit.contains(&v) {
                return Err(Letter2JsonError::InvalidConfig(format!(
                    "merge policy {name} must be within 0.0–1.0, got {v}"
                )));
            }
        }
        if let PageSelection::Range(start, end) = c.pages {
            if start == 0 || end < start {
                return Err(Letter2JsonError::InvalidConfig(format!(
                    "page range {start}-{end} is empty or not 1-indexed"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Specifies which pages of the PDF to extract from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Parse the CLI form: `all`, `3`, `2-5` or `1,3,7`.
    pub fn parse(s: &str) -> Result<Self, Letter2JsonError> {
        let s = s.trim();
        let bad = || Letter2JsonError::InvalidConfig(format!("invalid page selection '{s}'"));
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        if let Some((a, b)) = s.split_once('-') {
            let start = a.trim().parse().map_err(|_| bad())?;
            let end = b.trim().parse().map_err(|_| bad())?;
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            let pages = s
                .split(',')
                .map(|p| p.trim().parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| bad())?;
            return Ok(PageSelection::Set(pages));
        }
        s.parse().map(PageSelection::Single).map_err(|_| bad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.summary_item_cap, 15);
        assert_eq!(c.confidence_history_window, 3);
        assert!(!c.require_success);
        assert_eq!(c.merge_policy, MergePolicy::default());
    }

    #[test]
    fn setters_clamp() {
        let c = ExtractionConfig::builder()
            .dpi(1000)
            .temperature(5.0)
            .summary_item_cap(0)
            .api_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.summary_item_cap, 1);
        assert_eq!(c.api_timeout_secs, 1);
    }

    #[test]
    fn out_of_range_policy_is_rejected() {
        let err = ExtractionConfig::builder()
            .merge_policy(MergePolicy {
                retain_floor: 1.5,
                ..MergePolicy::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Letter2JsonError::InvalidConfig(_)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(ExtractionConfig::builder()
            .pages(PageSelection::Range(5, 2))
            .build()
            .is_err());
    }

    #[test]
    fn page_selection_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(2).to_indices(3), vec![1]);
        assert!(PageSelection::Single(9).to_indices(3).is_empty());
        assert_eq!(PageSelection::Range(2, 10).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3, 8]).to_indices(4), vec![0, 2]);
    }

    #[test]
    fn page_selection_parses_cli_forms() {
        assert_eq!(PageSelection::parse("all").unwrap(), PageSelection::All);
        assert_eq!(PageSelection::parse("4").unwrap(), PageSelection::Single(4));
        assert_eq!(PageSelection::parse("2-5").unwrap(), PageSelection::Range(2, 5));
        assert_eq!(
            PageSelection::parse("1, 3,7").unwrap(),
            PageSelection::Set(vec![1, 3, 7])
        );
        assert!(PageSelection::parse("x-2").is_err());
    }
}
