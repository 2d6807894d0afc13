//! Configuration types for bill extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is immutable once built and
//! is shared by every request the service handles.

use crate::error::BillError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default vision model.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default provider name passed to `ProviderFactory`.
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Configuration for a bill extraction service.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_bill2json::{AmountPolicy, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .model("claude-sonnet-4-20250514")
///     .api_timeout_secs(90)
///     .amount_policy(AmountPolicy::Strict)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier. Default: [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name ("anthropic", "openai", "gemini", "ollama", …).
    /// Default: [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model to report what it sees, not to improvise.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one bill. Default: 4096.
    ///
    /// A long pharmacy bill can run past 2 000 output tokens of JSON; a
    /// truncated reply fails to parse and surfaces as an extraction failure.
    pub max_tokens: usize,

    /// Retry attempts on a failed model call. Default: 0 (single attempt).
    ///
    /// Only the call itself is retried. A reply that is not valid JSON is
    /// returned as a failure immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Document download timeout in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Per-call model timeout in seconds. Default: None (provider default).
    pub api_timeout_secs: Option<u64>,

    /// How reconciliation treats non-numeric amounts. Default: lenient.
    pub amount_policy: AmountPolicy,

    /// Mark structurally identical items on the same page as suspicious.
    /// Default: false.
    pub flag_duplicates: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            prompt: None,
            download_timeout_secs: 30,
            api_timeout_secs: None,
            amount_policy: AmountPolicy::default(),
            flag_duplicates: false,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("amount_policy", &self.amount_policy)
            .field("flag_duplicates", &self.flag_duplicates)
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

    /// The model that will be requested.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The provider that will be resolved when no pre-built one is set.
    pub fn provider_label(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
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

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn amount_policy(mut self, policy: AmountPolicy) -> Self {
        self.config.amount_policy = policy;
        self
    }

    pub fn flag_duplicates(mut self, v: bool) -> Self {
        self.config.flag_duplicates = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, BillError> {
        let c = &self.config;
        if c.download_timeout_secs == 0 {
            return Err(BillError::InvalidConfig(
                "Download timeout must be ≥ 1 second".into(),
            ));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(BillError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(BillError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.prompt.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(BillError::InvalidConfig("Prompt must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How reconciliation treats an `item_amount` that is not a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmountPolicy {
    /// Keep the item with a null amount, mark it suspicious and sum the
    /// rest. (default)
    #[default]
    Lenient,
    /// Fail the request with [`BillError::InvalidAmount`].
    Strict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.download_timeout_secs, 30);
        assert_eq!(c.api_timeout_secs, None);
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.max_tokens, 4096);
        assert_eq!(c.amount_policy, AmountPolicy::Lenient);
        assert!(!c.flag_duplicates);
        assert_eq!(c.model_name(), DEFAULT_MODEL);
        assert_eq!(c.provider_label(), DEFAULT_PROVIDER);
    }

    #[test]
    fn builder_sets_fields() {
        let c = assert_ok!(ExtractionConfig::builder()
            .model("gpt-4.1")
            .provider_name("openai")
            .temperature(5.0)
            .api_timeout_secs(45)
            .flag_duplicates(true)
            .amount_policy(AmountPolicy::Strict)
            .build());
        assert_eq!(c.model_name(), "gpt-4.1");
        assert_eq!(c.provider_label(), "openai");
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.api_timeout_secs, Some(45));
        assert!(c.flag_duplicates);
        assert_eq!(c.amount_policy, AmountPolicy::Strict);
    }

    #[test]
    fn builder_rejects_zero_timeouts() {
        assert_err!(ExtractionConfig::builder().download_timeout_secs(0).build());
        assert_err!(ExtractionConfig::builder().api_timeout_secs(0).build());
    }

    #[test]
    fn builder_rejects_blank_prompt() {
        let err = ExtractionConfig::builder().prompt("   ").build().unwrap_err();
        assert!(err.to_string().contains("Prompt"));
    }

    #[test]
    fn debug_hides_provider() {
        let dbg = format!("{:?}", ExtractionConfig::default());
        assert!(dbg.contains("ExtractionConfig"));
        assert!(dbg.contains("amount_policy"));
    }
}
