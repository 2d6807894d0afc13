//! Extraction adapter: send the bill to the vision model, get JSON back.
//!
//! The rest of the crate only sees the [`BillExtractor`] trait: one method,
//! two outcomes. [`VisionExtractor`] is the production implementation on top
//! of an `edgequake_llm` provider; tests plug in canned replies instead.
//!
//! ## Retry Strategy
//!
//! Off by default: a failed call is reported once. With `max_retries > 0`
//! the call is retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt - 1)`, saturating). A reply that arrives but is not JSON is
//! never retried.

use crate::config::ExtractionConfig;
use crate::output::ResourceUsage;
use crate::pipeline::encode::encode_document;
use crate::pipeline::fetch::MediaType;
use crate::pipeline::postprocess::parse_json_reply;
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Result of one extraction call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The reply parsed as JSON. Its shape is not checked yet.
    Success { data: Value, usage: ResourceUsage },
    /// The call failed or the reply was not JSON.
    Failure { error: String, usage: ResourceUsage },
}

impl ExtractionOutcome {
    /// Build an outcome from the model's raw reply text.
    ///
    /// A reply that is not JSON still cost tokens, so the failure carries the
    /// call's real usage rather than zero.
    pub fn from_reply(reply: &str, usage: ResourceUsage) -> Self {
        match parse_json_reply(reply) {
            Ok(data) => ExtractionOutcome::Success { data, usage },
            Err(e) => {
                warn!("Model reply is not valid JSON: {}", e);
                ExtractionOutcome::Failure {
                    error: format!("model reply is not valid JSON: {e}"),
                    usage,
                }
            }
        }
    }
}

/// Anything that can turn a bill document into parsed JSON.
#[async_trait]
pub trait BillExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], media_type: MediaType) -> ExtractionOutcome;
}

/// Production extractor backed by a vision LLM.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    options: CompletionOptions,
    api_timeout: Option<Duration>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl VisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_PROMPT.to_string()),
            options: build_options(config),
            api_timeout: config.api_timeout_secs.map(Duration::from_secs),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// One call to the provider, bounded by the optional timeout.
    async fn call(&self, messages: &[ChatMessage]) -> Result<(String, ResourceUsage), String> {
        let request = self.provider.chat(messages, Some(&self.options));
        let response = match self.api_timeout {
            Some(limit) => timeout(limit, request)
                .await
                .map_err(|_| format!("model call timed out after {}s", limit.as_secs()))?,
            None => request.await,
        }
        .map_err(|e| e.to_string())?;

        let usage = ResourceUsage::new(
            response.prompt_tokens as u64,
            response.completion_tokens as u64,
        );
        Ok((response.content, usage))
    }
}

#[async_trait]
impl BillExtractor for VisionExtractor {
    async fn extract(&self, bytes: &[u8], media_type: MediaType) -> ExtractionOutcome {
        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            self.prompt.as_str(),
            vec![encode_document(bytes, media_type)],
        )];

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Extraction retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.call(&messages).await {
                Ok((reply, usage)) => {
                    info!(
                        "Model replied: {} input tokens, {} output tokens, {:?}",
                        usage.input_tokens,
                        usage.output_tokens,
                        start.elapsed()
                    );
                    debug!("Raw reply ({} chars)", reply.len());
                    return ExtractionOutcome::from_reply(&reply, usage);
                }
                Err(e) => {
                    warn!("Extraction attempt {} failed — {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        ExtractionOutcome::Failure {
            error: last_err.unwrap_or_else(|| "Unknown error".to_string()),
            usage: ResourceUsage::default(),
        }
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
