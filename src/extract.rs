//! Request-level entry points: fetch → extract → validate → aggregate.
//!
//! [`ExtractionService`] owns the immutable per-process state (HTTP client,
//! extractor, config) and turns one document URL into one
//! [`ResponseEnvelope`]. Each stage can end the request early with a failure
//! envelope; later stages never run after an earlier failure. The service is
//! the single catch-all boundary: nothing, not even a panic inside a stage,
//! escapes past [`ExtractionService::process`].

use crate::config::{AmountPolicy, ExtractionConfig};
use crate::error::BillError;
use crate::output::{ExtractionResult, ResourceUsage, ResponseEnvelope};
use crate::pipeline::aggregate::{
    count_items, flag_duplicates, flag_unreadable_amounts, reconcile_amount,
    reconcile_amount_strict,
};
use crate::pipeline::fetch::{DocumentFetcher, FetchedDocument, MediaType};
use crate::pipeline::llm::{BillExtractor, ExtractionOutcome, VisionExtractor};
use crate::pipeline::validate::validate;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The extraction pipeline, shared by every request.
pub struct ExtractionService {
    fetcher: DocumentFetcher,
    extractor: Arc<dyn BillExtractor>,
    config: ExtractionConfig,
    api_key_configured: bool,
}

impl ExtractionService {
    /// Build a service around an existing extractor.
    pub fn new(
        extractor: Arc<dyn BillExtractor>,
        config: ExtractionConfig,
    ) -> Result<Self, BillError> {
        let fetcher = DocumentFetcher::new(config.download_timeout_secs)?;
        let api_key_configured = config.provider.is_some() || api_key_present(config.provider_label());
        Ok(Self {
            fetcher,
            extractor,
            config,
            api_key_configured,
        })
    }

    /// Build a service backed by a vision LLM, resolving the provider from
    /// the config. Fails when the provider's API key is not set.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, BillError> {
        let provider = resolve_provider(&config)?;
        info!(
            "Using provider '{}' with model '{}'",
            config.provider_label(),
            config.model_name()
        );
        let extractor = Arc::new(VisionExtractor::new(provider, &config));
        Self::new(extractor, config)
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Whether the credentials the provider needs are present.
    pub fn api_key_configured(&self) -> bool {
        self.api_key_configured
    }

    /// Run the full pipeline for a document URL.
    pub async fn process(&self, url: &str) -> ResponseEnvelope {
        info!("Processing document: {}", url);
        guarded(async {
            match self.fetcher.fetch(url).await {
                Ok(doc) => self.run_extraction(doc).await,
                Err(e) => {
                    warn!("{}", e);
                    ResponseEnvelope::failure(e.to_string(), ResourceUsage::default())
                }
            }
        })
        .await
    }

    /// Run the pipeline on a document that is already in memory.
    pub async fn process_bytes(&self, bytes: Vec<u8>, media_type: MediaType) -> ResponseEnvelope {
        guarded(self.run_extraction(FetchedDocument { bytes, media_type })).await
    }

    async fn run_extraction(&self, doc: FetchedDocument) -> ResponseEnvelope {
        let start = Instant::now();
        let outcome = self.extractor.extract(&doc.bytes, doc.media_type).await;
        let envelope = assemble(outcome, &self.config);
        info!(
            "Request finished: success={}, {} tokens, {}ms",
            envelope.is_success,
            envelope.usage.total_tokens,
            start.elapsed().as_millis()
        );
        envelope
    }
}

/// Turn an extraction outcome into the response envelope.
pub fn assemble(outcome: ExtractionOutcome, config: &ExtractionConfig) -> ResponseEnvelope {
    let (mut data, usage) = match outcome {
        ExtractionOutcome::Success { data, usage } => (data, usage),
        ExtractionOutcome::Failure { error, usage } => {
            let e = BillError::Extraction(error);
            warn!("{}", e);
            return ResponseEnvelope::failure(e.to_string(), usage);
        }
    };

    match normalise(&mut data, config) {
        Ok(result) => ResponseEnvelope::success(result, usage),
        Err(e) => {
            warn!("{}", e);
            ResponseEnvelope::failure(e.to_string(), usage)
        }
    }
}

/// Validate, aggregate and type a parsed reply.
pub fn normalise(data: &mut Value, config: &ExtractionConfig) -> Result<ExtractionResult, BillError> {
    if !validate(data) {
        return Err(BillError::Validation);
    }

    if config.flag_duplicates {
        let flagged = flag_duplicates(data);
        if flagged > 0 {
            info!("Flagged {} duplicate items as suspicious", flagged);
        }
    }

    let total_item_count = count_items(data);
    let reconciled_amount = match config.amount_policy {
        AmountPolicy::Lenient => {
            flag_unreadable_amounts(data);
            reconcile_amount(data)
        }
        AmountPolicy::Strict => reconcile_amount_strict(data)?,
    };
    debug!(
        "{} items, reconciled amount {:.2}",
        total_item_count, reconciled_amount
    );

    // Model-supplied totals are untrusted and replaced below.
    if let Some(obj) = data.as_object_mut() {
        obj.remove("total_item_count");
        obj.remove("reconciled_amount");
    }
    let mut result: ExtractionResult = serde_json::from_value(data.take())
        .map_err(|e| BillError::Internal(format!("could not normalise extraction result: {e}")))?;
    result.total_item_count = total_item_count;
    result.reconciled_amount = reconciled_amount;
    Ok(result)
}

/// Run a stage future, converting a panic into an internal-error envelope.
async fn guarded<F>(stage: F) -> ResponseEnvelope
where
    F: Future<Output = ResponseEnvelope>,
{
    match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(envelope) => envelope,
        Err(panic) => {
            let e = BillError::Internal(panic_message(panic.as_ref()));
            error!("{}", e);
            ResponseEnvelope::failure(e.to_string(), ResourceUsage::default())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unexpected panic".to_string())
}

// ── Provider resolution ──────────────────────────────────────────────────

/// The environment variable holding a provider's API key, if it needs one.
pub fn api_key_var(provider: &str) -> Option<&'static str> {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "xai" => Some("XAI_API_KEY"),
        "azure" => Some("AZURE_OPENAI_API_KEY"),
        _ => None,
    }
}

fn api_key_present(provider: &str) -> bool {
    match api_key_var(provider) {
        Some(var) => std::env::var(var).is_ok_and(|v| !v.trim().is_empty()),
        None => true,
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider + model** — `config.provider_name` (default
///    `anthropic`) with `config.model`, created through
///    [`ProviderFactory::create_llm_provider`] once its API key variable is
///    confirmed to be set. A missing key is a startup error.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, BillError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let name = config.provider_label();
    if !api_key_present(name) {
        let var = api_key_var(name).unwrap_or("the provider API key");
        return Err(BillError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{var} environment variable is required"),
        });
    }

    ProviderFactory::create_llm_provider(name, config.model_name()).map_err(|e| {
        BillError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(data: Value) -> ExtractionOutcome {
        ExtractionOutcome::Success {
            data,
            usage: ResourceUsage::new(1000, 200),
        }
    }

    fn two_items() -> Value {
        json!({
            "pagewise_line_items": [{
                "page_no": "1",
                "page_type": "Bill Detail",
                "bill_items": [
                    {"item_name": "Consultation Charge", "item_amount": 500.00,
                     "item_rate": 500.00, "item_quantity": 1.0},
                    {"item_name": "Dressing", "item_amount": 150.50,
                     "item_rate": 150.50, "item_quantity": 1.0, "suspicious": true}
                ]
            }],
            "total_item_count": 7
        })
    }

    #[test]
    fn assemble_success() {
        let env = assemble(outcome(two_items()), &ExtractionConfig::default());
        assert!(env.is_success);
        assert!(env.message.is_none());
        assert_eq!(env.usage.total_tokens, 1200);
        let data = env.data.unwrap();
        assert_eq!(data.total_item_count, 2);
        assert_eq!(data.reconciled_amount, 650.50);
        let items = &data.pagewise_line_items[0].bill_items;
        assert_eq!(items[0].item_name, "Consultation Charge");
        assert!(!items[0].suspicious);
        assert!(items[1].suspicious);
    }

    #[test]
    fn assemble_extraction_failure_keeps_usage() {
        let env = assemble(
            ExtractionOutcome::Failure {
                error: "rate limited".into(),
                usage: ResourceUsage::default(),
            },
            &ExtractionConfig::default(),
        );
        assert!(!env.is_success);
        assert!(env.data.is_none());
        assert_eq!(env.message.as_deref(), Some("Extraction failed: rate limited"));
    }

    #[test]
    fn assemble_validation_failure() {
        let env = assemble(
            outcome(json!({"pagewise_line_items": [{"page_no": "1"}]})),
            &ExtractionConfig::default(),
        );
        assert!(!env.is_success);
        assert!(env.data.is_none());
        assert_eq!(env.usage.total_tokens, 1200);
        assert_eq!(
            env.message.as_deref(),
            Some("Extraction result validation failed")
        );
    }

    #[test]
    fn default_page_type_reaches_typed_result() {
        let mut data = json!({
            "pagewise_line_items": [{"page_no": 1, "bill_items": []}]
        });
        let result = normalise(&mut data, &ExtractionConfig::default()).unwrap();
        assert_eq!(
            result.pagewise_line_items[0].page_type,
            crate::output::PageType::Unknown
        );
        assert_eq!(result.pagewise_line_items[0].page_no, "1");
    }

    #[test]
    fn model_totals_in_any_shape_are_replaced() {
        let mut data = two_items();
        data["total_item_count"] = json!("seven");
        data["reconciled_amount"] = json!("about 600");
        let result = normalise(&mut data, &ExtractionConfig::default()).unwrap();
        assert_eq!(result.total_item_count, 2);
        assert_eq!(result.reconciled_amount, 650.50);
    }

    #[test]
    fn lenient_policy_keeps_bill_with_unreadable_amount() {
        let mut data = two_items();
        data["pagewise_line_items"][0]["bill_items"]
            .as_array_mut()
            .unwrap()
            .push(json!({"item_name": "Oxygen", "item_amount": "N/A",
                         "item_rate": 90, "item_quantity": 2}));
        let result = normalise(&mut data, &ExtractionConfig::default()).unwrap();
        assert_eq!(result.total_item_count, 3);
        assert_eq!(result.reconciled_amount, 650.50);
        let oxygen = &result.pagewise_line_items[0].bill_items[2];
        assert_eq!(oxygen.item_name, "Oxygen");
        assert_eq!(oxygen.item_amount, None);
        assert!(oxygen.suspicious);
    }

    #[test]
    fn assemble_lenient_unreadable_amount_is_success() {
        let mut data = two_items();
        data["pagewise_line_items"][0]["bill_items"][1]["item_amount"] = json!("N/A");
        let env = assemble(outcome(data), &ExtractionConfig::default());
        assert!(env.is_success, "got: {:?}", env.message);
        let data = env.data.unwrap();
        assert_eq!(data.total_item_count, 2);
        assert_eq!(data.reconciled_amount, 500.0);
    }

    #[test]
    fn untypable_rate_is_an_internal_error() {
        let mut data = two_items();
        data["pagewise_line_items"][0]["bill_items"][1]["item_rate"] = json!("N/A");
        let err = normalise(&mut data, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, BillError::Internal(_)), "got: {err:?}");
        assert!(err.to_string().starts_with("Internal server error"));
    }

    #[test]
    fn strict_policy_reports_invalid_amount() {
        let config = ExtractionConfig::builder()
            .amount_policy(AmountPolicy::Strict)
            .build()
            .unwrap();
        let mut data = two_items();
        data["pagewise_line_items"][0]["bill_items"][0]["item_amount"] = json!("five hundred");
        let err = normalise(&mut data, &config).unwrap_err();
        assert!(matches!(err, BillError::InvalidAmount { index: 0, .. }), "got: {err:?}");
    }

    #[test]
    fn duplicate_flagging_is_opt_in() {
        let dup = json!({
            "pagewise_line_items": [{
                "page_no": "1",
                "bill_items": [
                    {"item_name": "CBC", "item_amount": 350, "item_rate": 350, "item_quantity": 1},
                    {"item_name": "cbc ", "item_amount": 350, "item_rate": 350, "item_quantity": 1}
                ]
            }]
        });

        let off = normalise(&mut dup.clone(), &ExtractionConfig::default()).unwrap();
        assert!(!off.pagewise_line_items[0].bill_items[1].suspicious);

        let config = ExtractionConfig::builder().flag_duplicates(true).build().unwrap();
        let on = normalise(&mut dup.clone(), &config).unwrap();
        assert!(!on.pagewise_line_items[0].bill_items[0].suspicious);
        assert!(on.pagewise_line_items[0].bill_items[1].suspicious);
        assert_eq!(on.total_item_count, 2);
    }

    #[tokio::test]
    async fn guarded_converts_panic() {
        let env = guarded(async { panic!("stage exploded") }).await;
        assert!(!env.is_success);
        assert_eq!(
            env.message.as_deref(),
            Some("Internal server error: stage exploded")
        );
        assert_eq!(env.usage, ResourceUsage::default());
    }

    #[test]
    fn api_key_vars() {
        assert_eq!(api_key_var("anthropic"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(api_key_var("OpenAI"), Some("OPENAI_API_KEY"));
        assert_eq!(api_key_var("ollama"), None);
        assert!(api_key_present("ollama"));
    }

    #[test]
    fn missing_key_is_a_startup_error() {
        if api_key_present("anthropic") {
            return;
        }
        let err = match ExtractionService::from_config(ExtractionConfig::default()) {
            Ok(_) => panic!("service must not start without ANTHROPIC_API_KEY"),
            Err(e) => e,
        };
        assert!(matches!(err, BillError::ProviderNotConfigured { .. }));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"), "got: {err}");
    }
}
