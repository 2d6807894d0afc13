//! # edgequake-bill2json
//!
//! Extract line items from medical bill images into validated JSON using
//! Vision Language Models (VLMs).
//!
//! ## Pipeline Overview
//!
//! ```text
//! document URL
//!  │
//!  ├─ 1. Fetch      download the bill, infer png / jpeg / pdf
//!  ├─ 2. Encode     bytes → base64 ImageData
//!  ├─ 3. VLM        one call to claude / gpt / gemini / …
//!  ├─ 4. Parse      strip code fences, parse JSON
//!  ├─ 5. Validate   required keys, default page_type
//!  ├─ 6. Aggregate  item count, reconciled amount, duplicates
//!  └─ 7. Envelope   { is_success, token_usage, data | message }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_bill2json::{ExtractionConfig, ExtractionService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Needs ANTHROPIC_API_KEY for the default provider.
//!     let service = ExtractionService::from_config(ExtractionConfig::default())?;
//!     let envelope = service.process("https://example.com/bill.png").await;
//!     println!("{}", serde_json::to_string_pretty(&envelope)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `bill2json` binary (clap + anyhow + tracing-subscriber) |
//! | `server` | on      | axum router for the HTTP endpoints |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AmountPolicy, ExtractionConfig, ExtractionConfigBuilder};
pub use error::BillError;
pub use extract::{assemble, normalise, ExtractionService};
pub use output::{
    BillItem, DocumentRequest, ExtractionResult, PageResult, PageType, ResourceUsage,
    ResponseEnvelope,
};
pub use pipeline::aggregate::{count_items, detect_duplicates, reconcile_amount};
pub use pipeline::fetch::{read_local, MediaType};
pub use pipeline::llm::{BillExtractor, ExtractionOutcome, VisionExtractor};
pub use pipeline::postprocess::strip_code_fences;
pub use pipeline::validate::validate;
