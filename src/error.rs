//! Error types for the edgequake-bill2json library.
//!
//! A single enum, [`BillError`], covers every way a bill extraction can fail.
//! Its `Display` strings are written for the caller of the HTTP endpoint:
//! the response assembler puts `err.to_string()` straight into the
//! envelope's `message`, so each variant's text names the stage that failed
//! ("Failed to download document", "Extraction failed", …).
//!
//! Two variants never reach a response envelope: [`BillError::InvalidConfig`]
//! and [`BillError::ProviderNotConfigured`] are startup errors returned by
//! the config builder and by [`crate::ExtractionService::from_config`].

use thiserror::Error;

/// All errors returned by the edgequake-bill2json library.
#[derive(Debug, Error)]
pub enum BillError {
    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The document could not be retrieved (bad URL, non-2xx, transport).
    #[error("Failed to download document: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The document download exceeded the configured timeout.
    #[error("Failed to download document: timed out after {secs}s fetching '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The vision model call failed, or its reply was not valid JSON.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    // ── Result errors ─────────────────────────────────────────────────────
    /// The parsed reply does not have the required shape.
    #[error("Extraction result validation failed")]
    Validation,

    /// Strict reconciliation met an `item_amount` that is not a number.
    #[error(
        "Reconciliation failed: item {index} on page '{page_no}' has a non-numeric item_amount ({value})"
    )]
    InvalidAmount {
        page_no: String,
        index: usize,
        value: String,
    },

    // ── Startup errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl BillError {
    /// True for the two fetch-stage variants.
    pub fn is_download(&self) -> bool {
        matches!(
            self,
            BillError::DownloadFailed { .. } | BillError::DownloadTimeout { .. }
        )
    }
}
