//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one step, so the core stages can be
//! tested with JSON fixtures and never touch the network.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ encode ──▶ llm ──▶ postprocess ──▶ validate ──▶ aggregate
//! (URL)     (base64)   (VLM)   (fences/JSON)   (shape)      (count/sum)
//! ```
//!
//! 1. [`fetch`]       — download the document and infer its media type
//! 2. [`encode`]      — base64-wrap the bytes as an `ImageData` attachment
//! 3. [`llm`]         — the extraction adapter; the only stage calling the model
//! 4. [`postprocess`] — strip code fences from the reply and parse JSON
//! 5. [`validate`]    — structural check, fills the default `page_type`
//! 6. [`aggregate`]   — item count, reconciled amount, duplicate detection

pub mod aggregate;
pub mod encode;
pub mod fetch;
pub mod llm;
pub mod postprocess;
pub mod validate;
