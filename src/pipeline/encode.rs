//! Document encoding: raw bytes → base64 `ImageData` attachment.
//!
//! VLM APIs accept images as base64 payloads embedded in the JSON request
//! body. The bill is forwarded as downloaded, with no re-encoding, so the
//! model sees exactly the pixels the hospital produced.

use crate::pipeline::fetch::MediaType;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap a bill document as a multimodal attachment.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget; small
/// print in rate columns is lost at low detail. Providers without a detail
/// setting ignore it.
pub fn encode_document(bytes: &[u8], media_type: MediaType) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} → {} bytes base64", media_type, b64.len());

    ImageData::new(b64, media_type.as_str().to_string()).with_detail("high")
}
