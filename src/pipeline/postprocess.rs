//! Post-processing: turn the model's raw reply into a JSON value.
//!
//! Even when told to return "ONLY the JSON", vision models regularly wrap
//! the object in a Markdown code block, with or without a language tag.
//! Stripping runs in a fixed order, trimming whitespace between steps:
//!
//! 1. trim the reply
//! 2. drop a leading fence (```` ``` ```` plus an optional tag like `json`)
//! 3. drop a trailing fence
//!
//! Text without fences passes through unchanged (apart from the trim).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+.-]*").unwrap());

/// Remove Markdown code-fence delimiters around a JSON reply.
pub fn strip_code_fences(reply: &str) -> &str {
    let mut text = reply.trim();

    if let Some(m) = RE_LEADING_FENCE.find(text) {
        text = text[m.end()..].trim();
    }

    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim();
    }

    text
}

/// Strip fences and parse the reply as JSON.
pub fn parse_json_reply(reply: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fences(reply))
}
