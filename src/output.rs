//! Output types: the typed bill record and the response envelope.
//!
//! Everything here is created fresh for one request and dropped once the
//! response is written. The model's reply is untrusted, so deserialisation is
//! deliberately forgiving about *representation* (numbers sent as strings, a
//! numeric `page_no`, an unrecognised page type) while the structural checks
//! live in [`crate::pipeline::validate`].

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ── Bill items ───────────────────────────────────────────────────────────

/// One priced line entry on a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    /// Name exactly as printed on the bill, never normalised.
    pub item_name: String,

    /// Net amount after discounts. `None` when the bill's amount could not
    /// be read as a number; such items are left out of the reconciled total.
    #[serde(deserialize_with = "de_amount")]
    pub item_amount: Option<f64>,

    /// Rate per unit.
    #[serde(deserialize_with = "de_number")]
    pub item_rate: f64,

    /// Quantity; 1.0 when the bill does not show one.
    #[serde(default = "default_quantity", deserialize_with = "de_quantity")]
    pub item_quantity: f64,

    /// Set by the model on visual anomalies, or by duplicate flagging.
    #[serde(default, deserialize_with = "de_flag")]
    pub suspicious: bool,
}

fn default_quantity() -> f64 {
    1.0
}

/// Coerce a JSON value to a finite `f64`.
///
/// Accepts numbers and numeric strings (surrounding whitespace allowed).
/// Everything else, including `null`, booleans and non-finite values,
/// yields `None`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn de_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_f64(&value).ok_or_else(|| de::Error::custom(format!("expected a number, got {value}")))
}

fn de_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce_f64(&Value::deserialize(deserializer)?))
}

fn de_quantity<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(default_quantity());
    }
    coerce_f64(&value)
        .ok_or_else(|| de::Error::custom(format!("expected a quantity, got {value}")))
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

// ── Pages ────────────────────────────────────────────────────────────────

/// Classification of a bill page's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum PageType {
    #[serde(rename = "Bill Detail")]
    BillDetail,
    #[serde(rename = "Final Bill")]
    FinalBill,
    #[serde(rename = "Pharmacy")]
    Pharmacy,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl PageType {
    /// The label used on the wire and in the extraction prompt.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::BillDetail => "Bill Detail",
            PageType::FinalBill => "Final Bill",
            PageType::Pharmacy => "Pharmacy",
            PageType::Unknown => "Unknown",
        }
    }

    /// Parse a label case-insensitively; unrecognised labels map to `Unknown`.
    pub fn parse_lenient(label: &str) -> Self {
        let label = label.trim();
        [PageType::BillDetail, PageType::FinalBill, PageType::Pharmacy]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(label))
            .unwrap_or(PageType::Unknown)
    }
}

impl From<String> for PageType {
    fn from(s: String) -> Self {
        PageType::parse_lenient(&s)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of extracted line items, in visual order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    #[serde(deserialize_with = "de_page_no")]
    pub page_no: String,
    #[serde(default)]
    pub page_type: PageType,
    #[serde(default)]
    pub bill_items: Vec<BillItem>,
}

fn de_page_no<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected page_no as string or number, got {other}"
        ))),
    }
}

/// The normalised extraction result returned to callers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub pagewise_line_items: Vec<PageResult>,
    /// Always recomputed from the pages; the model's own count is ignored.
    #[serde(default)]
    pub total_item_count: usize,
    /// Sum of every item amount, rounded to 2 decimals.
    #[serde(default)]
    pub reconciled_amount: f64,
}

// ── Usage & envelope ─────────────────────────────────────────────────────

/// Token accounting from the external model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl ResourceUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            total_tokens: input_tokens + output_tokens,
            input_tokens,
            output_tokens,
        }
    }
}

/// The uniform success-or-failure response.
///
/// `data` is present iff `is_success`; `message` is present iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub is_success: bool,
    #[serde(rename = "token_usage", alias = "usage", default)]
    pub usage: ResourceUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(data: ExtractionResult, usage: ResourceUsage) -> Self {
        Self {
            is_success: true,
            usage,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>, usage: ResourceUsage) -> Self {
        Self {
            is_success: false,
            usage,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Inbound body of `POST /extract-bill-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    /// URL of the bill image or PDF.
    pub document: String,
}
