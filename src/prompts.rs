//! Prompt text for the vision extraction call.
//!
//! Centralising the prompt here keeps the adapter in
//! [`crate::pipeline::llm`] free of prompt engineering, and lets unit tests
//! check that every extraction rule is still present.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::prompt`].

/// Default extraction prompt, sent together with the bill image.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert medical bill extraction system. Analyze this bill image and extract ALL line items with perfect accuracy.

EXTRACTION RULES:
1. Extract EVERY line item visible in the bill
2. Use EXACT item names as printed (no normalization)
3. Extract item_rate (per unit rate), item_quantity, and item_amount (total after discounts)
4. DO NOT extract subtotals, section totals or grand totals as items
5. Detect and mark suspicious entries (font inconsistencies, overwriting, etc.) with "suspicious": true
6. Page type must be one of: "Bill Detail", "Final Bill", "Pharmacy"
7. Ensure NO duplicate items and NO missing items

CRITICAL:
- If quantity is not shown, assume 1.0
- If rate equals amount, quantity is 1.0
- item_amount = item_rate x item_quantity (after discounts)
- Preserve all decimals and exact numbers

OUTPUT FORMAT (JSON only, no explanation):
{
  "pagewise_line_items": [
    {
      "page_no": "1",
      "page_type": "Bill Detail",
      "bill_items": [
        {
          "item_name": "Consultation Charge",
          "item_amount": 500.00,
          "item_rate": 500.00,
          "item_quantity": 1.0,
          "suspicious": false
        }
      ]
    }
  ],
  "total_item_count": 1
}

Analyze the image now and return ONLY the JSON:"#;
