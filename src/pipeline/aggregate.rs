//! Aggregation over a validated reply: item count, reconciled amount and
//! duplicate detection.
//!
//! These work on the raw `serde_json::Value` rather than the typed
//! [`crate::output::ExtractionResult`] because an `item_amount` the model
//! wrote as `"N/A"` must still be countable and skippable; the typed record
//! cannot even hold it.

use crate::error::BillError;
use crate::output::coerce_f64;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

fn pages(data: &Value) -> impl Iterator<Item = &Value> {
    data.get("pagewise_line_items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn items(page: &Value) -> &[Value] {
    page.get("bill_items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Round to 2 decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Total number of bill items across all pages.
///
/// Any `total_item_count` the model supplied is ignored.
pub fn count_items(data: &Value) -> usize {
    pages(data).map(|p| items(p).len()).sum()
}

/// Sum of every item's `item_amount`, rounded to 2 decimals.
///
/// Amounts that are not numeric are skipped; the rest of the bill still
/// reconciles.
pub fn reconcile_amount(data: &Value) -> f64 {
    let mut total = 0.0;
    for page in pages(data) {
        for item in items(page) {
            match item.get("item_amount").map(coerce_f64) {
                Some(Some(amount)) => total += amount,
                Some(None) => debug!("Skipping non-numeric item_amount: {}", item["item_amount"]),
                None => {}
            }
        }
    }
    round2(total)
}

/// Like [`reconcile_amount`], but fails on the first non-numeric amount.
pub fn reconcile_amount_strict(data: &Value) -> Result<f64, BillError> {
    let mut total = 0.0;
    for page in pages(data) {
        for (index, item) in items(page).iter().enumerate() {
            let Some(raw) = item.get("item_amount") else {
                continue;
            };
            total += coerce_f64(raw).ok_or_else(|| BillError::InvalidAmount {
                page_no: page_label(page),
                index,
                value: raw.to_string(),
            })?;
        }
    }
    Ok(round2(total))
}

fn page_label(page: &Value) -> String {
    match page.get("page_no") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".into(),
    }
}

/// Mark every item whose `item_amount` is not numeric as `suspicious`.
/// Returns how many were marked.
pub fn flag_unreadable_amounts(data: &mut Value) -> usize {
    let Some(pages) = data
        .get_mut("pagewise_line_items")
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };

    let mut flagged = 0;
    for page in pages {
        let label = page_label(page);
        let Some(items) = page.get_mut("bill_items").and_then(Value::as_array_mut) else {
            continue;
        };
        for (idx, item) in items.iter_mut().enumerate() {
            let Some(item) = item.as_object_mut() else {
                continue;
            };
            let unreadable = item.get("item_amount").is_some_and(|v| coerce_f64(v).is_none());
            if unreadable {
                let raw = item.get("item_amount").map(|v| v.to_string()).unwrap_or_default();
                warn!(
                    "Page {}: item {} has a non-numeric item_amount ({}), left out of the total",
                    label, idx, raw
                );
                item.insert("suspicious".into(), Value::Bool(true));
                flagged += 1;
            }
        }
    }
    flagged
}

/// Structural identity of a bill item.
#[derive(Debug, PartialEq, Eq, Hash)]
struct Signature {
    name: String,
    rate: Option<u64>,
    quantity: Option<u64>,
    amount: Option<u64>,
}

impl Signature {
    fn of(item: &Value) -> Self {
        let number = |key: &str| match item.get(key) {
            None => Some(0.0_f64.to_bits()),
            Some(v) => coerce_f64(v).map(|n| (n + 0.0).to_bits()),
        };
        Self {
            name: item
                .get("item_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_lowercase(),
            rate: number("item_rate"),
            quantity: number("item_quantity"),
            amount: number("item_amount"),
        }
    }
}

/// Indices of items that repeat an earlier item's signature.
///
/// The signature is the lower-cased, trimmed name plus the numeric rate,
/// quantity and amount. The first occurrence is canonical; every later match
/// is reported, in encounter order. Matching is exact, never fuzzy.
pub fn detect_duplicates(items: &[Value]) -> Vec<usize> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| (!seen.insert(Signature::of(item))).then_some(idx))
        .collect()
}

/// Mark per-page duplicates as `suspicious`. Returns how many were flagged.
pub fn flag_duplicates(data: &mut Value) -> usize {
    let Some(pages) = data
        .get_mut("pagewise_line_items")
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };

    let mut flagged = 0;
    for page in pages {
        let label = page_label(page);
        let Some(items) = page.get_mut("bill_items").and_then(Value::as_array_mut) else {
            continue;
        };
        for idx in detect_duplicates(items) {
            if let Some(item) = items[idx].as_object_mut() {
                let name = item
                    .get("item_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                warn!(
                    "Page {}: item {} ({}) duplicates an earlier item",
                    label, idx, name
                );
                item.insert("suspicious".into(), Value::Bool(true));
                flagged += 1;
            }
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str, rate: f64, qty: f64, amount: Value) -> Value {
        json!({
            "item_name": name,
            "item_rate": rate,
            "item_quantity": qty,
            "item_amount": amount
        })
    }

    fn bill(pages: Vec<Vec<Value>>) -> Value {
        let pages: Vec<Value> = pages
            .into_iter()
            .enumerate()
            .map(|(i, items)| json!({"page_no": (i + 1).to_string(), "bill_items": items}))
            .collect();
        json!({ "pagewise_line_items": pages })
    }

    #[test]
    fn count_ignores_model_total() {
        let mut data = bill(vec![
            vec![item("A", 1.0, 1.0, json!(1.0)), item("B", 2.0, 1.0, json!(2.0))],
            vec![item("C", 3.0, 1.0, json!(3.0))],
            vec![],
        ]);
        data["total_item_count"] = json!(99);
        assert_eq!(count_items(&data), 3);
    }

    #[test]
    fn count_of_empty_bill() {
        assert_eq!(count_items(&json!({"pagewise_line_items": []})), 0);
        assert_eq!(count_items(&json!({})), 0);
    }

    #[test]
    fn reconcile_sums_and_rounds() {
        let data = bill(vec![vec![
            item("Consultation", 500.0, 1.0, json!(500.00)),
            item("Dressing", 150.5, 1.0, json!(150.50)),
        ]]);
        assert_eq!(reconcile_amount(&data), 650.50);
    }

    #[test]
    fn reconcile_rounds_float_noise() {
        let data = bill(vec![vec![
            item("A", 0.1, 1.0, json!(0.1)),
            item("B", 0.2, 1.0, json!(0.2)),
        ]]);
        assert_eq!(reconcile_amount(&data), 0.3);
        let data = bill(vec![vec![item("C", 1.0, 3.0, json!(3.14159))]]);
        assert_eq!(reconcile_amount(&data), 3.14);
    }

    #[test]
    fn reconcile_skips_non_numeric_amount() {
        let base = bill(vec![vec![
            item("A", 100.0, 1.0, json!(100.25)),
            item("B", 50.0, 1.0, json!("49.75")),
        ]]);
        let mut with_junk = base.clone();
        with_junk["pagewise_line_items"][0]["bill_items"]
            .as_array_mut()
            .unwrap()
            .push(item("C", 10.0, 1.0, json!("illegible")));
        assert_eq!(reconcile_amount(&base), 150.0);
        assert_eq!(reconcile_amount(&with_junk), reconcile_amount(&base));
    }

    #[test]
    fn reconcile_across_pages() {
        let data = bill(vec![
            vec![item("A", 10.0, 2.0, json!(20.0))],
            vec![item("B", 5.5, 1.0, json!(5.5))],
        ]);
        assert_eq!(reconcile_amount(&data), 25.5);
    }

    #[test]
    fn strict_reconcile_reports_offender() {
        let data = bill(vec![
            vec![item("A", 10.0, 1.0, json!(10.0))],
            vec![item("B", 1.0, 1.0, json!(1.0)), item("C", 2.0, 1.0, json!(null))],
        ]);
        match reconcile_amount_strict(&data) {
            Err(BillError::InvalidAmount {
                page_no,
                index,
                value,
            }) => {
                assert_eq!(page_no, "2");
                assert_eq!(index, 1);
                assert_eq!(value, "null");
            }
            other => panic!("expected InvalidAmount, got {other:?}"),
        }
    }

    #[test]
    fn strict_reconcile_matches_lenient_on_clean_data() {
        let data = bill(vec![vec![
            item("A", 500.0, 1.0, json!(500.0)),
            item("B", 150.5, 1.0, json!("150.50")),
        ]]);
        assert_eq!(reconcile_amount_strict(&data).unwrap(), 650.5);
        assert_eq!(reconcile_amount(&data), 650.5);
    }

    #[test]
    fn duplicates_ignore_case_and_whitespace() {
        let items = vec![
            item("A", 10.0, 1.0, json!(10)),
            item(" a ", 10.0, 1.0, json!(10)),
        ];
        assert_eq!(detect_duplicates(&items), vec![1]);
    }

    #[test]
    fn duplicates_require_exact_numbers() {
        let items = vec![
            item("Syringe", 10.0, 1.0, json!(10)),
            item("Syringe", 10.0, 2.0, json!(20)),
            item("Syringes", 10.0, 1.0, json!(10)),
        ];
        assert!(detect_duplicates(&items).is_empty());
    }

    #[test]
    fn duplicates_in_encounter_order() {
        let items = vec![
            item("X", 1.0, 1.0, json!(1)),
            item("Y", 2.0, 1.0, json!(2)),
            item("x", 1.0, 1.0, json!(1.0)),
            item("Y ", 2.0, 1.0, json!("2")),
            item("X", 1.0, 1.0, json!(1)),
        ];
        assert_eq!(detect_duplicates(&items), vec![2, 3, 4]);
    }

    #[test]
    fn flag_marks_duplicates_per_page() {
        let mut data = bill(vec![
            vec![
                item("Glucose Strip", 12.0, 1.0, json!(12)),
                item("glucose strip", 12.0, 1.0, json!(12)),
            ],
            vec![item("Glucose Strip", 12.0, 1.0, json!(12))],
        ]);
        assert_eq!(flag_duplicates(&mut data), 1);
        let pages = &data["pagewise_line_items"];
        assert!(pages[0]["bill_items"][0].get("suspicious").is_none());
        assert_eq!(pages[0]["bill_items"][1]["suspicious"], json!(true));
        assert!(pages[1]["bill_items"][0].get("suspicious").is_none());
    }

    #[test]
    fn unreadable_amounts_are_marked() {
        let mut data = bill(vec![
            vec![item("A", 10.0, 1.0, json!(10)), item("B", 5.0, 1.0, json!("N/A"))],
            vec![item("C", 2.0, 1.0, json!("2.00")), item("D", 1.0, 1.0, json!(null))],
        ]);
        assert_eq!(flag_unreadable_amounts(&mut data), 2);
        let pages = &data["pagewise_line_items"];
        assert!(pages[0]["bill_items"][0].get("suspicious").is_none());
        assert_eq!(pages[0]["bill_items"][1]["suspicious"], json!(true));
        assert!(pages[1]["bill_items"][0].get("suspicious").is_none());
        assert_eq!(pages[1]["bill_items"][1]["suspicious"], json!(true));
        assert_eq!(reconcile_amount(&data), 12.0);
    }

    #[test]
    fn round2_values() {
        assert_eq!(round2(650.504), 650.5);
        assert_eq!(round2(1.005 + 0.0001), 1.01);
        assert_eq!(round2(-2.499), -2.5);
    }
}
