//! Structural validation of the parsed model reply.
//!
//! Shape only, no arithmetic. A page without `page_type` is not an error:
//! the validator writes `"Unknown"` into the page in place, so everything
//! downstream can rely on the key being present.

use crate::output::PageType;
use serde_json::{Map, Value};
use tracing::warn;

/// Keys every bill item must carry.
pub const REQUIRED_ITEM_FIELDS: [&str; 4] =
    ["item_name", "item_amount", "item_rate", "item_quantity"];

/// Check the reply against the required shape, filling defaults in place.
///
/// Returns `false` for any structural deviation; never panics.
pub fn validate(data: &mut Value) -> bool {
    match check(data) {
        Ok(()) => true,
        Err(reason) => {
            warn!("Extraction result rejected: {}", reason);
            false
        }
    }
}

fn check(data: &mut Value) -> Result<(), String> {
    let pages = data
        .as_object_mut()
        .ok_or("reply is not a JSON object")?
        .get_mut("pagewise_line_items")
        .ok_or("missing 'pagewise_line_items'")?
        .as_array_mut()
        .ok_or("'pagewise_line_items' is not an array")?;

    for (p, page) in pages.iter_mut().enumerate() {
        let page = page
            .as_object_mut()
            .ok_or_else(|| format!("page {p} is not an object"))?;
        check_page(page).map_err(|e| format!("page {p}: {e}"))?;
    }
    Ok(())
}

fn check_page(page: &mut Map<String, Value>) -> Result<(), String> {
    if !page.contains_key("page_no") {
        return Err("missing 'page_no'".into());
    }

    let items = page
        .get("bill_items")
        .ok_or("missing 'bill_items'")?
        .as_array()
        .ok_or("'bill_items' is not an array")?;

    for (i, item) in items.iter().enumerate() {
        let item = item
            .as_object()
            .ok_or_else(|| format!("item {i} is not an object"))?;
        if let Some(field) = REQUIRED_ITEM_FIELDS.iter().find(|f| !item.contains_key(**f)) {
            return Err(format!("item {i} is missing '{field}'"));
        }
    }

    if page.get("page_type").is_none_or(Value::is_null) {
        page.insert(
            "page_type".into(),
            Value::String(PageType::Unknown.as_str().into()),
        );
    }
    Ok(())
}
