//! Content-addressing hashes for menu deduplication.
//!
//! Two hashes anchor the dedup scheme:
//!
//! - **Content signature hash** — SHA-256 over the sorted, normalized dish
//!   names only. Robust to OCR noise in descriptions and prices, brittle to
//!   any change in the dish-name set.
//! - **Full structure hash** — SHA-256 over a deterministically normalized
//!   serialization of the entire menu. Sensitive to nearly any change.
//!
//! Both are pure functions of the structured menu: the same input always
//! produces a byte-identical hash.

use sha2::{Digest, Sha256};

use crate::models::StructuredMenu;

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize a metadata string (restaurant name, location) for comparison.
///
/// Lowercases, strips common punctuation, standardizes street-type
/// abbreviations, and condenses whitespace. Returns `None` when nothing
/// remains.
pub fn normalize_metadata(text: &str) -> Option<String> {
    let mut normalized: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '#' | '!' | '$' | '%' | '^' | '&' | '*' | ';' | ':' | '{' | '}' | '=' | '`' | '~' | '(' | ')'))
        .collect();

    for (long, short) in [("street", "st"), ("road", "rd"), ("avenue", "ave")] {
        normalized = normalized
            .split_whitespace()
            .map(|w| if w == long { short } else { w })
            .collect::<Vec<_>>()
            .join(" ");
    }

    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalize a dish name for the content signature: lowercase, keep only
/// ASCII alphanumerics.
pub fn normalize_dish_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Compute the content signature over a structured menu.
///
/// Returns the hash and the `|`-joined signature string it was computed
/// from (the string also feeds the embedding input). `None` when the menu
/// has no usable dish names.
pub fn content_signature(menu: &StructuredMenu) -> Option<(String, String)> {
    let mut names: Vec<String> = menu
        .categories
        .iter()
        .flat_map(|c| c.dishes.iter())
        .map(|d| normalize_dish_name(&d.name))
        .filter(|n| !n.is_empty())
        .collect();

    if names.is_empty() {
        return None;
    }

    names.sort();
    let signature_string = names.join("|");
    let hash = sha256_hex(signature_string.as_bytes());
    Some((hash, signature_string))
}

/// Compute the full-structure hash over a deep-normalized copy of the menu.
///
/// Normalization: all strings lowercased and whitespace-condensed, dietary
/// tags sorted, dishes sorted by name within each category, categories
/// sorted by name. The normalized copy is serialized with a fixed field
/// order, so the hash is stable across input ordering and casing but moves
/// on any field-level change.
pub fn full_structure_hash(menu: &StructuredMenu) -> String {
    let mut normalized = menu.clone();

    normalized.restaurant.name = normalized
        .restaurant
        .name
        .as_deref()
        .map(normalize_string_field);
    normalized.restaurant.location = normalized
        .restaurant
        .location
        .as_deref()
        .map(normalize_string_field);

    for category in &mut normalized.categories {
        category.name = normalize_string_field(&category.name);
        for dish in &mut category.dishes {
            dish.name = normalize_string_field(&dish.name);
            dish.description = dish.description.as_deref().map(normalize_string_field);
            for tag in &mut dish.dietary_tags {
                *tag = normalize_string_field(tag);
            }
            dish.dietary_tags.sort();
        }
        category.dishes.sort_by(|a, b| a.name.cmp(&b.name));
    }
    normalized.categories.sort_by(|a, b| a.name.cmp(&b.name));

    // Struct field order is fixed, so this serialization is canonical.
    let stable = serde_json::to_string(&normalized).unwrap_or_default();
    sha256_hex(stable.as_bytes())
}

fn normalize_string_field(s: &str) -> String {
    s.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
