//! Search-text construction for products and line-item queries, plus the
//! token scoring used by the degraded (embedding-less) path.

use crate::models::{ItemAttributes, LineItem, Product};

/// The text a product is embedded under: code, name and key attributes
/// in one line.
pub fn product_search_text(product: &Product) -> String {
    let mut parts = Vec::with_capacity(2);
    if let Some(code) = product.trimmed_code() {
        parts.push(code.to_string());
    }
    parts.push(product.name.trim().to_string());
    parts.join(" ")
}

/// The query text for a line item: `raw_code || raw_name || attributes`.
pub fn query_search_text(item: &LineItem) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(code) = &item.raw_code {
        parts.push(code.trim().to_string());
    }
    parts.push(item.raw_name.trim().to_string());
    let attrs = attributes_text(&item.attributes);
    if !attrs.is_empty() {
        parts.push(attrs);
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Attribute string in a stable order.
pub fn attributes_text(attrs: &ItemAttributes) -> String {
    let mut parts = Vec::new();
    if let Some(brand) = &attrs.brand {
        parts.push(brand.clone());
    }
    if let Some(line) = &attrs.product_line {
        parts.push(line.clone());
    }
    if let Some(machine) = &attrs.machine_type {
        parts.push(machine.clone());
    }
    if let Some(w) = attrs.width_mm {
        parts.push(format!("{w} mm x"));
    }
    if let Some(t) = attrs.thickness_mm {
        parts.push(format!("Stärke {t}"));
    }
    if let Some(l) = attrs.length_m {
        parts.push(format!("{l} m"));
    }
    if let Some(color) = &attrs.color {
        parts.push(color.clone());
    }
    parts.join(" ")
}

/// Jaccard similarity over lowercased word tokens. Used when semantic
/// retrieval is unavailable.
pub fn token_similarity(a: &str, b: &str) -> f32 {
    let ta = token_set(a);
    let tb = token_set(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f32 / union as f32
}

fn token_set(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.len() >= 2)
        .collect()
}
