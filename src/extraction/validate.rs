//! Post-call validation of the extraction JSON.
//!
//! The validator either returns a normalized [`Extraction`] or the list
//! of complaints to feed into the single repair call. Two guards are
//! normalizations rather than complaints, because they must hold even
//! when the model insists: generic nouns are never codes, and the
//! supplier's own company is never the customer.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::cleaner::ATTACHMENT_MARKER;
use crate::models::{
    ExtractedCustomer, Extraction, IntentType, ItemAttributes, LineItem,
};

/// Inputs the validator needs besides the raw LLM output.
pub struct ValidationContext<'a> {
    /// Raw From header of the message.
    pub sender: &'a str,
    /// Cleaned text, for signature-block customer re-derivation.
    pub cleaned_text: &'a str,
    pub own_company_aliases: &'a [String],
    pub generic_nouns: &'a [String],
}

/// Top-level keys whose presence betrays a parallel-array response.
const PARALLEL_ARRAY_KEYS: &[&str] = &[
    "names",
    "codes",
    "quantities",
    "prices",
    "product_names",
    "product_codes",
];

pub fn validate_extraction(
    raw: &Value,
    ctx: &ValidationContext,
) -> Result<Extraction, Vec<String>> {
    let mut complaints = Vec::new();

    for key in PARALLEL_ARRAY_KEYS {
        if raw.get(*key).is_some_and(Value::is_array) {
            complaints.push(format!(
                "parallel per-field array {key:?} is forbidden; emit line_items objects"
            ));
        }
    }

    let intent_type = match raw.get("intent_type").and_then(Value::as_str) {
        Some(s) => match parse_intent(s) {
            Some(intent) => Some(intent),
            None => {
                complaints.push(format!("unknown intent_type {s:?}"));
                None
            }
        },
        None => {
            complaints.push("missing intent_type".into());
            None
        }
    };

    let intent_confidence = match raw.get("intent_confidence").and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => Some(c as f32),
        Some(c) => {
            complaints.push(format!("intent_confidence {c} outside [0, 1]"));
            None
        }
        None => {
            complaints.push("missing or non-numeric intent_confidence".into());
            None
        }
    };

    let line_items = match raw.get("line_items").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| parse_line_item(idx, item, &mut complaints))
            .collect(),
        None => {
            complaints.push("line_items must be an array of objects".into());
            Vec::new()
        }
    };

    if !complaints.is_empty() {
        return Err(complaints);
    }

    let customer: ExtractedCustomer = raw
        .get("customer")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let mut extraction = Extraction {
        intent_type: intent_type.unwrap_or(IntentType::Other),
        intent_confidence: intent_confidence.unwrap_or(0.0),
        customer,
        line_items,
        order_ref: raw
            .get("order_ref")
            .and_then(Value::as_str)
            .map(str::to_string),
        notes: raw.get("notes").and_then(Value::as_str).map(str::to_string),
    };

    apply_generics_guard(&mut extraction, ctx.generic_nouns);
    apply_own_company_guard(&mut extraction, ctx);

    Ok(extraction)
}

fn parse_intent(s: &str) -> Option<IntentType> {
    match s {
        "order_inquiry" => Some(IntentType::OrderInquiry),
        "invoice_inquiry" => Some(IntentType::InvoiceInquiry),
        "product_inquiry" => Some(IntentType::ProductInquiry),
        "general_inquiry" => Some(IntentType::GeneralInquiry),
        "other" => Some(IntentType::Other),
        _ => None,
    }
}

fn parse_line_item(
    idx: usize,
    item: &Value,
    complaints: &mut Vec<String>,
) -> Option<LineItem> {
    let raw_name = match item.get("raw_name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            complaints.push(format!("line_items[{idx}]: missing raw_name"));
            return None;
        }
    };

    let quantity = match item.get("quantity").and_then(lenient_number) {
        Some(q) if q > 0.0 => q,
        Some(q) => {
            complaints.push(format!("line_items[{idx}]: quantity {q} must be positive"));
            return None;
        }
        None => {
            complaints.push(format!("line_items[{idx}]: missing or unparseable quantity"));
            return None;
        }
    };

    let unit_price = match item.get("unit_price") {
        None | Some(Value::Null) => None,
        Some(v) => match lenient_number(v) {
            Some(p) if p >= 0.0 => Some(p),
            Some(p) => {
                complaints.push(format!("line_items[{idx}]: unit_price {p} is negative"));
                return None;
            }
            None => {
                complaints.push(format!("line_items[{idx}]: unparseable unit_price"));
                return None;
            }
        },
    };

    Some(LineItem {
        raw_name,
        raw_code: item
            .get("raw_code")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        quantity,
        unit_price,
        attributes: parse_attributes(item.get("attributes")),
    })
}

/// Known attribute keys only; everything else the model invents is
/// dropped at this boundary.
fn parse_attributes(raw: Option<&Value>) -> ItemAttributes {
    let Some(raw) = raw else {
        return ItemAttributes::default();
    };

    ItemAttributes {
        brand: attr_str(raw, "brand"),
        product_line: attr_str(raw, "product_line"),
        machine_type: attr_str(raw, "machine_type"),
        width_mm: raw.get("width_mm").and_then(lenient_number),
        height_mm: raw.get("height_mm").and_then(lenient_number),
        thickness_mm: raw.get("thickness_mm").and_then(lenient_number),
        length_m: raw.get("length_m").and_then(lenient_number),
        color: attr_str(raw, "color"),
    }
}

fn attr_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accept numbers or numeric strings, normalizing the decimal comma
/// (`1.234,56` and `12,5` both parse).
fn lenient_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => normalize_decimal(s),
        _ => None,
    }
}

pub fn normalize_decimal(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains(',') {
        // German format: dot is the thousands separator when a comma follows.
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };
    normalized.parse().ok()
}

/// Generic nouns are never product codes; silently move offenders out of
/// `raw_code`.
fn apply_generics_guard(extraction: &mut Extraction, generics: &[String]) {
    for item in &mut extraction.line_items {
        let Some(code) = &item.raw_code else { continue };
        let lowered = code.trim().to_lowercase();
        if generics.iter().any(|g| g.to_lowercase() == lowered) {
            tracing::debug!(code = %code, "Dropping generic noun emitted as raw_code");
            item.raw_code = None;
        }
    }
}

/// When the model reports the supplier itself as the customer, re-derive
/// the customer from the sender header and the signature block.
fn apply_own_company_guard(extraction: &mut Extraction, ctx: &ValidationContext) {
    let Some(name) = &extraction.customer.name else {
        return;
    };
    let lowered = name.trim().to_lowercase();
    let is_own = ctx.own_company_aliases.iter().any(|alias| {
        let alias = alias.trim().to_lowercase();
        !alias.is_empty() && (alias == lowered || lowered.contains(&alias))
    });
    if !is_own {
        return;
    }

    let derived = derive_customer_fallback(ctx.cleaned_text, ctx.sender, ctx.own_company_aliases);
    tracing::debug!(
        rejected = %name,
        derived = ?derived.name,
        "Own company extracted as customer — re-derived from sender and signature"
    );
    extraction.customer = derived;
}

fn company_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?P<name>.{2,70}?\b(GmbH\s*&\s*Co\.?\s*KG|GmbH|AG|KG|e\.K\.|OHG|Ltd\.?|Inc\.?|S\.p\.A\.|S\.A\.|B\.V\.|ApS|A/S))\s*$",
        )
        .unwrap()
    })
}

/// Customer identity from the message itself: signature-block company
/// first, then the sender display name, then the bare address.
pub fn derive_customer_fallback(
    cleaned_text: &str,
    sender: &str,
    own_aliases: &[String],
) -> ExtractedCustomer {
    let (display_name, email) = split_sender(sender);

    // Signature scan covers the body only — attachment content is not a
    // signature.
    let body = cleaned_text
        .split(ATTACHMENT_MARKER)
        .next()
        .unwrap_or(cleaned_text);
    let signature_company = body
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(15)
        .find_map(|line| {
            let captured = company_suffix().captures(line)?;
            let name = captured.name("name")?.as_str().trim().to_string();
            let lowered = name.to_lowercase();
            let is_own = own_aliases
                .iter()
                .any(|a| !a.trim().is_empty() && lowered.contains(&a.trim().to_lowercase()));
            (!is_own).then_some(name)
        });

    ExtractedCustomer {
        name: signature_company.or(display_name),
        contact: None,
        email,
        phone: None,
        address: None,
    }
}

/// Split `Display Name <addr@host>` into its parts.
fn split_sender(sender: &str) -> (Option<String>, Option<String>) {
    let trimmed = sender.trim();
    if let (Some(open), Some(close)) = (trimmed.find('<'), trimmed.rfind('>')) {
        if open < close {
            let display = trimmed[..open].trim().trim_matches('"').to_string();
            let email = trimmed[open + 1..close].trim().to_string();
            return (
                (!display.is_empty()).then_some(display),
                (!email.is_empty()).then_some(email),
            );
        }
    }
    if trimmed.contains('@') {
        return (None, Some(trimmed.to_string()));
    }
    ((!trimmed.is_empty()).then_some(trimmed.to_string()), None)
}
