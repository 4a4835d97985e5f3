//! Size-aware terms-and-conditions reduction.
//!
//! Large T&C attachments drown the extractor in legal boilerplate. Any
//! attachment at or above the size threshold whose filename looks like a
//! T&C document is reduced to a business-terms excerpt; everything else
//! — including large order PDFs — is preserved verbatim.

use std::sync::OnceLock;

use regex::Regex;

/// Reduction applies only at or above this many characters.
pub const TERMS_SIZE_THRESHOLD: usize = 10_000;

/// Upper bound for the produced excerpt.
pub const TERMS_EXCERPT_LIMIT: usize = 3_000;

fn terms_filename() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // gesch*ftsbedingungen: umlaut, transliteration and OCR mangling.
    RE.get_or_init(|| {
        Regex::new(r"(?i)(terms|agb|conditions|gesch.{0,2}ftsbedingung)").unwrap()
    })
}

fn term_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(payment\s+net|netto\s+kasse|zahlungsziel|incoterm|toleran|warrant|gewährleistung|discount|skonto|rabatt)",
        )
        .unwrap()
    })
}

fn section_head() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(\d+[.)]\s*)?(payment|delivery|warranty|liability|zahlung|lieferung|gewährleistung|haftung)\b",
        )
        .unwrap()
    })
}

/// Whether an attachment qualifies for reduction.
pub fn is_reducible_terms(filename: &str, text_len: usize) -> bool {
    text_len >= TERMS_SIZE_THRESHOLD && terms_filename().is_match(filename)
}

/// Reduce a T&C document to its business-relevant excerpt: pattern lines
/// (payment net, incoterms, tolerances, warranty, discount) plus the
/// Payment/Delivery/Warranty/Liability headed sections, capped at
/// [`TERMS_EXCERPT_LIMIT`] characters.
pub fn extract_business_terms(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut keep = vec![false; lines.len()];

    for (idx, line) in lines.iter().enumerate() {
        if term_line().is_match(line) {
            keep[idx] = true;
        }
        if section_head().is_match(line) {
            keep[idx] = true;
            // Include the section body until a blank line or next head.
            for (offset, follow) in lines[idx + 1..].iter().enumerate() {
                if follow.trim().is_empty() || section_head().is_match(follow) {
                    break;
                }
                keep[idx + 1 + offset] = true;
            }
        }
    }

    let mut excerpt = String::new();
    for (idx, line) in lines.iter().enumerate() {
        if !keep[idx] {
            continue;
        }
        if excerpt.len() + line.len() + 1 > TERMS_EXCERPT_LIMIT {
            break;
        }
        excerpt.push_str(line.trim_end());
        excerpt.push('\n');
    }

    let excerpt = excerpt.trim().to_string();
    if excerpt.is_empty() {
        // Nothing pattern-shaped found; keep the head of the document.
        let mut head: String = text.chars().take(TERMS_EXCERPT_LIMIT).collect();
        if let Some(cut) = head.rfind('\n') {
            head.truncate(cut);
        }
        head
    } else {
        excerpt
    }
}
