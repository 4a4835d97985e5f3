//! Quoted-thread and signature stripping, plus HTML-to-text conversion.
//!
//! Cutting is conservative: a cut candidate is only taken when no
//! attachment-content marker appears after it. Signatures regularly
//! precede inlined PDF content, and cutting there destroys the order
//! data the rest of the pipeline needs.

use std::sync::OnceLock;

use regex::Regex;

use super::ATTACHMENT_MARKER;

fn cut_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Quoted reply headers.
            r"(?i)^On .{1,120} wrote:\s*$",
            r"(?i)^Am .{1,120} schrieb .{1,80}:\s*$",
            r"(?i)^-{2,}\s*(Original Message|Ursprüngliche Nachricht)\s*-{2,}$",
            r"(?i)^Von:\s.+$",
            r"(?i)^From:\s.+$",
            // Signature markers.
            r"^--\s*$",
            r"^_{3,}\s*$",
            r"(?i)^(Mit freundlichen Grüßen|Mit freundlichem Gruß|Freundliche Grüße)\b.*$",
            r"(?i)^(Best regards|Kind regards|Viele Grüße|Beste Grüße)\b.*$",
            r"(?i)^Gesendet von meinem .+$",
            r"(?i)^Sent from my .+$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

fn quoted_line() -> &'static Regex {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    QUOTED.get_or_init(|| Regex::new(r"^\s*>").unwrap())
}

/// Strip the quoted trailer/signature from a cleaned blob.
///
/// The earliest cut candidate is taken, but only if no
/// `[ATTACHMENT: ...]` marker appears after it.
pub fn strip_thread(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();

    let cut_at = lines.iter().enumerate().find_map(|(idx, line)| {
        let is_candidate = cut_patterns().iter().any(|p| p.is_match(line))
            || is_quoted_run_start(&lines, idx);
        if !is_candidate {
            return None;
        }
        let marker_after = lines[idx..]
            .iter()
            .any(|l| l.contains(ATTACHMENT_MARKER));
        (!marker_after).then_some(idx)
    });

    match cut_at {
        Some(idx) => lines[..idx].join("\n").trim_end().to_string(),
        None => text.trim_end().to_string(),
    }
}

/// A run of three or more `>`-quoted lines marks the quoted thread.
fn is_quoted_run_start(lines: &[&str], idx: usize) -> bool {
    lines[idx..]
        .iter()
        .take(3)
        .filter(|l| quoted_line().is_match(l))
        .count()
        >= 3
}

/// Minimal HTML-to-text: block tags become newlines, remaining tags are
/// dropped, common entities decoded.
pub fn html_to_text(html: &str) -> String {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| {
        Regex::new(r"(?i)<\s*(br|/p|/div|/tr|/li|/h[1-6])\s*/?\s*>").unwrap()
    });
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());

    let with_breaks = block.replace_all(html, "\n");
    let stripped = tag.replace_all(&with_breaks, "");

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&auml;", "ä")
        .replace("&ouml;", "ö")
        .replace("&uuml;", "ü")
        .replace("&szlig;", "ß");

    // Collapse runs of blank lines left by the tag removal.
    let mut out = String::with_capacity(decoded.len());
    let mut blank_run = 0;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim().to_string()
}
