//! Maildir-backed mailbox: `new/` holds unread messages, `mark_read`
//! moves a message to `cur/` with the seen flag. Any MDA or fetch agent
//! that delivers into the Maildir feeds the processor.

use std::fs;
use std::path::{Path, PathBuf};

use mailparse::{MailHeaderMap, ParsedMail};

use super::{Attachment, EmailMessage, Mailbox, MailboxError};

pub struct MaildirMailbox {
    root: PathBuf,
}

impl MaildirMailbox {
    /// Open (and lazily create) a Maildir at `root`.
    pub fn open(root: &Path) -> Result<Self, MailboxError> {
        for sub in ["new", "cur", "tmp"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn new_path(&self, id: &str) -> PathBuf {
        self.root.join("new").join(id)
    }

    fn locate(&self, id: &str) -> Option<PathBuf> {
        let unread = self.new_path(id);
        if unread.exists() {
            return Some(unread);
        }
        // Already moved to cur/ (possibly with a flag suffix).
        let seen = self.root.join("cur").join(format!("{id}:2,S"));
        if seen.exists() {
            return Some(seen);
        }
        let plain = self.root.join("cur").join(id);
        plain.exists().then_some(plain)
    }
}

impl Mailbox for MaildirMailbox {
    fn list_unread(&self) -> Result<Vec<String>, MailboxError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("new"))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        // FIFO per mailbox: Maildir filenames start with the delivery
        // timestamp, so lexicographic order is arrival order.
        ids.sort();
        Ok(ids)
    }

    fn fetch(&self, message_id: &str) -> Result<EmailMessage, MailboxError> {
        let path = self
            .locate(message_id)
            .ok_or_else(|| MailboxError::NotFound(message_id.to_string()))?;
        let raw = fs::read(&path)?;
        parse_rfc822(message_id, &raw)
    }

    fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        let from = self.new_path(message_id);
        if !from.exists() {
            // Already moved; marking read twice is not an error.
            return Ok(());
        }
        let to = self.root.join("cur").join(format!("{message_id}:2,S"));
        fs::rename(&from, &to)?;
        Ok(())
    }
}

/// Decode an RFC-2822/MIME message into the pipeline's shape.
pub fn parse_rfc822(message_id: &str, raw: &[u8]) -> Result<EmailMessage, MailboxError> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| MailboxError::Parse {
        id: message_id.to_string(),
        message: e.to_string(),
    })?;

    let from = parsed
        .headers
        .get_first_value("From")
        .unwrap_or_default();
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();
    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.naive_utc());

    let mut body_text = String::new();
    let mut body_html = None;
    let mut attachments = Vec::new();
    collect_parts(&parsed, message_id, &mut body_text, &mut body_html, &mut attachments)?;

    Ok(EmailMessage {
        message_id: message_id.to_string(),
        from,
        subject,
        body_text,
        body_html,
        attachments,
        received_at,
    })
}

fn collect_parts(
    part: &ParsedMail,
    message_id: &str,
    body_text: &mut String,
    body_html: &mut Option<String>,
    attachments: &mut Vec<Attachment>,
) -> Result<(), MailboxError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, message_id, body_text, body_html, attachments)?;
        }
        return Ok(());
    }

    let mime = part.ctype.mimetype.to_lowercase();
    let disposition = part.get_content_disposition();
    let filename = disposition.params.get("filename").cloned().or_else(|| {
        part.ctype.params.get("name").cloned()
    });

    let is_attachment = disposition.disposition == mailparse::DispositionType::Attachment
        || filename.is_some()
        || (!mime.starts_with("text/") && mime != "message/rfc822");

    if is_attachment {
        let bytes = part.get_body_raw().map_err(|e| MailboxError::Parse {
            id: message_id.to_string(),
            message: format!("attachment decode: {e}"),
        })?;
        attachments.push(Attachment {
            filename: filename.unwrap_or_else(|| format!("part-{}.bin", attachments.len() + 1)),
            mime,
            bytes,
        });
        return Ok(());
    }

    let content = part.get_body().map_err(|e| MailboxError::Parse {
        id: message_id.to_string(),
        message: format!("body decode: {e}"),
    })?;

    if mime == "text/html" {
        if body_html.is_none() {
            *body_html = Some(content);
        }
    } else if body_text.is_empty() {
        *body_text = content;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "From: buyer@schur.com\r\n\
Subject: Order\r\n\
Date: Mon, 15 Jan 2024 10:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please ship 14x L1520-457.\r\n";

    fn multipart() -> String {
        let pdf_b64 = "JVBERi0xLjQKJSBmYWtlIG9yZGVyIHBkZg==";
        format!(
            "From: buyer@schur.com\r\n\
Subject: Order with attachment\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached order.\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"po.pdf\"\r\n\
Content-Disposition: attachment; filename=\"po.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{pdf_b64}\r\n\
--XYZ--\r\n"
        )
    }

    fn maildir_with(messages: &[(&str, &str)]) -> (tempfile::TempDir, MaildirMailbox) {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = MaildirMailbox::open(dir.path()).unwrap();
        for (name, content) in messages {
            fs::write(dir.path().join("new").join(name), content).unwrap();
        }
        (dir, mailbox)
    }

    #[test]
    fn lists_unread_in_arrival_order() {
        let (_dir, mailbox) = maildir_with(&[
            ("1700000002.m2", SIMPLE),
            ("1700000001.m1", SIMPLE),
        ]);
        let ids = mailbox.list_unread().unwrap();
        assert_eq!(ids, vec!["1700000001.m1", "1700000002.m2"]);
    }

    #[test]
    fn fetch_parses_headers_and_body() {
        let (_dir, mailbox) = maildir_with(&[("1700000001.m1", SIMPLE)]);
        let msg = mailbox.fetch("1700000001.m1").unwrap();
        assert_eq!(msg.from, "buyer@schur.com");
        assert_eq!(msg.subject, "Order");
        assert!(msg.body_text.contains("L1520-457"));
        assert!(msg.attachments.is_empty());
        assert!(msg.received_at.is_some());
    }

    #[test]
    fn fetch_decodes_pdf_attachment() {
        let raw = multipart();
        let (_dir, mailbox) = maildir_with(&[("1700000001.m1", raw.as_str())]);
        let msg = mailbox.fetch("1700000001.m1").unwrap();

        assert!(msg.body_text.contains("See attached order"));
        assert_eq!(msg.attachments.len(), 1);
        let att = &msg.attachments[0];
        assert_eq!(att.filename, "po.pdf");
        assert_eq!(att.mime, "application/pdf");
        assert!(att.bytes.starts_with(b"%PDF-1.4"));
    }

    #[test]
    fn mark_read_moves_to_cur_with_seen_flag() {
        let (dir, mailbox) = maildir_with(&[("1700000001.m1", SIMPLE)]);
        mailbox.mark_read("1700000001.m1").unwrap();

        assert!(mailbox.list_unread().unwrap().is_empty());
        assert!(dir.path().join("cur/1700000001.m1:2,S").exists());

        // Still fetchable after being marked read (replay support).
        let msg = mailbox.fetch("1700000001.m1").unwrap();
        assert_eq!(msg.subject, "Order");
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (_dir, mailbox) = maildir_with(&[("1700000001.m1", SIMPLE)]);
        mailbox.mark_read("1700000001.m1").unwrap();
        mailbox.mark_read("1700000001.m1").unwrap();
    }

    #[test]
    fn fetch_unknown_id_is_not_found() {
        let (_dir, mailbox) = maildir_with(&[]);
        assert!(matches!(
            mailbox.fetch("missing"),
            Err(MailboxError::NotFound(_))
        ));
    }
}
