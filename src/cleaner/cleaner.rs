//! Message cleaning orchestration: body normalization, attachment
//! decoding with OCR fallback, T&C reduction, thread stripping.

use crate::mailbox::{Attachment, EmailMessage};

use super::extract::{OcrEngine, PdfExtractor};
use super::strip::{html_to_text, strip_thread};
use super::terms::{extract_business_terms, is_reducible_terms};
use super::{AttachmentMeta, CleanError, CleanedMessage, ATTACHMENT_MARKER};

/// PDF text below this length is treated as a scan and routed to OCR.
const MIN_PDF_TEXT_CHARS: usize = 40;

pub struct MessageCleaner {
    pdf: Box<dyn PdfExtractor>,
    ocr: Box<dyn OcrEngine>,
}

impl MessageCleaner {
    pub fn new(pdf: Box<dyn PdfExtractor>, ocr: Box<dyn OcrEngine>) -> Self {
        Self { pdf, ocr }
    }

    /// Produce the cleaned text blob for one message.
    pub fn clean(&self, message: &EmailMessage) -> Result<CleanedMessage, CleanError> {
        let body = if !message.body_text.trim().is_empty() {
            message.body_text.clone()
        } else if let Some(html) = &message.body_html {
            html_to_text(html)
        } else {
            String::new()
        };

        let mut blob = body.trim().to_string();
        let mut metas = Vec::with_capacity(message.attachments.len());
        let mut any_ocr = false;

        for attachment in &message.attachments {
            let (text, meta) = self.attachment_text(attachment);
            any_ocr |= meta.ocr_used;
            if !text.trim().is_empty() {
                blob.push_str("\n\n");
                blob.push_str(ATTACHMENT_MARKER);
                blob.push(' ');
                blob.push_str(&meta.filename);
                blob.push_str("]\n");
                blob.push_str(text.trim());
            }
            metas.push(meta);
        }

        let text = strip_thread(&blob);
        let empty_content = text.trim().is_empty();

        if empty_content {
            tracing::warn!(
                message_id = %message.message_id,
                attachments = message.attachments.len(),
                "Cleaning produced no text"
            );
        }

        Ok(CleanedMessage {
            text,
            attachments: metas,
            ocr_used: any_ocr,
            empty_content,
        })
    }

    /// Decode one attachment to text, with OCR fallback for scanned PDFs.
    fn attachment_text(&self, attachment: &Attachment) -> (String, AttachmentMeta) {
        let mut meta = AttachmentMeta {
            filename: attachment.filename.clone(),
            mime: attachment.mime.clone(),
            size_bytes: attachment.bytes.len(),
            text_chars: 0,
            ocr_used: false,
            reduced: false,
            skipped_reason: None,
        };

        let mut text = if is_pdf(attachment) {
            match self.pdf.pdf_to_text(&attachment.bytes) {
                Ok(extracted) if extracted.trim().len() >= MIN_PDF_TEXT_CHARS => extracted,
                Ok(_) => {
                    tracing::info!(
                        filename = %attachment.filename,
                        "PDF text below threshold — falling back to OCR"
                    );
                    meta.ocr_used = true;
                    self.ocr_or_empty(attachment)
                }
                Err(e) => {
                    tracing::warn!(filename = %attachment.filename, error = %e, "PDF extraction failed — trying OCR");
                    meta.ocr_used = true;
                    self.ocr_or_empty(attachment)
                }
            }
        } else if attachment.mime.starts_with("image/") {
            meta.ocr_used = true;
            self.ocr_or_empty(attachment)
        } else if attachment.mime.starts_with("text/") {
            String::from_utf8_lossy(&attachment.bytes).into_owned()
        } else {
            meta.skipped_reason = Some(format!("unsupported mime {}", attachment.mime));
            String::new()
        };

        if is_reducible_terms(&attachment.filename, text.len()) {
            tracing::info!(
                filename = %attachment.filename,
                chars = text.len(),
                "Reducing T&C attachment to business-terms excerpt"
            );
            text = extract_business_terms(&text);
            meta.reduced = true;
        }

        meta.text_chars = text.len();
        (text, meta)
    }

    fn ocr_or_empty(&self, attachment: &Attachment) -> String {
        match self.ocr.ocr_image(&attachment.bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(filename = %attachment.filename, error = %e, "OCR failed");
                String::new()
            }
        }
    }
}

fn is_pdf(attachment: &Attachment) -> bool {
    attachment.mime == "application/pdf"
        || attachment.filename.to_lowercase().ends_with(".pdf")
        || attachment.bytes.starts_with(b"%PDF")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::extract::{FailingOcrEngine, MockOcrEngine, MockPdfExtractor};
    use crate::cleaner::terms::TERMS_SIZE_THRESHOLD;
    use crate::mailbox::MockMailbox;

    fn cleaner(pdf_text: &str, ocr_text: &str) -> MessageCleaner {
        MessageCleaner::new(
            Box::new(MockPdfExtractor::new(pdf_text)),
            Box::new(MockOcrEngine::new(ocr_text)),
        )
    }

    fn message_with_attachment(body: &str, filename: &str, mime: &str, bytes: &[u8]) -> EmailMessage {
        let mut msg = MockMailbox::text_message("m1", "buyer@schur.com", "Order", body);
        msg.attachments.push(Attachment {
            filename: filename.into(),
            mime: mime.into(),
            bytes: bytes.to_vec(),
        });
        msg
    }

    #[test]
    fn plain_body_passes_through() {
        let c = cleaner("", "");
        let msg = MockMailbox::text_message("m1", "a@b.c", "s", "Please ship 14x L1520-457.");
        let cleaned = c.clean(&msg).unwrap();
        assert_eq!(cleaned.text, "Please ship 14x L1520-457.");
        assert!(!cleaned.empty_content);
        assert!(!cleaned.ocr_used);
    }

    #[test]
    fn html_body_used_when_text_empty() {
        let c = cleaner("", "");
        let mut msg = MockMailbox::text_message("m1", "a@b.c", "s", "");
        msg.body_html = Some("<p>Bitte 5x SDS1923 liefern</p>".into());
        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.text.contains("SDS1923"));
    }

    #[test]
    fn pdf_text_appended_with_marker() {
        let pdf_text = "PO 117\n14x L1520-457 at 42.00 EUR, delivery Flensburg plant";
        let c = cleaner(pdf_text, "");
        let msg = message_with_attachment("See attached.", "po.pdf", "application/pdf", b"%PDF-1.4");

        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.text.contains("[ATTACHMENT: po.pdf]"));
        assert!(cleaned.text.contains("14x L1520-457"));
        assert!(!cleaned.ocr_used);
        assert_eq!(cleaned.attachments.len(), 1);
        assert!(!cleaned.attachments[0].ocr_used);
    }

    #[test]
    fn empty_pdf_triggers_ocr_fallback() {
        let c = cleaner("", "OCR: 5x SDS1923 Duro Seal for Bobst press, urgent delivery");
        let msg = message_with_attachment("Order attached.", "scan.pdf", "application/pdf", b"%PDF-1.4");

        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.ocr_used);
        assert!(cleaned.text.contains("SDS1923"));
        assert!(cleaned.attachments[0].ocr_used);
    }

    #[test]
    fn inline_image_goes_straight_to_ocr() {
        let c = cleaner("", "handwritten order 3x blade");
        let msg = message_with_attachment("", "photo.jpg", "image/jpeg", &[0xFF, 0xD8]);

        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.ocr_used);
        assert!(cleaned.text.contains("handwritten order"));
    }

    #[test]
    fn empty_everything_flags_empty_content() {
        let c = MessageCleaner::new(
            Box::new(MockPdfExtractor::empty()),
            Box::new(FailingOcrEngine),
        );
        let msg = message_with_attachment("", "scan.pdf", "application/pdf", b"%PDF-1.4");

        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.empty_content);
        assert!(cleaned.text.trim().is_empty());
    }

    #[test]
    fn large_terms_attachment_reduced() {
        let mut doc = String::new();
        for i in 0..600 {
            doc.push_str(&format!("Clause {i}: boilerplate filler for sizing purposes.\n"));
        }
        doc.push_str("Payment\nPayment net 30 days.\n");
        assert!(doc.len() >= TERMS_SIZE_THRESHOLD);

        let c = cleaner(&doc, "");
        let msg = message_with_attachment("FYI", "AGB_2024.pdf", "application/pdf", b"%PDF-1.4");

        let cleaned = c.clean(&msg).unwrap();
        assert!(cleaned.attachments[0].reduced);
        assert!(cleaned.text.contains("Payment net 30 days"));
        assert!(!cleaned.text.contains("Clause 599"));
    }

    #[test]
    fn large_order_pdf_preserved_verbatim() {
        let mut doc = String::from("PURCHASE ORDER 117\n");
        for i in 0..600 {
            doc.push_str(&format!("Item {i}: 10x L1520-457 blade\n"));
        }
        assert!(doc.len() >= TERMS_SIZE_THRESHOLD);

        let c = cleaner(&doc, "");
        let msg = message_with_attachment("Order", "purchase_order.pdf", "application/pdf", b"%PDF-1.4");

        let cleaned = c.clean(&msg).unwrap();
        assert!(!cleaned.attachments[0].reduced);
        assert!(cleaned.text.contains("Item 599"));
    }

    #[test]
    fn signature_before_attachment_preserved() {
        let c = cleaner("14x L1520-457", "");
        let msg = message_with_attachment(
            "Order attached.\n\nBest regards\nHans Maier",
            "po.pdf",
            "application/pdf",
            b"%PDF-1.4",
        );

        let cleaned = c.clean(&msg).unwrap();
        // The signature line stays because attachment content follows it.
        assert!(cleaned.text.contains("Best regards"));
        assert!(cleaned.text.contains("14x L1520-457"));
    }

    #[test]
    fn signature_stripped_when_nothing_follows() {
        let c = cleaner("", "");
        let msg = MockMailbox::text_message(
            "m1",
            "a@b.c",
            "s",
            "Please ship 14x L1520-457.\n\nMit freundlichen Grüßen\nHans",
        );
        let cleaned = c.clean(&msg).unwrap();
        assert_eq!(cleaned.text, "Please ship 14x L1520-457.");
    }
}
