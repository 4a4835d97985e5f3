//! Per-message orchestration: clean → extract → match → verify →
//! (optional) order → audit → notify.
//!
//! Trait-based DI throughout; the supervisor constructs and owns the
//! processor. Line-item retrieval fans out on scoped threads, bounded to
//! cap LLM/embedding call concurrency; results are re-ordered by index
//! before anything is written.

use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use serde_json::json;

use crate::audit::AuditLogger;
use crate::catalog::{CatalogStore, Snapshot};
use crate::cleaner::{CleanedMessage, MessageCleaner};
use crate::erp::{ErpVerifier, OrderDraft, OrderLine, OrderWriter};
use crate::extraction::{ExtractionError, Extractor};
use crate::mailbox::EmailMessage;
use crate::matching::{CandidateRetriever, EmbeddingIndex, MatchConfirmer, RetrievedCandidate};
use crate::models::{
    CustomerMatch, ExtractedCustomer, Extraction, IntentType, LineItemMatch, OrderOutcome,
    ProcessingResult, ProcessingStatus,
};
use crate::notify::{Notifier, OrderIdAllocator};

use super::ProcessingError;

/// The embedding index is rebuilt by the sync worker and swapped in here;
/// processing workers only ever read it.
pub type SharedIndex = Arc<RwLock<Option<Arc<EmbeddingIndex>>>>;

pub fn shared_index(initial: Option<Arc<EmbeddingIndex>>) -> SharedIndex {
    Arc::new(RwLock::new(initial))
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub enable_order_creation: bool,
    /// Bound on concurrent line-item retrieval within one message.
    pub line_item_fanout: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            enable_order_creation: false,
            line_item_fanout: 4,
        }
    }
}

pub struct MessageProcessor {
    cleaner: MessageCleaner,
    extractor: Extractor,
    retriever: CandidateRetriever,
    confirmer: MatchConfirmer,
    verifier: ErpVerifier,
    order_writer: OrderWriter,
    audit: AuditLogger,
    notifier: Arc<Notifier>,
    order_ids: OrderIdAllocator,
    catalog: Arc<CatalogStore>,
    index: SharedIndex,
    config: ProcessorConfig,
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cleaner: MessageCleaner,
        extractor: Extractor,
        retriever: CandidateRetriever,
        confirmer: MatchConfirmer,
        verifier: ErpVerifier,
        order_writer: OrderWriter,
        audit: AuditLogger,
        notifier: Arc<Notifier>,
        order_ids: OrderIdAllocator,
        catalog: Arc<CatalogStore>,
        index: SharedIndex,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            cleaner,
            extractor,
            retriever,
            confirmer,
            verifier,
            order_writer,
            audit,
            notifier,
            order_ids,
            catalog,
            index,
            config,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Process one message end to end. `Ok` means the message was fully
    /// handled (possibly flagged for review) and may be marked read.
    pub fn process(&self, message: &EmailMessage) -> Result<ProcessingResult, ProcessingError> {
        let started = std::time::Instant::now();
        let created_at = chrono::Utc::now().naive_utc();
        let _span =
            tracing::info_span!("process_message", message_id = %message.message_id).entered();

        let entry = self.audit.begin(&message.message_id, created_at)?;

        // Replay of an already-summarized message keeps its order id so
        // the audit content stays stable across the crash window.
        let prior_order_id = self
            .audit
            .find_result_for_message(&message.message_id)
            .map(|r| r.order_id);

        // Step 1: clean
        let cleaned = self.cleaner.clean(message)?;
        entry.write_step(
            "parsing.json",
            &json!({
                "cleaned_text": cleaned.text,
                "attachments": cleaned.attachments,
                "ocr_used": cleaned.ocr_used,
                "empty_content": cleaned.empty_content,
            }),
        );

        if cleaned.empty_content {
            let result = self.empty_content_result(message, &cleaned, created_at, prior_order_id);
            entry.write_summary(&result);
            self.notifier.notify_result(&result);
            return Ok(result);
        }

        // Step 2: extract
        let (extraction, extraction_note) =
            match self.extractor.extract(&cleaned.text, &message.from) {
                Ok(extraction) => (extraction, None),
                Err(ExtractionError::Llm(e)) if e.is_transient() => {
                    return Err(ProcessingError::Llm(e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Extraction failed — flagging for review");
                    (placeholder_extraction(&message.from), Some(e.to_string()))
                }
            };
        entry.write_step("extraction.json", &extraction);

        let snapshot = self.catalog.snapshot();
        let index = self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        // Steps 3+4: retrieve and confirm per line item, bounded fan-out.
        let per_line = self.match_line_items(&extraction, &snapshot, index.as_deref());

        entry.write_step(
            "candidates.json",
            &per_line
                .iter()
                .map(|(idx, candidates, _)| {
                    json!({
                        "line_index": idx,
                        "candidates": candidates
                            .iter()
                            .map(|c| json!({
                                "product_id": c.product_id,
                                "score": c.score,
                                "explain": c.explain,
                            }))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect::<Vec<_>>(),
        );

        let matches: Vec<LineItemMatch> =
            per_line.into_iter().map(|(_, _, matched)| matched).collect();
        entry.write_step("matches.json", &matches);

        // Step 5: customer match against the local snapshot.
        let customer_match = match_customer(&extraction.customer, &snapshot);

        // Step 6: ERP verification.
        let verification = self.verifier.verify(
            &matches,
            &customer_match,
            extraction.customer.name.as_deref(),
        );
        entry.write_step("erp.json", &verification);

        // Step 7: optional draft order. Never submitted past the
        // per-message deadline; the audited result still completes.
        let order = if started.elapsed().as_secs() >= crate::config::MESSAGE_DEADLINE_SECS {
            tracing::warn!(
                elapsed_secs = started.elapsed().as_secs(),
                "Per-message deadline exceeded — skipping order submission"
            );
            None
        } else {
            self.maybe_submit_order(message, &extraction, &matches, &verification)
        };
        if let Some(order) = &order {
            entry.write_step("order.json", order);
        }

        let requires_review = extraction_note.is_some()
            || matches.iter().any(|m| m.requires_review)
            || !verification.all_verified();

        let order_id = prior_order_id.unwrap_or_else(|| self.order_ids.next(created_at));
        let mut result = ProcessingResult {
            message_id: message.message_id.clone(),
            order_id,
            extraction,
            matches,
            customer_match,
            erp_verification: Some(verification),
            order,
            created_at,
            status: if requires_review {
                ProcessingStatus::RequiresReview
            } else {
                ProcessingStatus::Ok
            },
        };
        if let Some(note) = extraction_note {
            result.extraction.notes = Some(note);
        }

        // Step 8: audit summary + operator digest.
        entry.write_summary(&result);
        self.notifier.notify_result(&result);

        tracing::info!(
            order_id = %result.order_id,
            status = ?result.status,
            line_items = result.extraction.line_items.len(),
            "Message processed"
        );
        Ok(result)
    }

    /// Retrieve and confirm all line items, preserving index order.
    fn match_line_items(
        &self,
        extraction: &Extraction,
        snapshot: &Snapshot,
        index: Option<&EmbeddingIndex>,
    ) -> Vec<(usize, Vec<RetrievedCandidate>, LineItemMatch)> {
        let items: Vec<(usize, &crate::models::LineItem)> =
            extraction.line_items.iter().enumerate().collect();

        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.config.line_item_fanout.max(1)) {
            let chunk_results: Vec<_> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|(idx, item)| {
                        scope.spawn(move || {
                            let candidates = self.retriever.retrieve(item, snapshot, index);
                            let matched =
                                self.confirmer.confirm(item, *idx, &candidates, snapshot);
                            (*idx, candidates, matched)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().expect("line-item worker panicked")).collect()
            });
            results.extend(chunk_results);
        }

        // Fan-out may complete out of order; matches.json is index-ordered.
        results.sort_by_key(|(idx, _, _)| *idx);
        results
    }

    fn maybe_submit_order(
        &self,
        message: &EmailMessage,
        extraction: &Extraction,
        matches: &[LineItemMatch],
        verification: &crate::models::ErpVerification,
    ) -> Option<OrderOutcome> {
        if !self.config.enable_order_creation {
            return None;
        }
        if extraction.intent_type != IntentType::OrderInquiry || extraction.line_items.is_empty() {
            return None;
        }
        if !verification.all_verified() || matches.iter().any(|m| m.chosen_product_id.is_none()) {
            tracing::info!("Order creation skipped — not fully verified");
            return None;
        }

        let customer_erp_id = verification.customer.erp_id?;
        let lines: Vec<OrderLine> = matches
            .iter()
            .filter_map(|m| {
                let item = extraction.line_items.get(m.line_index)?;
                Some(OrderLine {
                    product_id: m.chosen_product_id?,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
            })
            .collect();

        let draft = OrderDraft {
            customer_erp_id,
            order_ref: extraction.order_ref.clone(),
            lines,
        };
        Some(self.order_writer.submit(&message.message_id, &draft))
    }

    fn empty_content_result(
        &self,
        message: &EmailMessage,
        cleaned: &CleanedMessage,
        created_at: NaiveDateTime,
        prior_order_id: Option<String>,
    ) -> ProcessingResult {
        tracing::warn!(
            ocr_used = cleaned.ocr_used,
            "Message yielded no content — flagged empty_content"
        );
        ProcessingResult {
            message_id: message.message_id.clone(),
            order_id: prior_order_id.unwrap_or_else(|| self.order_ids.next(created_at)),
            extraction: Extraction {
                intent_type: IntentType::Other,
                intent_confidence: 0.0,
                customer: ExtractedCustomer {
                    email: Some(message.from.clone()),
                    ..Default::default()
                },
                line_items: Vec::new(),
                order_ref: None,
                notes: Some("empty_content".into()),
            },
            matches: Vec::new(),
            customer_match: CustomerMatch::default(),
            erp_verification: None,
            order: None,
            created_at,
            status: ProcessingStatus::RequiresReview,
        }
    }
}

fn placeholder_extraction(sender: &str) -> Extraction {
    Extraction {
        intent_type: IntentType::Other,
        intent_confidence: 0.0,
        customer: ExtractedCustomer {
            email: Some(sender.to_string()),
            ..Default::default()
        },
        line_items: Vec::new(),
        order_ref: None,
        notes: None,
    }
}

/// Resolve the extracted customer against the local snapshot: exact
/// normalized name first, then containment.
pub fn match_customer(customer: &ExtractedCustomer, snapshot: &Snapshot) -> CustomerMatch {
    let Some(name) = customer.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return CustomerMatch::default();
    };

    if let Some(hit) = snapshot.customer_by_name(name) {
        return CustomerMatch {
            customer_id: Some(hit.id),
            matched_name: Some(hit.name.clone()),
            confidence: 1.0,
        };
    }

    let contains = snapshot.search_customer_contains(name);
    if let Some(hit) = contains.first() {
        return CustomerMatch {
            customer_id: Some(hit.id),
            matched_name: Some(hit.name.clone()),
            confidence: 0.8,
        };
    }

    CustomerMatch {
        customer_id: None,
        matched_name: None,
        confidence: 0.0,
    }
}
