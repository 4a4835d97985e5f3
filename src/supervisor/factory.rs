//! Production wiring: build the processing graph from [`Settings`].
//!
//! Every collaborator is constructed fresh per build, so a supervisor
//! reinit really does get new client sessions and a new catalog load.

use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::catalog::{CatalogStore, CatalogSync};
use crate::cleaner::{
    MessageCleaner, MockOcrEngine, MockPdfExtractor, OcrEngine, PdfExtractor, PdftotextCli,
    TesseractCli,
};
use crate::config::{Settings, DEFAULT_CALL_TIMEOUT_SECS};
use crate::erp::{ErpClient, ErpVerifier, JsonRpcErp, OrderWriter};
use crate::extraction::Extractor;
use crate::feedback::{FeedbackConfig, FeedbackParser, FeedbackProcessor, FeedbackStore};
use crate::llm::HttpLlm;
use crate::mailbox::{Mailbox, MaildirMailbox};
use crate::matching::{CandidateRetriever, EmbeddingIndex, MatchConfirmer, RetrieverConfig};
use crate::notify::{ChatGateway, Notifier, NullGateway, OrderIdAllocator, TelegramGateway};
use crate::pipeline::{shared_index, MessageProcessor, ProcessorConfig};

use super::supervisor::{GraphFactory, ProcessingGraph};
use super::SupervisorError;

pub struct ProductionGraphFactory {
    settings: Settings,
}

impl ProductionGraphFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl GraphFactory for ProductionGraphFactory {
    fn build(&self) -> Result<ProcessingGraph, SupervisorError> {
        let s = &self.settings;

        let catalog = Arc::new(
            CatalogStore::load(&s.catalog_dir())
                .map_err(|e| SupervisorError::Init(format!("catalog: {e}")))?,
        );

        let erp = build_erp(s)?;
        let llm = Arc::new(
            HttpLlm::new(
                &s.llm_base_url,
                s.llm_api_key.as_deref(),
                &s.llm_model,
                &s.embedding_model,
                DEFAULT_CALL_TIMEOUT_SECS,
            )
            .map_err(|e| SupervisorError::Init(format!("llm: {e}")))?,
        );

        let mailbox: Arc<dyn Mailbox> = Arc::new(
            MaildirMailbox::open(&s.maildir())
                .map_err(|e| SupervisorError::Init(format!("mailbox: {e}")))?,
        );

        let gateway: Arc<dyn ChatGateway> = match &s.telegram_bot_token {
            Some(token) => Arc::new(
                TelegramGateway::new(token)
                    .map_err(|e| SupervisorError::Init(format!("gateway: {e}")))?,
            ),
            None => Arc::new(NullGateway),
        };
        let chat_id = s.telegram_chat_id.clone().unwrap_or_default();

        // An index is nice to have at startup; without one the retriever
        // degrades to token matching until the sync worker rebuilds it.
        let initial_index =
            match EmbeddingIndex::load_or_build(&catalog, llm.as_ref(), &s.embeddings_dir()) {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!(error = %e, "Embedding index unavailable at startup");
                    None
                }
            };
        let index = shared_index(initial_index);

        let notifier = Arc::new(Notifier::new(
            gateway.clone(),
            &chat_id,
            s.enable_notifications,
            &s.feedback_dir(),
        ));

        let processor = Arc::new(MessageProcessor::new(
            MessageCleaner::new(build_pdf_extractor(), build_ocr_engine()),
            Extractor::new(
                llm.clone(),
                s.own_company_aliases.clone(),
                s.generic_nouns.clone(),
            ),
            CandidateRetriever::new(
                llm.clone(),
                RetrieverConfig {
                    semantic_floor: s.semantic_floor,
                    ..RetrieverConfig::default()
                },
            ),
            MatchConfirmer::new(llm.clone(), s.auto_threshold, s.review_threshold),
            ErpVerifier::new(erp.clone()),
            OrderWriter::new(erp.clone(), &s.audit_dir()),
            AuditLogger::new(&s.audit_dir()),
            notifier.clone(),
            OrderIdAllocator::load(&s.audit_dir()),
            catalog.clone(),
            index.clone(),
            ProcessorConfig {
                enable_order_creation: s.enable_order_creation,
                line_item_fanout: s.line_item_fanout,
            },
        ));

        let mut feedback = FeedbackProcessor::new(
            FeedbackParser::new(llm.clone()),
            FeedbackStore::new(&s.feedback_dir()),
            AuditLogger::new(&s.audit_dir()),
            notifier,
            FeedbackConfig {
                immediate_retrain: s.immediate_retrain,
                ..FeedbackConfig::default()
            },
        );
        if s.immediate_retrain {
            feedback = feedback.with_learner(processor.clone(), mailbox.clone());
        }

        let sync = Arc::new(CatalogSync::new(catalog.clone(), erp, &s.catalog_dir()));

        Ok(ProcessingGraph {
            processor,
            mailbox,
            feedback: Arc::new(feedback),
            sync,
            catalog,
            embedder: llm,
            gateway,
            index,
            embeddings_dir: s.embeddings_dir(),
        })
    }
}

/// Standalone ERP + catalog wiring for the `sync-once` command.
pub fn build_sync(settings: &Settings) -> Result<(Arc<CatalogStore>, CatalogSync), SupervisorError> {
    let catalog = Arc::new(
        CatalogStore::load(&settings.catalog_dir())
            .map_err(|e| SupervisorError::Init(format!("catalog: {e}")))?,
    );
    let erp = build_erp(settings)?;
    let sync = CatalogSync::new(catalog.clone(), erp, &settings.catalog_dir());
    Ok((catalog, sync))
}

fn build_erp(settings: &Settings) -> Result<Arc<dyn ErpClient>, SupervisorError> {
    let (Some(url), Some(db), Some(user), Some(password)) = (
        settings.erp_url.as_deref(),
        settings.erp_db.as_deref(),
        settings.erp_user.as_deref(),
        settings.erp_password.as_deref(),
    ) else {
        return Err(SupervisorError::Init(
            "ERP_URL, ERP_DB, ERP_USER and ERP_PASSWORD must be set".into(),
        ));
    };

    Ok(Arc::new(
        JsonRpcErp::new(url, db, user, password, DEFAULT_CALL_TIMEOUT_SECS)
            .map_err(|e| SupervisorError::Init(format!("erp: {e}")))?,
    ))
}

fn build_pdf_extractor() -> Box<dyn PdfExtractor> {
    match PdftotextCli::discover() {
        Ok(cli) => Box::new(cli),
        Err(e) => {
            tracing::warn!(error = %e, "pdftotext unavailable — PDFs will rely on OCR");
            Box::new(MockPdfExtractor::empty())
        }
    }
}

fn build_ocr_engine() -> Box<dyn OcrEngine> {
    match TesseractCli::discover() {
        Ok(cli) => Box::new(cli),
        Err(e) => {
            tracing::warn!(error = %e, "tesseract unavailable — image OCR disabled");
            Box::new(MockOcrEngine::new(""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_erp_settings_fail_init() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let factory = ProductionGraphFactory::new(settings);
        let err = factory.build().unwrap_err();
        assert!(err.to_string().contains("ERP_URL"));
    }

    #[test]
    fn sync_wiring_needs_erp_too() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        assert!(build_sync(&settings).is_err());
    }
}
