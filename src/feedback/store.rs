//! Append-only feedback state: corrections and derived training
//! examples, one JSON line each. Writes are serialized on a mutex.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::fsio;
use crate::models::{Correction, TrainingExample};

use super::FeedbackError;

pub struct FeedbackStore {
    corrections_path: PathBuf,
    training_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn new(feedback_dir: &Path) -> Self {
        Self {
            corrections_path: feedback_dir.join("corrections.jsonl"),
            training_path: feedback_dir.join("training_examples.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn append_correction(&self, correction: &Correction) -> Result<(), FeedbackError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fsio::append_jsonl(&self.corrections_path, correction)?;
        Ok(())
    }

    pub fn append_training(&self, example: &TrainingExample) -> Result<(), FeedbackError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fsio::append_jsonl(&self.training_path, example)?;
        Ok(())
    }

    pub fn corrections(&self) -> Result<Vec<Correction>, FeedbackError> {
        Ok(fsio::read_jsonl(&self.corrections_path)?)
    }

    pub fn training_examples(&self) -> Result<Vec<TrainingExample>, FeedbackError> {
        Ok(fsio::read_jsonl(&self.training_path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorrectionType, ParsedCorrection};
    use serde_json::json;
    use uuid::Uuid;

    fn correction(order_id: &str) -> Correction {
        Correction {
            correction_id: Uuid::new_v4(),
            order_id: order_id.into(),
            user_text: "Company should be Schur Flexibles".into(),
            parsed: ParsedCorrection {
                correction_type: CorrectionType::CompanyMatch,
                payload: json!({"company_name": "Schur Flexibles"}),
                confidence: 0.95,
                question: None,
            },
            created_at: chrono::Utc::now().naive_utc(),
            applied: true,
        }
    }

    #[test]
    fn corrections_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path());

        store.append_correction(&correction("ORDER_1_x")).unwrap();
        store.append_correction(&correction("ORDER_2_x")).unwrap();

        let loaded = store.corrections().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].order_id, "ORDER_1_x");
        assert_eq!(loaded[1].parsed.correction_type, CorrectionType::CompanyMatch);
    }

    #[test]
    fn training_examples_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path());

        store
            .append_training(&TrainingExample {
                signature: "customer_identity".into(),
                input: "cleaned message".into(),
                expected_output: json!({"customer": {"name": "Schur Flexibles"}}),
                weight: 1.0,
                derived_from_correction_id: Uuid::new_v4(),
            })
            .unwrap();

        let loaded = store.training_examples().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].signature, "customer_identity");
    }

    #[test]
    fn empty_store_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path());
        assert!(store.corrections().unwrap().is_empty());
        assert!(store.training_examples().unwrap().is_empty());
    }
}
