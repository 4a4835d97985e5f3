//! Health counters and the heartbeat file.
//!
//! Counters are updated by the processing workers; the heartbeat thread
//! (and every processed message) renders them to `health/status.txt` in
//! a line-oriented `key: value` format the `health` CLI can read back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::NaiveDateTime;

use crate::fsio;

#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_at: Mutex<Option<NaiveDateTime>>,
    last_error: Mutex<Option<String>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success_at.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(chrono::Utc::now().naive_utc());
    }

    pub fn record_failure(&self, error: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn reset_consecutive(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn last_success_at(&self) -> Option<NaiveDateTime> {
        *self.last_success_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct HealthFile {
    path: PathBuf,
    started: Instant,
}

impl HealthFile {
    pub fn new(health_dir: &Path) -> Self {
        Self {
            path: health_dir.join("status.txt"),
            started: Instant::now(),
        }
    }

    /// Render the current counters to the heartbeat file.
    pub fn write(&self, counters: &Counters, status: &str) {
        let uptime = self.started.elapsed().as_secs();
        let content = format!(
            "status: {status}\n\
updated_at: {}\n\
uptime_seconds: {uptime}\n\
processed: {}\n\
failed: {}\n\
consecutive_failures: {}\n\
last_success_at: {}\n\
last_error: {}\n",
            chrono::Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S"),
            counters.processed(),
            counters.failed(),
            counters.consecutive_failures(),
            counters
                .last_success_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
            counters.last_error().unwrap_or_else(|| "-".into()),
        );

        if let Err(e) = fsio::write_atomic(&self.path, content.as_bytes()) {
            tracing::error!(error = %e, "Health file write failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the heartbeat file for the `health` CLI command.
pub fn read_health_file(health_dir: &Path) -> Option<String> {
    std::fs::read_to_string(health_dir.join("status.txt")).ok()
}
