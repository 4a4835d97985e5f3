//! The 24/7 supervisor: lifecycle, health, recovery.
//!
//! Three long-lived worker kinds plus a monitor:
//! - one poller thread feeding a bounded channel (at-most-once against a
//!   single mailbox, FIFO),
//! - a small processing pool running the pipeline end to end,
//! - one sync thread refreshing the catalog and embedding index,
//! - one feedback listener long-polling the operator channel.
//!
//! After `max_consecutive_failures` the whole processing graph is torn
//! down and rebuilt (fresh catalog load, fresh client sessions). A
//! failed rebuild keeps alerting and retrying. Shutdown finishes the
//! in-flight message, then exits cleanly.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::catalog::{CatalogStore, CatalogSync, SyncError};
use crate::config::Settings;
use crate::feedback::{FeedbackProcessor, InboundFeedback};
use crate::llm::EmbeddingClient;
use crate::mailbox::{EmailMessage, Mailbox};
use crate::matching::EmbeddingIndex;
use crate::notify::{AlertMailer, ChatGateway};
use crate::pipeline::{MessageProcessor, SharedIndex};

use super::backoff::Backoff;
use super::health::{Counters, HealthFile};
use super::SupervisorError;

/// Alert storm cooldown per alert kind.
const ALERT_COOLDOWN: Duration = Duration::from_secs(300);

/// Granularity of stop-flag checks inside sleeps.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Everything one processing epoch runs on. Rebuilt wholesale on
/// recovery.
pub struct ProcessingGraph {
    pub processor: Arc<MessageProcessor>,
    pub mailbox: Arc<dyn Mailbox>,
    pub feedback: Arc<FeedbackProcessor>,
    pub sync: Arc<CatalogSync>,
    pub catalog: Arc<CatalogStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub gateway: Arc<dyn ChatGateway>,
    pub index: SharedIndex,
    pub embeddings_dir: PathBuf,
}

impl std::fmt::Debug for ProcessingGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingGraph")
            .field("embeddings_dir", &self.embeddings_dir)
            .finish_non_exhaustive()
    }
}

/// Builds a fresh processing graph. The production factory wires real
/// clients; tests substitute mocks.
pub trait GraphFactory: Send + Sync {
    fn build(&self) -> Result<ProcessingGraph, SupervisorError>;
}

/// Alert fan-out with a per-kind cooldown.
pub struct AlertDispatcher {
    mailer: Box<dyn AlertMailer>,
    to: Option<String>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertDispatcher {
    pub fn new(mailer: Box<dyn AlertMailer>, to: Option<String>) -> Self {
        Self {
            mailer,
            to,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Lifecycle alerts (startup/shutdown) bypass the cooldown.
    pub fn lifecycle(&self, subject: &str, body: &str) {
        self.dispatch(subject, body);
    }

    pub fn throttled(&self, kind: &str, subject: &str, body: &str) {
        let mut last = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = last.get(kind) {
            if at.elapsed() < ALERT_COOLDOWN {
                tracing::debug!(kind, "Alert suppressed by cooldown");
                return;
            }
        }
        last.insert(kind.to_string(), Instant::now());
        drop(last);
        self.dispatch(subject, body);
    }

    fn dispatch(&self, subject: &str, body: &str) {
        match &self.to {
            Some(to) => self.mailer.send(to, subject, body),
            None => tracing::warn!(subject, body, "ALERT (no admin address configured)"),
        }
    }
}

enum EpochEnd {
    Shutdown,
    Reinit,
}

pub struct Supervisor {
    settings: Settings,
    factory: Box<dyn GraphFactory>,
    alerts: AlertDispatcher,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    health: Arc<HealthFile>,
}

impl Supervisor {
    pub fn new(
        settings: Settings,
        factory: Box<dyn GraphFactory>,
        mailer: Box<dyn AlertMailer>,
    ) -> Self {
        let alerts = AlertDispatcher::new(mailer, settings.admin_alert_address.clone());
        let health = Arc::new(HealthFile::new(&settings.health_dir()));
        Self {
            settings,
            factory,
            alerts,
            shutdown: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::new()),
            health,
        }
    }

    /// Flag checked between messages; set it from a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// Run until shutdown. `Err` only on fatal first initialization.
    pub fn run(&self) -> Result<(), SupervisorError> {
        tracing::info!("Supervisor starting");
        let mut graph = self.factory.build()?;
        self.alerts.lifecycle("orderdesk started", "Supervisor initialized and polling.");
        self.health.write(&self.counters, "running");

        loop {
            match self.run_epoch(&graph) {
                EpochEnd::Shutdown => {
                    tracing::info!("Supervisor shutting down cleanly");
                    self.alerts.lifecycle("orderdesk stopped", "Supervisor shut down.");
                    self.health.write(&self.counters, "stopped");
                    return Ok(());
                }
                EpochEnd::Reinit => {
                    self.alerts.throttled(
                        "reinit",
                        "orderdesk recovering",
                        &format!(
                            "{} consecutive failures — reinitializing the processing graph. Last error: {}",
                            self.counters.consecutive_failures(),
                            self.counters.last_error().unwrap_or_else(|| "unknown".into()),
                        ),
                    );

                    let mut backoff = Backoff::supervisor();
                    graph = loop {
                        if self.shutdown.load(Ordering::SeqCst) {
                            self.alerts.lifecycle("orderdesk stopped", "Shut down during recovery.");
                            self.health.write(&self.counters, "stopped");
                            return Ok(());
                        }
                        match self.factory.build() {
                            Ok(graph) => {
                                tracing::info!("Processing graph reinitialized");
                                self.counters.reset_consecutive();
                                break graph;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Reinitialization failed — retrying");
                                self.alerts.throttled(
                                    "reinit_failed",
                                    "orderdesk reinit failing",
                                    &e.to_string(),
                                );
                                sleep_unless(&self.shutdown, backoff.next_delay());
                            }
                        }
                    };
                }
            }
        }
    }

    /// One epoch over a fixed graph. Returns why it ended.
    fn run_epoch(&self, graph: &ProcessingGraph) -> EpochEnd {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::sync_channel::<EmailMessage>(
            self.settings.processing_workers.max(1),
        );
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let end = std::thread::scope(|scope| {
            scope.spawn(|| {
                poller_loop(
                    graph.mailbox.as_ref(),
                    &tx,
                    &in_flight,
                    &stop,
                    self.settings.poll_interval,
                    &self.counters,
                )
            });

            for worker_id in 0..self.settings.processing_workers.max(1) {
                let rx = rx.clone();
                let in_flight = in_flight.clone();
                let stop = stop.clone();
                let counters = self.counters.clone();
                let health = self.health.clone();
                scope.spawn(move || {
                    worker_loop(
                        worker_id,
                        graph,
                        &rx,
                        &in_flight,
                        &stop,
                        &counters,
                        &health,
                    )
                });
            }

            scope.spawn(|| sync_loop(graph, &stop, self.settings.sync_interval, &self.alerts));
            scope.spawn(|| feedback_loop(graph, &stop));
            scope.spawn(|| {
                heartbeat_loop(
                    &self.counters,
                    &self.health,
                    &stop,
                    self.settings.heartbeat_interval,
                )
            });

            // Monitor: watches the shutdown flag and the failure counter.
            let end = loop {
                if self.shutdown.load(Ordering::SeqCst) {
                    break EpochEnd::Shutdown;
                }
                if self.counters.consecutive_failures() >= self.settings.max_consecutive_failures {
                    tracing::warn!(
                        consecutive = self.counters.consecutive_failures(),
                        "Failure threshold crossed — tearing down for reinit"
                    );
                    break EpochEnd::Reinit;
                }
                std::thread::sleep(Duration::from_millis(100));
            };

            stop.store(true, Ordering::SeqCst);
            end
        });

        end
    }
}

fn poller_loop(
    mailbox: &dyn Mailbox,
    tx: &SyncSender<EmailMessage>,
    in_flight: &Mutex<HashSet<String>>,
    stop: &AtomicBool,
    poll_interval: Duration,
    counters: &Counters,
) {
    tracing::info!("Poller started");
    while !stop.load(Ordering::SeqCst) {
        match mailbox.list_unread() {
            Ok(ids) => {
                for id in ids {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    {
                        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
                        if !set.insert(id.clone()) {
                            continue;
                        }
                    }

                    let message = match mailbox.fetch(&id) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(message_id = %id, error = %e, "Fetch failed");
                            counters.record_failure(&format!("fetch {id}: {e}"));
                            in_flight.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                            continue;
                        }
                    };

                    // Bounded channel: back-pressure instead of running
                    // ahead of processing.
                    let mut pending = message;
                    loop {
                        match tx.try_send(pending) {
                            Ok(()) => break,
                            Err(TrySendError::Full(back)) => {
                                if stop.load(Ordering::SeqCst) {
                                    return;
                                }
                                pending = back;
                                std::thread::sleep(Duration::from_millis(100));
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Mailbox listing failed");
                counters.record_failure(&format!("list_unread: {e}"));
            }
        }

        sleep_unless(stop, poll_interval);
    }
    tracing::info!("Poller stopped");
}

fn worker_loop(
    worker_id: usize,
    graph: &ProcessingGraph,
    rx: &Mutex<Receiver<EmailMessage>>,
    in_flight: &Mutex<HashSet<String>>,
    stop: &AtomicBool,
    counters: &Counters,
    health: &HealthFile,
) {
    tracing::info!(worker_id, "Processing worker started");
    let mut backoff = Backoff::supervisor();

    // The stop flag is honored between messages: an in-flight message
    // always completes (and audits) before the worker exits.
    while !stop.load(Ordering::SeqCst) {
        let received = {
            let rx = rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.recv_timeout(Duration::from_millis(300))
        };

        let message = match received {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let message_id = message.message_id.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            graph.processor.process(&message)
        }));

        match outcome {
            Ok(Ok(result)) => {
                // Audit exists before mark-read; a crash in between only
                // causes an idempotent replay.
                if let Err(e) = graph.mailbox.mark_read(&message_id) {
                    tracing::error!(message_id = %message_id, error = %e, "mark_read failed — message will replay");
                    counters.record_failure(&format!("mark_read {message_id}: {e}"));
                } else {
                    tracing::info!(message_id = %message_id, order_id = %result.order_id, "Message completed");
                    counters.record_success();
                    backoff.reset();
                }
            }
            Ok(Err(e)) => {
                tracing::error!(message_id = %message_id, error = %e, "Processing failed");
                counters.record_failure(&e.to_string());
                sleep_unless(stop, backoff.next_delay());
            }
            Err(panic) => {
                // Bug-class failure: abandon the message, count it, and
                // let the reinit threshold decide what happens next.
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(
                    message_id = %message_id,
                    detail = %detail,
                    "Internal invariant violated while processing — message abandoned"
                );
                counters.record_failure(&format!("internal invariant: {detail}"));
            }
        }

        in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&message_id);
        health.write(counters, "running");
    }
    tracing::info!(worker_id, "Processing worker stopped");
}

fn sync_loop(graph: &ProcessingGraph, stop: &AtomicBool, interval: Duration, alerts: &AlertDispatcher) {
    tracing::info!("Sync worker started");
    loop {
        sleep_unless(stop, interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match graph.sync.sync() {
            Ok(report) => {
                if report.products_synced > 0 {
                    rebuild_index(graph);
                }
            }
            Err(SyncError::Transient(e)) => {
                tracing::warn!(error = %e, "Sync transient failure — will retry next tick");
            }
            Err(e) => {
                tracing::error!(error = %e, "Fatal sync failure — stopping sync loop");
                alerts.throttled(
                    "sync_fatal",
                    "orderdesk catalog sync halted",
                    &e.to_string(),
                );
                break;
            }
        }
    }
    tracing::info!("Sync worker stopped");
}

/// Rebuild the embedding index after a catalog change and swap it in.
fn rebuild_index(graph: &ProcessingGraph) {
    match EmbeddingIndex::load_or_build(
        &graph.catalog,
        graph.embedder.as_ref(),
        &graph.embeddings_dir,
    ) {
        Ok(index) => {
            *graph.index.write().unwrap_or_else(|e| e.into_inner()) = Some(index);
            tracing::info!("Embedding index refreshed after sync");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Index rebuild failed — keeping previous index");
        }
    }
}

fn feedback_loop(graph: &ProcessingGraph, stop: &AtomicBool) {
    tracing::info!("Feedback listener started");
    let mut offset: i64 = 0;

    while !stop.load(Ordering::SeqCst) {
        match graph.gateway.long_poll_updates(offset) {
            Ok(updates) => {
                if updates.is_empty() {
                    sleep_unless(stop, Duration::from_millis(500));
                    continue;
                }
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let inbound = InboundFeedback {
                        order_id_hint: None,
                        reply_to_message_id: update.reply_to_message_id,
                        user_text: update.text,
                        operator: update.from,
                    };
                    if let Err(e) = graph.feedback.handle(&inbound) {
                        tracing::warn!(error = %e, "Feedback handling failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feedback long-poll failed");
                sleep_unless(stop, Duration::from_secs(5));
            }
        }
    }
    tracing::info!("Feedback listener stopped");
}

fn heartbeat_loop(
    counters: &Counters,
    health: &HealthFile,
    stop: &AtomicBool,
    interval: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        health.write(counters, "running");
        sleep_unless(stop, interval);
    }
}

fn sleep_unless(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(STOP_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
}
