//! Operator alert mail: a narrow `send(to, subject, body)` used by the
//! supervisor only. Production pipes through the local `sendmail`; the
//! log-only fallback keeps alerting observable on hosts without an MTA.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

pub trait AlertMailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str);
}

/// Pipe the alert through `/usr/sbin/sendmail -t`.
pub struct SendmailAlerts {
    sendmail: String,
}

impl SendmailAlerts {
    pub fn new() -> Self {
        Self {
            sendmail: "/usr/sbin/sendmail".to_string(),
        }
    }
}

impl Default for SendmailAlerts {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertMailer for SendmailAlerts {
    fn send(&self, to: &str, subject: &str, body: &str) {
        let message = format!("To: {to}\nSubject: {subject}\n\n{body}\n");

        let spawned = Command::new(&self.sendmail)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                let write_ok = child
                    .stdin
                    .take()
                    .and_then(|mut stdin| stdin.write_all(message.as_bytes()).ok())
                    .is_some();
                let status = child.wait();
                if !write_ok || !status.map(|s| s.success()).unwrap_or(false) {
                    tracing::error!(to, subject, "sendmail rejected the alert");
                } else {
                    tracing::info!(to, subject, "Alert mail sent");
                }
            }
            Err(e) => {
                tracing::error!(to, subject, error = %e, "sendmail not available — alert dropped");
            }
        }
    }
}

/// Alert sink that only logs. Used when no admin address is configured.
pub struct LogOnlyAlerts;

impl AlertMailer for LogOnlyAlerts {
    fn send(&self, to: &str, subject: &str, body: &str) {
        tracing::warn!(to, subject, body, "ALERT (log-only)");
    }
}

/// Capturing mock for tests.
#[derive(Default)]
pub struct MockAlerts {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl MockAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl AlertMailer for MockAlerts {
    fn send(&self, to: &str, subject: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
    }
}
