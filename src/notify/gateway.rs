//! Operator chat gateway: send digests, long-poll replies.
//!
//! Production implementation targets the Telegram Bot API; the trait is
//! what the notifier and feedback listener consume.

use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use super::NotifyError;

/// An inbound update from the operator channel.
#[derive(Debug, Clone)]
pub struct ChatUpdate {
    pub update_id: i64,
    /// Gateway id of the operator's message.
    pub message_id: i64,
    /// Set when the operator replied to one of our messages.
    pub reply_to_message_id: Option<i64>,
    pub text: String,
    pub from: String,
}

pub trait ChatGateway: Send + Sync {
    /// Send a message, returning the gateway's message id.
    fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, NotifyError>;

    /// Long-poll for updates after `offset`.
    fn long_poll_updates(&self, offset: i64) -> Result<Vec<ChatUpdate>, NotifyError>;
}

/// Telegram Bot API gateway.
pub struct TelegramGateway {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl TelegramGateway {
    /// Long-poll window in seconds.
    const POLL_TIMEOUT_SECS: u64 = 25;

    pub fn new(bot_token: &str) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            // Request timeout must exceed the long-poll window.
            .timeout(std::time::Duration::from_secs(Self::POLL_TIMEOUT_SECS + 10))
            .build()
            .map_err(|e| NotifyError::Decode(e.to_string()))?;

        Ok(Self {
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
            client,
        })
    }

    fn call(&self, method: &str, body: &Value) -> Result<Value, NotifyError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self.client.post(&url).json(body).send().map_err(|e| {
            if e.is_connect() {
                NotifyError::Connection("api.telegram.org".into())
            } else {
                NotifyError::Decode(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = response
            .json()
            .map_err(|e| NotifyError::Decode(e.to_string()))?;
        if parsed.get("ok") != Some(&Value::Bool(true)) {
            return Err(NotifyError::Decode(format!("gateway NOK: {parsed}")));
        }
        Ok(parsed["result"].clone())
    }
}

#[derive(Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Deserialize)]
struct TgMessage {
    message_id: i64,
    text: Option<String>,
    from: Option<TgUser>,
    reply_to_message: Option<TgReply>,
}

#[derive(Deserialize)]
struct TgUser {
    username: Option<String>,
    first_name: Option<String>,
}

#[derive(Deserialize)]
struct TgReply {
    message_id: i64,
}

impl ChatGateway for TelegramGateway {
    fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, NotifyError> {
        let result = self.call(
            "sendMessage",
            &json!({ "chat_id": chat_id, "text": text }),
        )?;
        result["message_id"]
            .as_i64()
            .ok_or_else(|| NotifyError::Decode("sendMessage without message_id".into()))
    }

    fn long_poll_updates(&self, offset: i64) -> Result<Vec<ChatUpdate>, NotifyError> {
        let result = self.call(
            "getUpdates",
            &json!({ "offset": offset, "timeout": Self::POLL_TIMEOUT_SECS }),
        )?;

        let raw: Vec<TgUpdate> =
            serde_json::from_value(result).map_err(|e| NotifyError::Decode(e.to_string()))?;

        Ok(raw
            .into_iter()
            .filter_map(|u| {
                let msg = u.message?;
                Some(ChatUpdate {
                    update_id: u.update_id,
                    message_id: msg.message_id,
                    reply_to_message_id: msg.reply_to_message.map(|r| r.message_id),
                    text: msg.text?,
                    from: msg
                        .from
                        .and_then(|f| f.username.or(f.first_name))
                        .unwrap_or_default(),
                })
            })
            .collect())
    }
}

/// Gateway for installations without an operator channel: sends are
/// logged and dropped, polling yields nothing.
pub struct NullGateway;

impl ChatGateway for NullGateway {
    fn send_message(&self, _chat_id: &str, text: &str) -> Result<i64, NotifyError> {
        tracing::info!(text, "Operator digest (no chat gateway configured)");
        Ok(0)
    }

    fn long_poll_updates(&self, _offset: i64) -> Result<Vec<ChatUpdate>, NotifyError> {
        Ok(Vec::new())
    }
}

/// In-memory gateway for tests: captures sends, serves queued updates.
pub struct MockGateway {
    sent: Mutex<Vec<(String, String)>>,
    updates: Mutex<Vec<ChatUpdate>>,
    next_message_id: Mutex<i64>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            next_message_id: Mutex::new(100),
        }
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn queue_update(&self, update: ChatUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatGateway for MockGateway {
    fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        let mut next = self.next_message_id.lock().unwrap();
        *next += 1;
        Ok(*next)
    }

    fn long_poll_updates(&self, offset: i64) -> Result<Vec<ChatUpdate>, NotifyError> {
        Ok(self
            .updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.update_id >= offset)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_gateway_assigns_message_ids() {
        let gw = MockGateway::new();
        let id1 = gw.send_message("chat", "first").unwrap();
        let id2 = gw.send_message("chat", "second").unwrap();
        assert!(id2 > id1);
        assert_eq!(gw.sent_messages().len(), 2);
    }

    #[test]
    fn mock_gateway_filters_by_offset() {
        let gw = MockGateway::new();
        for id in [1, 2, 3] {
            gw.queue_update(ChatUpdate {
                update_id: id,
                message_id: id * 10,
                reply_to_message_id: None,
                text: format!("update {id}"),
                from: "op".into(),
            });
        }
        let updates = gw.long_poll_updates(2).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 2);
    }

    #[test]
    fn telegram_update_payload_decodes() {
        let raw = json!([{
            "update_id": 7,
            "message": {
                "message_id": 55,
                "text": "Company should be Schur Flexibles",
                "from": { "username": "operator1" },
                "reply_to_message": { "message_id": 101 }
            }
        }]);
        let parsed: Vec<TgUpdate> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed[0].update_id, 7);
        let msg = parsed[0].message.as_ref().unwrap();
        assert_eq!(msg.reply_to_message.as_ref().unwrap().message_id, 101);
    }
}
