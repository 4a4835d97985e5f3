//! In-memory mailbox for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use super::{EmailMessage, Mailbox, MailboxError};

#[derive(Default)]
pub struct MockMailbox {
    messages: Mutex<Vec<EmailMessage>>,
    read: Mutex<HashSet<String>>,
    fail_fetch: Mutex<bool>,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: EmailMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        *self.fail_fetch.lock().unwrap() = fail;
    }

    pub fn read_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read.lock().unwrap().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Simple plain-text message fixture.
    pub fn text_message(id: &str, from: &str, subject: &str, body: &str) -> EmailMessage {
        EmailMessage {
            message_id: id.to_string(),
            from: from.to_string(),
            subject: subject.to_string(),
            body_text: body.to_string(),
            body_html: None,
            attachments: Vec::new(),
            received_at: None,
        }
    }
}

impl Mailbox for MockMailbox {
    fn list_unread(&self) -> Result<Vec<String>, MailboxError> {
        let read = self.read.lock().unwrap();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !read.contains(&m.message_id))
            .map(|m| m.message_id.clone())
            .collect())
    }

    fn fetch(&self, message_id: &str) -> Result<EmailMessage, MailboxError> {
        if *self.fail_fetch.lock().unwrap() {
            return Err(MailboxError::Io(std::io::Error::other("mock fetch failure")));
        }
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(message_id.to_string()))
    }

    fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        self.read.lock().unwrap().insert(message_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_excludes_marked() {
        let mailbox = MockMailbox::new();
        mailbox.push(MockMailbox::text_message("m1", "a@b.c", "s", "body"));
        mailbox.push(MockMailbox::text_message("m2", "a@b.c", "s", "body"));

        mailbox.mark_read("m1").unwrap();
        assert_eq!(mailbox.list_unread().unwrap(), vec!["m2"]);
        assert_eq!(mailbox.read_ids(), vec!["m1"]);
    }
}
