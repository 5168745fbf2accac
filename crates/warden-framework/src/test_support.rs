//! Transport double shared by the unit tests.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use warden_core::{MessageRef, Transport, TransportResult};

/// Records every outbound message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Texts sent so far, oldest first.
    pub fn replies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.sent.lock().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, chat: &str, text: &str) -> TransportResult<MessageRef> {
        let mut sent = self.sent.lock();
        sent.push((chat.to_string(), text.to_string()));
        Ok(MessageRef::new(chat, sent.len().to_string()))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
