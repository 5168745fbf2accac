//! Transport collaborator trait.
//!
//! The transport owns the network session: it delivers inbound
//! [`ChatEvent`]s and exposes the outbound capabilities (send, reply, edit,
//! react) that guards, the argument validator and handler bodies use to
//! produce user-visible feedback. Delivery, encryption and retries are the
//! transport's own business.
//!
//! # API Design
//!
//! - `send_text`: the one required outbound primitive
//! - `reply`: defaults to `send_text` into the event's chat
//! - `edit` / `react`: optional, default to [`TransportError::Unsupported`]
//! - `call_api`: raw escape hatch for protocol-specific actions
//!
//! Concrete transports may expose richer typed APIs; handler bodies reach them
//! through [`downcast_transport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::error::{TransportError, TransportResult};
use crate::event::ChatEvent;

/// Handle to a message sent through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the message lives in.
    pub chat: String,
    /// Transport-specific message id.
    pub id: String,
}

impl MessageRef {
    /// Creates a new message handle.
    pub fn new(chat: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            id: id.into(),
        }
    }
}

/// The outbound side of a chat session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the transport's identifier (typically the bot account id).
    fn id(&self) -> &str;

    /// Sends a text message into `chat`.
    async fn send_text(&self, chat: &str, text: &str) -> TransportResult<MessageRef>;

    /// Replies to `event` in the chat it arrived in.
    async fn reply(&self, event: &ChatEvent, text: &str) -> TransportResult<MessageRef> {
        self.send_text(&event.chat, text).await
    }

    /// Replaces the text of a previously sent message.
    async fn edit(&self, _message: &MessageRef, _text: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported { operation: "edit" })
    }

    /// Reacts to `event` with an emoji.
    async fn react(&self, _event: &ChatEvent, _emoji: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported { operation: "react" })
    }

    /// Calls a raw protocol action with JSON parameters.
    async fn call_api(&self, _action: &str, _params: Value) -> TransportResult<Value> {
        Err(TransportError::Unsupported {
            operation: "call_api",
        })
    }

    /// Returns self as an `Arc<dyn Any>` for safe downcasting.
    ///
    /// Implementors should simply return `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A shared Transport trait object.
pub type BoxedTransport = Arc<dyn Transport>;

/// Attempts to downcast a [`BoxedTransport`] to a concrete transport type.
///
/// ```rust,ignore
/// if let Some(wa) = downcast_transport::<WaTransport>(invocation.transport.clone()) {
///     wa.send_sticker(&event.chat, bytes).await?;
/// }
/// ```
pub fn downcast_transport<T: Transport + 'static>(transport: BoxedTransport) -> Option<Arc<T>> {
    transport.as_any().downcast::<T>().ok()
}
