//! Inbound chat events.
//!
//! A [`ChatEvent`] is the transport-neutral view of one inbound message. The
//! transport collaborator is responsible for filling it in (sender identity,
//! group membership flags, mentions, the quoted message), so everything
//! downstream of the transport works on plain data.
//!
//! ```rust,ignore
//! use warden_core::ChatEvent;
//!
//! let event = ChatEvent::new("628123@s.whatsapp.net", "12036@g.us", "!kick @bob")
//!     .in_group(true)
//!     .with_admin(true)
//!     .with_mentions(["628999@s.whatsapp.net"]);
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// Media classification
// ============================================================================

/// Kind of media attached to a message, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
    Document,
}

// ============================================================================
// Quoted message reference
// ============================================================================

/// Reference to the message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedMessage {
    /// Transport-specific id of the quoted message.
    pub id: String,
    /// Sender of the quoted message, when the transport knows it.
    #[serde(default)]
    pub sender: Option<String>,
    /// Text of the quoted message, if it had any.
    #[serde(default)]
    pub text: Option<String>,
    /// Media attached to the quoted message.
    #[serde(default)]
    pub media: Option<MediaKind>,
}

impl QuotedMessage {
    /// Creates a quoted reference with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender: None,
            text: None,
            media: None,
        }
    }

    /// Sets the quoted sender.
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

// ============================================================================
// ChatEvent
// ============================================================================

/// One inbound chat message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Transport-specific id of this message.
    #[serde(default)]
    pub message_id: String,
    /// Id of the user that sent the message.
    pub sender: String,
    /// Display name of the sender.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Id of the chat (private chat or group) the message arrived in.
    pub chat: String,
    /// Raw text of the message (or the caption of a media message).
    #[serde(default)]
    pub text: String,
    /// Media attached to this message.
    #[serde(default)]
    pub media: Option<MediaKind>,
    /// Users mentioned in the message.
    #[serde(default)]
    pub mentions: Vec<String>,
    /// The message this one replies to.
    #[serde(default)]
    pub quoted: Option<QuotedMessage>,
    /// Whether the chat is a group.
    #[serde(default)]
    pub is_group: bool,
    /// Whether the sender is an admin of the group.
    #[serde(default)]
    pub is_admin: bool,
    /// Whether the bot itself is an admin of the group.
    #[serde(default)]
    pub is_bot_admin: bool,
}

impl ChatEvent {
    /// Creates a plain text event in a private chat.
    pub fn new(
        sender: impl Into<String>,
        chat: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: String::new(),
            sender: sender.into(),
            sender_name: None,
            chat: chat.into(),
            text: text.into(),
            media: None,
            mentions: Vec::new(),
            quoted: None,
            is_group: false,
            is_admin: false,
            is_bot_admin: false,
        }
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    /// Sets the sender display name.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Marks the event as coming from a group chat.
    pub fn in_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    /// Sets whether the sender is a group admin.
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Sets whether the bot is a group admin.
    pub fn with_bot_admin(mut self, is_bot_admin: bool) -> Self {
        self.is_bot_admin = is_bot_admin;
        self
    }

    /// Sets the mention list.
    pub fn with_mentions<I, S>(mut self, mentions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentions = mentions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the quoted message.
    pub fn with_quoted(mut self, quoted: QuotedMessage) -> Self {
        self.quoted = Some(quoted);
        self
    }

    /// Attaches media to the event.
    pub fn with_media(mut self, media: MediaKind) -> Self {
        self.media = Some(media);
        self
    }

    /// Returns `true` if the message replies to another message.
    pub fn is_quoted(&self) -> bool {
        self.quoted.is_some()
    }

    /// Returns `true` if this message, or the message it quotes, carries media.
    pub fn has_media(&self) -> bool {
        self.media.is_some() || self.quoted.as_ref().is_some_and(|q| q.media.is_some())
    }

    /// Returns the local part of the sender id (everything before `@`).
    pub fn sender_local_part(&self) -> &str {
        self.sender
            .split_once('@')
            .map_or(self.sender.as_str(), |(local, _)| local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_local_part() {
        let event = ChatEvent::new("628123@s.whatsapp.net", "chat", "hi");
        assert_eq!(event.sender_local_part(), "628123");

        let bare = ChatEvent::new("alice", "chat", "hi");
        assert_eq!(bare.sender_local_part(), "alice");
    }

    #[test]
    fn test_has_media_through_quote() {
        let mut quoted = QuotedMessage::new("q1");
        quoted.media = Some(MediaKind::Image);
        let event = ChatEvent::new("u", "c", "!s").with_quoted(quoted);
        assert!(event.is_quoted());
        assert!(event.has_media());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let event: ChatEvent =
            serde_json::from_str(r#"{"sender":"u1","chat":"c1","text":"!ping"}"#).unwrap();
        assert_eq!(event.text, "!ping");
        assert!(!event.is_group);
        assert!(event.mentions.is_empty());
    }
}
