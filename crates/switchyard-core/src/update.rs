//! Inbound update model.
//!
//! An [`Update`] is the single unit of work delivered by the transport layer.
//! It carries exactly one [`UpdateKind`]: either a [`Message`] or a
//! [`CallbackQuery`] produced by an inline button press.
//!
//! The serde representation follows the messaging platform's JSON shape, so a
//! transport can deserialize raw payloads straight into these types:
//!
//! ```text
//! { "update_id": 10, "message":        { "message_id": 1, "chat": {...}, "text": "/start" } }
//! { "update_id": 11, "callback_query": { "id": "q1", "from": {...}, "data": "page:2" } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Users and chats
// ============================================================================

/// Platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Returns the raw numeric id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The originator of a message or callback interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    /// Creates a minimal non-bot user.
    pub fn new(id: impl Into<UserId>, first_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_bot: false,
            first_name: first_name.into(),
            username: None,
        }
    }
}

/// The chat a message was posted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default = "default_chat_type")]
    pub chat_type: String,
}

fn default_chat_type() -> String {
    "private".to_string()
}

impl Chat {
    /// Creates a private chat with the given id.
    pub fn private(id: i64) -> Self {
        Self {
            id,
            chat_type: default_chat_type(),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// A message posted to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl Message {
    /// Creates a text message sent by `from` in their private chat.
    pub fn text(message_id: i64, from: User, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat: Chat::private(from.id.get()),
            from: Some(from),
            text: Some(text.into()),
            caption: None,
        }
    }
}

/// A callback interaction produced by pressing an inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl CallbackQuery {
    /// Creates a callback interaction carrying `data`.
    pub fn new(id: impl Into<String>, from: User, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from,
            data: Some(data.into()),
            message: None,
        }
    }
}

// ============================================================================
// Update
// ============================================================================

/// The payload variants an [`Update`] can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Message(Message),
    CallbackQuery(CallbackQuery),
}

/// A single inbound event from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl Update {
    /// Wraps a message into an update.
    pub fn message(update_id: i64, message: Message) -> Self {
        Self {
            update_id,
            kind: UpdateKind::Message(message),
        }
    }

    /// Wraps a callback interaction into an update.
    pub fn callback_query(update_id: i64, query: CallbackQuery) -> Self {
        Self {
            update_id,
            kind: UpdateKind::CallbackQuery(query),
        }
    }

    /// Returns the message payload, if this is a message update.
    pub fn as_message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m) => Some(m),
            UpdateKind::CallbackQuery(_) => None,
        }
    }

    /// Returns the callback payload, if this is a callback update.
    pub fn as_callback_query(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => Some(q),
            UpdateKind::Message(_) => None,
        }
    }

    /// Text of a message update. `None` for callbacks and text-less messages.
    pub fn text(&self) -> Option<&str> {
        self.as_message().and_then(|m| m.text.as_deref())
    }

    /// Data of a callback update. `None` for messages and data-less callbacks.
    pub fn callback_data(&self) -> Option<&str> {
        self.as_callback_query().and_then(|q| q.data.as_deref())
    }

    /// The user that originated this update.
    ///
    /// For messages this is the sender (channel posts have none); for
    /// callbacks it is the user who pressed the button.
    pub fn user_id(&self) -> Option<UserId> {
        match &self.kind {
            UpdateKind::Message(m) => m.from.as_ref().map(|u| u.id),
            UpdateKind::CallbackQuery(q) => Some(q.from.id),
        }
    }

    /// Short name of the payload kind, used in log fields.
    pub fn event_name(&self) -> &'static str {
        match &self.kind {
            UpdateKind::Message(_) => "message",
            UpdateKind::CallbackQuery(_) => "callback_query",
        }
    }
}
