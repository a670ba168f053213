//! Typed wrapper over the chat session.
//!
//! # Example
//!
//! ```ignore
//! let chat = orchestrator.chat().expect("chat configured");
//!
//! chat.on_message(|message| {
//!     println!("{}: {}", message.sender_id, message.content);
//!     Ok(())
//! });
//! chat.join_group("g-7").await?;
//! chat.send_group_message("g-7", "hello").await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;
use crate::identifiers::HandlerId;
use crate::session::ConnectionSession;

// ============================================================================
// Wire Names
// ============================================================================

/// Remote methods on the chat hub.
pub mod methods {
    pub const SEND_PRIVATE_MESSAGE: &str = "SendPrivateMessage";
    pub const SEND_GROUP_MESSAGE: &str = "SendGroupMessage";
    pub const JOIN_GROUP: &str = "JoinGroup";
    pub const LEAVE_GROUP: &str = "LeaveGroup";
    pub const REACT_TO_MESSAGE: &str = "ReactToMessage";
    pub const MARK_CONVERSATION_READ: &str = "MarkConversationAsRead";
    pub const SEND_TYPING: &str = "SendTypingIndicator";
}

/// Events pushed by the chat hub.
pub mod events {
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    pub const RECEIVE_REACTION: &str = "ReceiveReaction";
}

// ============================================================================
// Payloads
// ============================================================================

/// A chat message pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message ID.
    pub id: String,
    /// Author.
    pub sender_id: String,
    /// Recipient of a private message.
    #[serde(default)]
    pub recipient_id: Option<String>,
    /// Group of a group message.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Text.
    pub content: String,
    /// Server timestamp (RFC 3339).
    #[serde(default)]
    pub sent_at: String,
}

/// A reaction added to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Message reacted to.
    pub message_id: String,
    /// Reacting user.
    pub user_id: String,
    /// Reaction emoji.
    pub emoji: String,
}

// ============================================================================
// ChatChannel
// ============================================================================

/// Chat operations over a [`ConnectionSession`].
///
/// Every call inherits the session's queuing and retry behavior.
#[derive(Debug, Clone)]
pub struct ChatChannel {
    session: ConnectionSession,
}

impl ChatChannel {
    /// Wraps `session`.
    #[inline]
    #[must_use]
    pub fn new(session: ConnectionSession) -> Self {
        Self { session }
    }

    /// Returns the underlying session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Sends a private message.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn send_private_message(&self, recipient_id: &str, content: &str) -> Result<Value> {
        self.session
            .send(methods::SEND_PRIVATE_MESSAGE, vec![json!(recipient_id), json!(content)])
            .await
    }

    /// Sends a message to a group.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn send_group_message(&self, group_id: &str, content: &str) -> Result<Value> {
        self.session
            .send(methods::SEND_GROUP_MESSAGE, vec![json!(group_id), json!(content)])
            .await
    }

    /// Joins a group's broadcast.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn join_group(&self, group_id: &str) -> Result<()> {
        self.session
            .send(methods::JOIN_GROUP, vec![json!(group_id)])
            .await
            .map(drop)
    }

    /// Leaves a group's broadcast.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn leave_group(&self, group_id: &str) -> Result<()> {
        self.session
            .send(methods::LEAVE_GROUP, vec![json!(group_id)])
            .await
            .map(drop)
    }

    /// Reacts to a message.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn react_to_message(&self, message_id: &str, emoji: &str) -> Result<()> {
        self.session
            .send(methods::REACT_TO_MESSAGE, vec![json!(message_id), json!(emoji)])
            .await
            .map(drop)
    }

    /// Marks a conversation as read.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        self.session
            .send(methods::MARK_CONVERSATION_READ, vec![json!(conversation_id)])
            .await
            .map(drop)
    }

    /// Starts or stops the typing indicator.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn send_typing(&self, conversation_id: &str, typing: bool) -> Result<()> {
        self.session
            .send(methods::SEND_TYPING, vec![json!(conversation_id), json!(typing)])
            .await
            .map(drop)
    }

    /// Subscribes to inbound messages.
    ///
    /// A payload that does not decode counts as a handler error.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ChatMessage) -> Result<()> + Send + Sync + 'static,
    {
        self.session.subscribe(events::RECEIVE_MESSAGE, move |payload| {
            handler(ChatMessage::deserialize(payload)?)
        })
    }

    /// Subscribes to reactions.
    pub fn on_reaction<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(Reaction) -> Result<()> + Send + Sync + 'static,
    {
        self.session.subscribe(events::RECEIVE_REACTION, move |payload| {
            handler(Reaction::deserialize(payload)?)
        })
    }

    /// Removes a subscription made through this channel.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.session.unsubscribe(events::RECEIVE_MESSAGE, id)
            || self.session.unsubscribe(events::RECEIVE_REACTION, id)
    }
}

// ============================================================================
// Tests
// ============================================================================
