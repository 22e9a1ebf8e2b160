//! Protocol message definitions
//!
//! Defines the JSON messages exchanged with browser clients: control messages
//! sent by the client to manage room membership, and the notifications the
//! hub pushes to every member of a room.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub::Payload;

/// Maximum accepted length of a group id, in bytes
pub const MAX_GROUP_ID_LENGTH: usize = 256;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Client Messages
// ============================================================================

/// Control messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to notifications for a voting group
    JoinGroup {
        /// Room identifier
        group_id: String,
    },

    /// Unsubscribe from a voting group
    LeaveGroup {
        /// Room identifier
        group_id: String,
    },

    /// Any other `type`; accepted and ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse and validate a control message from a raw frame
    pub fn from_slice(raw: &[u8]) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_slice(raw)?;
        message.validate()?;
        Ok(message)
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::JoinGroup { group_id } | ClientMessage::LeaveGroup { group_id } => {
                if group_id.is_empty() {
                    return Err(ProtocolError::ValidationError(
                        "group_id cannot be empty".to_string(),
                    ));
                }
                if group_id.len() > MAX_GROUP_ID_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "group_id exceeds maximum length of {} bytes",
                        MAX_GROUP_ID_LENGTH
                    )));
                }
                Ok(())
            }
            ClientMessage::Unknown => Ok(()),
        }
    }

    /// Create a JoinGroup message
    pub fn join_group(group_id: impl Into<String>) -> Self {
        ClientMessage::JoinGroup {
            group_id: group_id.into(),
        }
    }

    /// Create a LeaveGroup message
    pub fn leave_group(group_id: impl Into<String>) -> Self {
        ClientMessage::LeaveGroup {
            group_id: group_id.into(),
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// What kind of state change a notification announces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PollUpdate,
    VoteUpdate,
    CommentUpdate,
}

/// Sub-type carried by poll and comment updates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Created,
    Deleted,
}

/// Body of a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationData {
    /// Room the notification is delivered to
    pub group_id: String,
    /// Affected poll
    pub poll_id: String,
    /// Present for poll and comment updates only
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateType>,
}

/// Notification pushed from server to every member of a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: NotificationData,
}

impl Notification {
    /// A poll was created or deleted in a group
    pub fn poll_update(
        group_id: impl Into<String>,
        poll_id: impl Into<String>,
        update: UpdateType,
    ) -> Self {
        Self::new(NotificationKind::PollUpdate, group_id, poll_id, Some(update))
    }

    /// A vote was cast on a poll
    pub fn vote_update(group_id: impl Into<String>, poll_id: impl Into<String>) -> Self {
        Self::new(NotificationKind::VoteUpdate, group_id, poll_id, None)
    }

    /// A comment was posted on or removed from a poll
    pub fn comment_update(
        group_id: impl Into<String>,
        poll_id: impl Into<String>,
        update: UpdateType,
    ) -> Self {
        Self::new(NotificationKind::CommentUpdate, group_id, poll_id, Some(update))
    }

    fn new(
        kind: NotificationKind,
        group_id: impl Into<String>,
        poll_id: impl Into<String>,
        update: Option<UpdateType>,
    ) -> Self {
        Self {
            kind,
            data: NotificationData {
                group_id: group_id.into(),
                poll_id: poll_id.into(),
                update,
            },
        }
    }

    /// Target room
    pub fn room(&self) -> &str {
        &self.data.group_id
    }

    /// Serialize once into the payload shared by every recipient
    pub fn to_payload(&self) -> ProtocolResult<Payload> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    // -------------------------------------------------------------------------
    // Client Message Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_join_group_parsing() {
        let msg = ClientMessage::from_slice(br#"{"type":"join_group","group_id":"g1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::join_group("g1"));
    }

    #[test]
    fn test_leave_group_parsing() {
        let msg = ClientMessage::from_slice(br#"{"type":"leave_group","group_id":"g1"}"#).unwrap();
        assert_eq!(msg, ClientMessage::leave_group("g1"));
    }

    #[test]
    fn test_unknown_type_is_accepted() {
        let msg = ClientMessage::from_slice(br#"{"type":"subscribe","topic":"x"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let msg =
            ClientMessage::from_slice(br#"{"type":"join_group","group_id":"g1","token":"t"}"#)
                .unwrap();
        assert_eq!(msg, ClientMessage::join_group("g1"));
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"group_id":"g1"}"#,
            br#"{"type":"join_group"}"#,
            br#"{"type":"leave_group","group_id":42}"#,
            br#"{"type":"join_group","group_id":null}"#,
        ];
        for raw in cases {
            assert!(
                matches!(
                    ClientMessage::from_slice(raw),
                    Err(ProtocolError::SerializationError(_))
                ),
                "expected decode failure for {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_group_id_validation() {
        let result = ClientMessage::from_slice(br#"{"type":"join_group","group_id":""}"#);
        assert!(matches!(result, Err(ProtocolError::ValidationError(_))));

        let long = ClientMessage::join_group("g".repeat(MAX_GROUP_ID_LENGTH + 1));
        assert!(matches!(long.validate(), Err(ProtocolError::ValidationError(_))));

        let max = ClientMessage::join_group("g".repeat(MAX_GROUP_ID_LENGTH));
        assert!(max.validate().is_ok());
    }

    // -------------------------------------------------------------------------
    // Notification Tests
    // -------------------------------------------------------------------------

    fn as_value(notification: &Notification) -> Value {
        let payload = notification.to_payload().unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[test]
    fn test_vote_update_wire_format() {
        let value = as_value(&Notification::vote_update("g1", "p1"));
        assert_eq!(
            value,
            json!({"type": "vote_update", "data": {"group_id": "g1", "poll_id": "p1"}})
        );
    }

    #[test]
    fn test_poll_update_wire_format() {
        let value = as_value(&Notification::poll_update("g1", "p1", UpdateType::Created));
        assert_eq!(
            value,
            json!({"type": "poll_update", "data": {"group_id": "g1", "poll_id": "p1", "type": "created"}})
        );
    }

    #[test]
    fn test_comment_update_wire_format() {
        let notification = Notification::comment_update("g1", "p1", UpdateType::Deleted);
        assert_eq!(notification.room(), "g1");
        let value = as_value(&notification);
        assert_eq!(value["type"], "comment_update");
        assert_eq!(value["data"]["type"], "deleted");
    }
}
