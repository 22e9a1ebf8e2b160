//! Event producer interface
//!
//! The CRUD layer holds a [`Notifier`] and calls it after committing a state
//! change. Each call serializes one notification and hands it to the
//! registry's fan-out; delivery failures are never reported back.

use std::sync::Arc;

use tracing::{debug, error};

use super::Registry;
use crate::server::{Notification, UpdateType};

/// Cheap, clonable handle for publishing notifications to rooms
#[derive(Debug, Clone)]
pub struct Notifier {
    registry: Arc<Registry>,
}

impl Notifier {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Fan a notification out to every connection in its room
    pub async fn publish(&self, notification: &Notification) {
        let payload = match notification.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {:?} notification: {}", notification.kind, e);
                return;
            }
        };

        debug!(
            "Publishing {:?} for poll {} to room {}",
            notification.kind,
            notification.data.poll_id,
            notification.room()
        );
        self.registry
            .broadcast_to_room(notification.room(), payload)
            .await;
    }

    /// A poll was created in or deleted from a group
    pub async fn poll_update(&self, group_id: &str, poll_id: &str, update: UpdateType) {
        self.publish(&Notification::poll_update(group_id, poll_id, update))
            .await;
    }

    /// A vote was cast on a poll
    pub async fn vote_update(&self, group_id: &str, poll_id: &str) {
        self.publish(&Notification::vote_update(group_id, poll_id))
            .await;
    }

    /// A comment was posted on or deleted from a poll
    pub async fn comment_update(&self, group_id: &str, poll_id: &str, update: UpdateType) {
        self.publish(&Notification::comment_update(group_id, poll_id, update))
            .await;
    }
}
