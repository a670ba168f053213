//! Typed wrapper over the notification session.

// ============================================================================
// Imports
// ============================================================================

use serde_json::json;

use crate::error::Result;
use crate::identifiers::HandlerId;
use crate::protocol::NotificationEnvelope;
use crate::session::{ConnectionSession, NOTIFICATION_EVENT};

// ============================================================================
// Wire Names
// ============================================================================

/// Remote methods on the notification hub.
pub mod methods {
    pub const MARK_AS_READ: &str = "MarkAsRead";
    pub const MARK_ALL_AS_READ: &str = "MarkAllAsRead";
}

// ============================================================================
// NotificationChannel
// ============================================================================

/// Notification operations over a [`ConnectionSession`].
///
/// Envelopes reach handlers after deduplication when the session is built
/// with [`SessionOptions::notifications`](crate::SessionOptions::notifications).
#[derive(Debug, Clone)]
pub struct NotificationChannel {
    session: ConnectionSession,
}

impl NotificationChannel {
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

    /// Marks one notification as read.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn mark_as_read(&self, notification_id: &str) -> Result<()> {
        self.session
            .send(methods::MARK_AS_READ, vec![json!(notification_id)])
            .await
            .map(drop)
    }

    /// Marks every notification as read.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSession::send`].
    pub async fn mark_all_as_read(&self) -> Result<()> {
        self.session
            .send(methods::MARK_ALL_AS_READ, Vec::new())
            .await
            .map(drop)
    }

    /// Subscribes to notifications.
    ///
    /// Notifications that arrived before the first subscription are
    /// replayed to it.
    pub fn on_notification<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(NotificationEnvelope) -> Result<()> + Send + Sync + 'static,
    {
        self.session.subscribe(NOTIFICATION_EVENT, move |payload| {
            handler(NotificationEnvelope::from_value(payload)?)
        })
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.session.unsubscribe(NOTIFICATION_EVENT, id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::sleep;
    use url::Url;

    use crate::credential::Credential;
    use crate::identifiers::SessionName;
    use crate::session::SessionOptions;
    use crate::transport::ChannelFactory;
    use crate::transport::mock::MockConnector;

    async fn connected(connector: &Arc<MockConnector>) -> NotificationChannel {
        let factory: Arc<dyn ChannelFactory> = Arc::clone(connector) as Arc<dyn ChannelFactory>;
        let session = ConnectionSession::new(
            SessionName::notifications(),
            Url::parse("ws://test/hubs/notifications").expect("url"),
            factory,
            SessionOptions::notifications(),
        )
        .expect("session");
        session.set_credential(Some(Credential::new("token")));
        session.connect().await.expect("connect");
        NotificationChannel::new(session)
    }

    fn notification(id: &str, message: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "comment",
            "payload": {"recipientId": "u-1", "message": message, "postId": "p-4"}
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_notifications_replayed_and_deduplicated() {
        let connector = MockConnector::new();
        let notifications = connected(&connector).await;

        let channel = connector.last_channel().expect("channel");
        channel.emit(NOTIFICATION_EVENT, notification("n-1", "Bo commented"));
        channel.emit(NOTIFICATION_EVENT, notification("n-1", "Bo commented"));
        channel.emit(NOTIFICATION_EVENT, notification("n-2", "Cy commented"));
        sleep(Duration::from_millis(10)).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        notifications.on_notification(move |envelope| {
            sink.lock().push(envelope.id);
            Ok(())
        });

        assert_eq!(*received.lock(), vec!["n-1".to_string(), "n-2".to_string()]);
        notifications.session().disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_as_read_methods() {
        let connector = MockConnector::new();
        let notifications = connected(&connector).await;

        notifications.mark_as_read("n-9").await.expect("mark");
        notifications.mark_all_as_read().await.expect("mark all");

        let called: Vec<String> = connector
            .last_channel()
            .expect("channel")
            .calls_except("Ping")
            .into_iter()
            .map(|(method, _)| method)
            .collect();
        assert_eq!(called, vec![methods::MARK_AS_READ, methods::MARK_ALL_AS_READ]);

        notifications.session().disconnect().await;
    }
}
