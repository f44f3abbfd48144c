//! Outbound notification seam for task progress broadcasts.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Result, VsphereError};

/// A message broadcast to one subscriber group.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Subscriber group, conventionally the machine id as a string
    pub group: String,
    /// Event name
    pub event: String,
    pub payload: Value,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn broadcast(&self, group: &str, event: &str, payload: Value) -> Result<()>;
}

/// Notifier that only logs; used when no push channel is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn broadcast(&self, group: &str, event: &str, payload: Value) -> Result<()> {
        info!(group = %group, event = %event, payload = %payload, "Broadcast");
        Ok(())
    }
}

/// Notifier forwarding messages into an mpsc channel for a push layer
/// (or a test) to consume.
pub struct ChannelNotifier {
    tx: mpsc::Sender<BroadcastMessage>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<BroadcastMessage>) -> Self {
        Self { tx }
    }

    /// Build a notifier together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn broadcast(&self, group: &str, event: &str, payload: Value) -> Result<()> {
        self.tx
            .send(BroadcastMessage {
                group: group.to_string(),
                event: event.to_string(),
                payload,
            })
            .await
            .map_err(|e| VsphereError::Notify(format!("Broadcast channel closed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::channel(4);
        notifier
            .broadcast("vm-group", "Progress", json!({"progress": 50}))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.group, "vm-group");
        assert_eq!(msg.event, "Progress");
        assert_eq!(msg.payload["progress"], 50);
    }

    #[tokio::test]
    async fn test_closed_channel_errors() {
        let (notifier, rx) = ChannelNotifier::channel(1);
        drop(rx);
        assert!(notifier
            .broadcast("vm-group", "Progress", json!({}))
            .await
            .is_err());
    }
}
