//! Push frames and broadcasting to WebSocket subscribers.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error};

use parley_core::types::SummarySnapshot;

/// Server-to-client frames on `/issueSummary`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    IssueSummary {
        text: String,
        timestamp: i64,
        version: u64,
    },
    Heartbeat {
        timestamp: i64,
    },
}

impl From<&SummarySnapshot> for PushFrame {
    fn from(snapshot: &SummarySnapshot) -> Self {
        PushFrame::IssueSummary {
            text: snapshot.text.clone(),
            timestamp: snapshot.timestamp_ms,
            version: snapshot.version,
        }
    }
}

/// Message queued for a connection's send task.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    /// Close with "going away".
    Close,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub event_tx: mpsc::UnboundedSender<Outbound>,
}

/// Latest summary snapshot plus the set of live subscribers.
#[derive(Default)]
pub struct SummaryHub {
    snapshot: RwLock<Option<SummarySnapshot>>,
    connections: RwLock<HashMap<String, ConnectionState>>,
}

fn encode(frame: &PushFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(%e, "Failed to serialize push frame");
            None
        }
    }
}

impl SummaryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Option<SummarySnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Add a subscriber. The latest snapshot, if any, is queued to it before
    /// it can receive any later update.
    pub async fn register(&self, conn_id: &str, event_tx: mpsc::UnboundedSender<Outbound>) {
        let snapshot = self.snapshot.read().await;
        let mut connections = self.connections.write().await;
        if let Some(text) = snapshot.as_ref().and_then(|s| encode(&PushFrame::from(s))) {
            let _ = event_tx.send(Outbound::Text(text));
        }
        connections.insert(
            conn_id.to_string(),
            ConnectionState {
                conn_id: conn_id.to_string(),
                event_tx,
            },
        );
    }

    pub async fn unregister(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Store a new snapshot with the next version and push it to everyone.
    pub async fn publish(&self, text: String) -> SummarySnapshot {
        let snapshot = {
            let mut current = self.snapshot.write().await;
            let version = current.as_ref().map_or(0, |s| s.version) + 1;
            let snapshot = SummarySnapshot {
                text,
                timestamp_ms: Utc::now().timestamp_millis(),
                version,
            };
            *current = Some(snapshot.clone());
            snapshot
        };
        self.broadcast(&PushFrame::from(&snapshot)).await;
        snapshot
    }

    /// Push a heartbeat if anyone is listening.
    pub async fn heartbeat(&self) {
        if self.connection_count().await == 0 {
            return;
        }
        self.broadcast(&PushFrame::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        })
        .await;
    }

    /// Send a frame to every subscriber. Subscribers whose queue is gone are
    /// dropped; the others are unaffected.
    pub async fn broadcast(&self, frame: &PushFrame) -> usize {
        let Some(text) = encode(frame) else {
            return 0;
        };

        let mut dead = Vec::new();
        let mut sent = 0;
        {
            let connections = self.connections.read().await;
            for conn in connections.values() {
                if conn.event_tx.send(Outbound::Text(text.clone())).is_ok() {
                    sent += 1;
                } else {
                    dead.push(conn.conn_id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            for conn_id in &dead {
                connections.remove(conn_id);
                debug!(conn_id = %conn_id, "Dropped dead subscriber");
            }
        }
        debug!(sent, dropped = dead.len(), "Broadcast push frame");
        sent
    }

    /// Ask every subscriber to close and forget them all.
    pub async fn close_all(&self) {
        let mut connections = self.connections.write().await;
        for conn in connections.values() {
            let _ = conn.event_tx.send(Outbound::Close);
        }
        connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscriber() -> (
        mpsc::UnboundedSender<Outbound>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        mpsc::unbounded_channel()
    }

    fn text(out: Outbound) -> serde_json::Value {
        match out {
            Outbound::Text(t) => serde_json::from_str(&t).unwrap(),
            Outbound::Close => panic!("expected text frame"),
        }
    }

    #[test]
    fn test_frame_shapes() {
        let frame = PushFrame::IssueSummary {
            text: "hi".into(),
            timestamp: 5,
            version: 2,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "issue_summary", "text": "hi", "timestamp": 5, "version": 2})
        );
        assert_eq!(
            serde_json::to_value(PushFrame::Heartbeat { timestamp: 7 }).unwrap(),
            json!({"type": "heartbeat", "timestamp": 7})
        );
    }

    #[tokio::test]
    async fn test_publish_bumps_version_and_reaches_subscribers() {
        let hub = SummaryHub::new();
        let (tx, mut rx) = subscriber();
        hub.register("a", tx).await;
        assert!(rx.try_recv().is_err());

        let first = hub.publish("one".into()).await;
        let second = hub.publish("two".into()).await;
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        assert_eq!(text(rx.recv().await.unwrap())["text"], "one");
        let frame = text(rx.recv().await.unwrap());
        assert_eq!(frame["text"], "two");
        assert_eq!(frame["version"], 2);
    }

    #[tokio::test]
    async fn test_register_receives_latest_snapshot() {
        let hub = SummaryHub::new();
        hub.publish("old".into()).await;
        hub.publish("latest".into()).await;

        let (tx, mut rx) = subscriber();
        hub.register("late", tx).await;
        let frame = text(rx.recv().await.unwrap());
        assert_eq!(frame["type"], "issue_summary");
        assert_eq!(frame["text"], "latest");
        assert_eq!(frame["version"], 2);
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_dropped_others_unaffected() {
        let hub = SummaryHub::new();
        let (alive_tx, mut alive_rx) = subscriber();
        let (dead_tx, dead_rx) = subscriber();
        hub.register("alive", alive_tx).await;
        hub.register("dead", dead_tx).await;
        drop(dead_rx);

        let sent = hub.broadcast(&PushFrame::Heartbeat { timestamp: 1 }).await;
        assert_eq!(sent, 1);
        assert_eq!(hub.connection_count().await, 1);
        assert_eq!(text(alive_rx.recv().await.unwrap())["type"], "heartbeat");
    }

    #[tokio::test]
    async fn test_heartbeat_only_with_subscribers() {
        let hub = SummaryHub::new();
        hub.heartbeat().await;

        let (tx, mut rx) = subscriber();
        hub.register("a", tx).await;
        hub.heartbeat().await;
        assert_eq!(text(rx.recv().await.unwrap())["type"], "heartbeat");
    }

    #[tokio::test]
    async fn test_close_all() {
        let hub = SummaryHub::new();
        let (tx, mut rx) = subscriber();
        hub.register("a", tx).await;
        hub.close_all().await;
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
        assert_eq!(hub.connection_count().await, 0);
    }
}
