use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use backup_engine::{BackupEvent, EventSink};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;
const MAX_QUEUE_PER_KIND: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    pub id: Uuid,
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: BackupEvent,
}

/// Fans engine events out to WebSocket clients and keeps the most recent
/// ones per event kind for replay.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
    queue: Arc<DashMap<&'static str, VecDeque<QueuedEvent>>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            queue: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Queued events newer than `since` (ms), oldest first, optionally of one kind.
    pub fn queued_since(&self, kind: Option<&str>, since: i64) -> Vec<QueuedEvent> {
        let mut events: Vec<QueuedEvent> = self
            .queue
            .iter()
            .filter(|entry| kind.map_or(true, |k| *entry.key() == k))
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|e| e.timestamp > since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }
}

impl EventSink for EventBroadcaster {
    fn emit(&self, event: BackupEvent) {
        let kind = event.kind();
        let queued = QueuedEvent {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            event,
        };
        let msg = match serde_json::to_string(&queued) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(event = kind, "Failed to serialize event: {}", e);
                return;
            }
        };

        {
            let mut entry = self.queue.entry(kind).or_default();
            entry.push_back(queued);
            if entry.len() > MAX_QUEUE_PER_KIND {
                entry.pop_front();
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(msg);
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();
    let (replay_tx, mut replay_rx) = mpsc::unbounded_channel::<String>();

    // Forward broadcasts and replies to this client
    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = replay_rx.recv() => msg,
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages from client (replay:request)
    let events = state.events.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
            if parsed.get("type").and_then(|t| t.as_str()) != Some("replay:request") {
                continue;
            }
            let payload = parsed.get("payload");
            let kind = payload.and_then(|p| p.get("kind")).and_then(|v| v.as_str());
            let since = payload.and_then(|p| p.get("since")).and_then(|v| v.as_i64()).unwrap_or(0);

            for queued in events.queued_since(kind, since) {
                if let Ok(msg) = serde_json::to_string(&queued) {
                    if replay_tx.send(msg).is_err() {
                        return;
                    }
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::events::DeletedArchive;

    fn deleted(name: &str) -> BackupEvent {
        BackupEvent::ArchiveDeleted(DeletedArchive { name: name.into() })
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.emit(deleted("backup-a.json.gz"));

        let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "archive.deleted");
        assert_eq!(msg["payload"]["name"], "backup-a.json.gz");
        assert!(msg["id"].is_string());
    }

    #[test]
    fn test_emit_without_subscribers_is_queued() {
        let broadcaster = EventBroadcaster::new();
        for i in 0..(MAX_QUEUE_PER_KIND + 5) {
            broadcaster.emit(deleted(&format!("backup-{i}.json.gz")));
        }

        let queued = broadcaster.queued_since(Some("archive.deleted"), 0);
        assert_eq!(queued.len(), MAX_QUEUE_PER_KIND);
        assert!(broadcaster.queued_since(Some("restore.applied"), 0).is_empty());
        assert_eq!(broadcaster.queued_since(None, 0).len(), MAX_QUEUE_PER_KIND);
        assert!(broadcaster.queued_since(None, i64::MAX).is_empty());
    }
}
