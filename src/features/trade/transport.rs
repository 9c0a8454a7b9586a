use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::features::trade::message::{ChatMessage, ChatNotification};

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// One inbound event on a room channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Chat(ChatMessage),
    Notification(ChatNotification),
    /// Full-state catch-up emitted on (re)connect; recovers missed events.
    Snapshot(Vec<ChatMessage>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no realtime channel for room {0}")]
    Unavailable(String),
    #[error("room channel closed: {0}")]
    Closed(String),
}

/// Room-scoped publish/subscribe seam. Delivery is best-effort: no ordering
/// across rooms, at-least-once within a room while the connection is healthy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort publish into a room. A send with no listeners is not an
    /// error.
    async fn send(&self, room_id: &str, event: TransportEvent) -> Result<(), TransportError>;

    /// Opens an unbounded, restartable inbound event sequence for a room.
    async fn subscribe(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;
}

/// In-process broker: one broadcast channel per room. Serves tests, demos,
/// and embedding; a relay- or websocket-backed `Transport` plugs in at the
/// same seam.
#[derive(Default)]
pub struct ChannelTransport {
    rooms: Mutex<HashMap<String, broadcast::Sender<TransportEvent>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, room_id: &str) -> broadcast::Sender<TransportEvent> {
        let mut rooms = self.rooms.lock().expect("transport room lock");
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, room_id: &str, event: TransportEvent) -> Result<(), TransportError> {
        // send returns Err when no receiver is currently subscribed; that is
        // normal for a best-effort broadcast.
        let _ = self.channel(room_id).send(event);
        Ok(())
    }

    async fn subscribe(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let mut source = self.channel(room_id).subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let room = room_id.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("room {room} subscriber lagged, {skipped} events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
