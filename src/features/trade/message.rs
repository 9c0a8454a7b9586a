use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved broadcast room visible to every participant.
pub const GLOBAL_ROOM: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat or protocol message in a trade room.
///
/// `sender_wallet` is advisory: nothing binds the wallet string to the actual
/// author of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "senderWallet")]
    pub sender_wallet: String,
    #[serde(rename = "senderRole")]
    pub sender_role: Role,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Epoch milliseconds, producer-assigned.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(
        room_id: impl Into<String>,
        sender_wallet: impl Into<String>,
        sender_role: Role,
        kind: impl Into<String>,
        text: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let timestamp = now_ms();
        Self {
            id: new_message_id(timestamp),
            room_id: room_id.into(),
            sender_wallet: sender_wallet.into(),
            sender_role,
            kind: kind.into(),
            text: text.into(),
            metadata,
            timestamp,
        }
    }

    pub fn plain(
        room_id: impl Into<String>,
        sender_wallet: impl Into<String>,
        sender_role: Role,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            room_id,
            sender_wallet,
            sender_role,
            "message",
            text,
            serde_json::Map::new(),
        )
    }

    pub fn timeline_cmp(&self, other: &ChatMessage) -> Ordering {
        (self.timestamp, self.id.as_str()).cmp(&(other.timestamp, other.id.as_str()))
    }
}

/// Display order for a room timeline: `(timestamp, id)` ascending.
pub fn sort_timeline(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.timeline_cmp(b));
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TradeInitiated,
    PaymentReceived,
    StatusChange,
    /// Forward-compatible carrier for types this client does not act on.
    #[serde(untagged)]
    Other(String),
}

impl NotificationKind {
    /// Whether this client knows how to react to the notification. Unknown
    /// kinds are stored and re-broadcast but never actioned.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, NotificationKind::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::TradeInitiated => "trade_initiated",
            NotificationKind::PaymentReceived => "payment_received",
            NotificationKind::StatusChange => "status_change",
            NotificationKind::Other(s) => s.as_str(),
        }
    }
}

/// A typed alert derived from exactly one causative message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "initiatorWallet")]
    pub initiator_wallet: String,
    #[serde(rename = "initiatorRole")]
    pub initiator_role: Role,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    pub timestamp: i64,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Producer-assigned id, unique within a room and orderable alongside the
/// millisecond timestamp it embeds.
pub fn new_message_id(timestamp: i64) -> String {
    format!("{timestamp}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_orders_by_timestamp_then_id() {
        let mut a = ChatMessage::plain("room-1", "w1", Role::Buyer, "first");
        let mut b = ChatMessage::plain("room-1", "w2", Role::Seller, "second");
        a.timestamp = 10;
        a.id = "10-b".into();
        b.timestamp = 10;
        b.id = "10-a".into();
        let mut c = a.clone();
        c.timestamp = 5;
        c.id = "5-z".into();

        let mut timeline = vec![a.clone(), b.clone(), c.clone()];
        sort_timeline(&mut timeline);
        assert_eq!(timeline[0].id, "5-z");
        assert_eq!(timeline[1].id, "10-a");
        assert_eq!(timeline[2].id, "10-b");
    }

    #[test]
    fn notification_kind_round_trips_unknown_types() {
        let known: NotificationKind = serde_json::from_str("\"trade_initiated\"").unwrap();
        assert_eq!(known, NotificationKind::TradeInitiated);
        assert!(known.is_actionable());

        let unknown: NotificationKind = serde_json::from_str("\"dispute_opened\"").unwrap();
        assert_eq!(unknown, NotificationKind::Other("dispute_opened".into()));
        assert!(!unknown.is_actionable());
        assert_eq!(
            serde_json::to_string(&unknown).unwrap(),
            "\"dispute_opened\""
        );
    }

    #[test]
    fn message_wire_shape_uses_camel_case_keys() {
        let msg = ChatMessage::plain("room-1", "0xabc", Role::Buyer, "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("roomId").is_some());
        assert!(value.get("senderWallet").is_some());
        assert_eq!(value["type"], "message");
    }
}
