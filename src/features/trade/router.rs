use std::collections::HashSet;
use std::sync::Mutex;

use crate::features::trade::envelope::{ParsedPayload, TradeEnvelope, parse_payload};
use crate::features::trade::message::{ChatMessage, ChatNotification};

/// Retransmissions of one action land in the same bucket; distinct
/// human-scale actions do not.
pub const DEDUP_BUCKET_MS: i64 = 10_000;

/// Outcome of routing one inbound chat message.
#[derive(Debug)]
pub enum Routed {
    /// Plain chat or attachment; persisted, nothing to action.
    Chat,
    /// Self-describing payload outside the closed protocol set; persisted
    /// and re-broadcast, never actioned.
    Opaque,
    /// A recognized protocol transition. `notification` is `None` when the
    /// same event was already seen in this dedup bucket.
    Protocol {
        envelope: TradeEnvelope,
        notification: Option<ChatNotification>,
    },
}

/// Classifies inbound chat payloads into typed notifications and decides who
/// must react to them. Parsing never fails hard: the channel is shared with
/// free-form chat, so anything unrecognized stays a plain message.
#[derive(Default)]
pub struct NotificationRouter {
    seen: Mutex<HashSet<DedupKey>>,
}

type DedupKey = (String, String, String, i64);

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, msg: &ChatMessage) -> Routed {
        match parse_payload(msg) {
            ParsedPayload::Text => Routed::Chat,
            ParsedPayload::Opaque(_) => Routed::Opaque,
            ParsedPayload::Protocol(envelope) => {
                let candidate = synthesize(msg, &envelope);
                let notification = self.first_in_bucket(&candidate).then_some(candidate);
                Routed::Protocol {
                    envelope,
                    notification,
                }
            }
        }
    }

    /// Marks a notification's `(room, type, initiator, bucket)` identity as
    /// seen. A notification arriving as a typed event and one synthesized
    /// from its causative chat message share one identity: both carry the
    /// envelope tag in `data`.
    pub fn first_in_bucket(&self, notification: &ChatNotification) -> bool {
        let tag = notification
            .data
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or(notification.kind.as_str())
            .to_string();
        let key = (
            notification.room_id.clone(),
            tag,
            notification.initiator_wallet.clone(),
            notification.timestamp.div_euclid(DEDUP_BUCKET_MS),
        );
        self.seen.lock().expect("router dedup lock").insert(key)
    }
}

fn synthesize(msg: &ChatMessage, envelope: &TradeEnvelope) -> ChatNotification {
    ChatNotification {
        kind: envelope.notification_kind(),
        room_id: msg.room_id.clone(),
        initiator_wallet: msg.sender_wallet.clone(),
        initiator_role: msg.sender_role,
        message: msg.text.clone(),
        data: envelope.to_metadata(),
        timestamp: msg.timestamp,
    }
}

/// Whether a notification should trigger a UI reaction for `local_wallet`.
///
/// The initiator is never alerted about their own action. When the payload
/// names both parties, only they are addressed; otherwise membership is not
/// fully known and everyone on the room is, over-delivery being preferred
/// to a silent drop.
pub fn should_alert(notification: &ChatNotification, local_wallet: &str) -> bool {
    if !notification.kind.is_actionable() {
        return false;
    }
    if notification.initiator_wallet == local_wallet {
        return false;
    }

    let named = |key: &str| {
        notification
            .data
            .get(key)
            .and_then(|v| v.as_str())
            .map(|w| w == local_wallet)
    };
    match (named("buyer_wallet"), named("seller_wallet")) {
        (Some(buyer), Some(seller)) => buyer || seller,
        // membership not fully known: deliver to everyone on the room
        _ => true,
    }
}
