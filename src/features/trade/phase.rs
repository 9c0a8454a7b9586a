use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::features::trade::envelope::{
    self, TAG_BUYER_CONFIRMED_RECEIPT, TAG_BUYER_PAID, TAG_ORDER_FAILED, TAG_SELLER_ACCEPTED,
    TAG_SELLER_TRANSFERRED, TAG_SELLER_VERIFIED, TAG_TRADE_REQUEST,
};
use crate::features::trade::message::{ChatMessage, Role};

/// Client-derived negotiation step within a room. Recomputed from message
/// history, never stored authoritatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradePhase {
    Entry,
    AwaitingCounterpartyApproval,
    CounterpartyApproved,
    AwaitingPaymentVerification,
    PaymentVerified,
    AssetsTransferred,
    Completed,
    Failed,
}

impl TradePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TradePhase::Completed | TradePhase::Failed)
    }
}

impl std::fmt::Display for TradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradePhase::Entry => "entry",
            TradePhase::AwaitingCounterpartyApproval => "awaiting_counterparty_approval",
            TradePhase::CounterpartyApproved => "counterparty_approved",
            TradePhase::AwaitingPaymentVerification => "awaiting_payment_verification",
            TradePhase::PaymentVerified => "payment_verified",
            TradePhase::AssetsTransferred => "assets_transferred",
            TradePhase::Completed => "completed",
            TradePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Phase reached by one protocol tag.
pub fn phase_for_tag(tag: &str) -> Option<TradePhase> {
    match envelope::canonical_tag(tag)? {
        TAG_TRADE_REQUEST => Some(TradePhase::AwaitingCounterpartyApproval),
        TAG_SELLER_ACCEPTED => Some(TradePhase::CounterpartyApproved),
        TAG_BUYER_PAID => Some(TradePhase::AwaitingPaymentVerification),
        TAG_SELLER_VERIFIED => Some(TradePhase::PaymentVerified),
        TAG_SELLER_TRANSFERRED => Some(TradePhase::AssetsTransferred),
        TAG_BUYER_CONFIRMED_RECEIPT => Some(TradePhase::Completed),
        TAG_ORDER_FAILED => Some(TradePhase::Failed),
        _ => None,
    }
}

/// Folds a room timeline into its phase.
///
/// The fold is a monotone lattice, not a strict state machine: the highest
/// transition observed wins regardless of arrival order, and a failure
/// message is absorbing wherever it sits in the log. Applying the fold twice,
/// or to any permutation of the same messages, yields the same phase.
pub fn fold_phase<'a>(timeline: impl IntoIterator<Item = &'a ChatMessage>) -> TradePhase {
    let mut phase = TradePhase::Entry;
    for msg in timeline {
        let Some(tag) = envelope::protocol_tag(msg) else {
            continue;
        };
        let Some(reached) = phase_for_tag(tag) else {
            continue;
        };
        if reached == TradePhase::Failed {
            return TradePhase::Failed;
        }
        phase = phase.max(reached);
    }
    phase
}

/// Fold results cached per room, keyed by the last-seen message id and the
/// timeline length; any new message invalidates the entry.
#[derive(Default)]
pub struct PhaseCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    last_id: String,
    len: usize,
    phase: TradePhase,
}

impl PhaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase_of(&self, room_id: &str, timeline: &[ChatMessage]) -> TradePhase {
        let Some(last) = timeline.last() else {
            return TradePhase::Entry;
        };

        let mut inner = self.inner.lock().expect("phase cache lock");
        if let Some(entry) = inner.get(room_id) {
            if entry.last_id == last.id && entry.len == timeline.len() {
                return entry.phase;
            }
        }

        let phase = fold_phase(timeline.iter());
        inner.insert(
            room_id.to_string(),
            CacheEntry {
                last_id: last.id.clone(),
                len: timeline.len(),
                phase,
            },
        );
        phase
    }

    pub fn invalidate(&self, room_id: &str) {
        self.inner.lock().expect("phase cache lock").remove(room_id);
    }
}

/// User actions driving the protocol forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    RequestTrade,
    ApproveTrade,
    ConfirmPaymentSent,
    VerifyPayment,
    MarkTransferred,
    ConfirmReceipt,
    Cancel,
}

impl TradeAction {
    /// The role an action is reserved for; `None` means either party.
    pub fn required_role(self) -> Option<Role> {
        match self {
            TradeAction::RequestTrade
            | TradeAction::ConfirmPaymentSent
            | TradeAction::ConfirmReceipt => Some(Role::Buyer),
            TradeAction::ApproveTrade
            | TradeAction::VerifyPayment
            | TradeAction::MarkTransferred => Some(Role::Seller),
            TradeAction::Cancel => None,
        }
    }

    /// The phase the action drives the room into.
    pub fn target_phase(self) -> TradePhase {
        match self {
            TradeAction::RequestTrade => TradePhase::AwaitingCounterpartyApproval,
            TradeAction::ApproveTrade => TradePhase::CounterpartyApproved,
            TradeAction::ConfirmPaymentSent => TradePhase::AwaitingPaymentVerification,
            TradeAction::VerifyPayment => TradePhase::PaymentVerified,
            TradeAction::MarkTransferred => TradePhase::AssetsTransferred,
            TradeAction::ConfirmReceipt => TradePhase::Completed,
            TradeAction::Cancel => TradePhase::Failed,
        }
    }
}

/// Legal action set for a role at a phase: the role's next forward step, plus
/// cancel while the room is non-terminal.
pub fn allowed_actions(phase: TradePhase, role: Role) -> Vec<TradeAction> {
    let mut actions = Vec::new();
    let next = match (phase, role) {
        (TradePhase::Entry, Role::Buyer) => Some(TradeAction::RequestTrade),
        (TradePhase::AwaitingCounterpartyApproval, Role::Seller) => Some(TradeAction::ApproveTrade),
        (TradePhase::CounterpartyApproved, Role::Buyer) => Some(TradeAction::ConfirmPaymentSent),
        (TradePhase::AwaitingPaymentVerification, Role::Seller) => Some(TradeAction::VerifyPayment),
        (TradePhase::PaymentVerified, Role::Seller) => Some(TradeAction::MarkTransferred),
        (TradePhase::AssetsTransferred, Role::Buyer) => Some(TradeAction::ConfirmReceipt),
        _ => None,
    };
    if let Some(action) = next {
        actions.push(action);
    }
    if !phase.is_terminal() {
        actions.push(TradeAction::Cancel);
    }
    actions
}
