pub mod approve;
pub mod cancel;
pub mod payment;
pub mod receipt;
pub mod request;
pub mod transfer;
pub mod verify;

use thiserror::Error;
use tracing::warn;

use crate::features::trade::TradeCtx;
use crate::features::trade::apply_lifecycle;
use crate::features::trade::envelope::{TAG_TRADE_REQUEST, TradeEnvelope, protocol_tag};
use crate::features::trade::message::{ChatMessage, GLOBAL_ROOM, Role};
use crate::features::trade::phase::{TradeAction, TradePhase};
use crate::features::trade::router::Routed;
use crate::features::trade::transport::{Transport, TransportEvent};
use crate::identity::wallet::WalletIdentity;

use self::approve::ApproveTradeError;
use self::cancel::CancelTradeError;
use self::payment::ConfirmPaymentError;
use self::receipt::ConfirmReceiptError;
use self::request::TradeRequestError;
use self::transfer::MarkTransferredError;
use self::verify::VerifyPaymentError;

#[derive(Debug, Error)]
pub enum TradeActionError {
    #[error("request: {0}")]
    Request(#[from] TradeRequestError),

    #[error("approve: {0}")]
    Approve(#[from] ApproveTradeError),

    #[error("payment: {0}")]
    Payment(#[from] ConfirmPaymentError),

    #[error("verify: {0}")]
    Verify(#[from] VerifyPaymentError),

    #[error("transfer: {0}")]
    Transfer(#[from] MarkTransferredError),

    #[error("receipt: {0}")]
    Receipt(#[from] ConfirmReceiptError),

    #[error("cancel: {0}")]
    Cancel(#[from] CancelTradeError),
}

/// Rejections shared by every action, raised before anything is sent.
#[derive(Debug, Error)]
pub enum ActionGateError {
    #[error("no wallet identity available")]
    NoIdentity,

    #[error("action reserved for the {required}, wallet holds the {actual} side")]
    RoleMismatch { required: Role, actual: Role },

    #[error("room {0} already failed, no further transitions accepted")]
    RoomClosed(String),

    #[error("room {0} already completed")]
    RoomCompleted(String),
}

/// A cleared action: the acting wallet and its role in the room.
pub(crate) struct Gate {
    pub wallet: String,
    pub role: Role,
}

/// Checks identity, role, and phase for an action. `Ok(None)` means the room
/// is already at or past the action's target phase and nothing should be
/// re-sent.
pub(crate) fn gate_action(
    ctx: &TradeCtx,
    room_id: &str,
    action: TradeAction,
) -> Result<Option<Gate>, ActionGateError> {
    let wallet = ctx
        .wallet
        .current_address()
        .ok_or(ActionGateError::NoIdentity)?;

    let role = role_in_room(ctx, room_id, &wallet, action);
    if let Some(required) = action.required_role() {
        if role != required {
            return Err(ActionGateError::RoleMismatch {
                required,
                actual: role,
            });
        }
    }

    let phase = ctx.phase(room_id);
    if phase == TradePhase::Failed {
        return match action {
            // cancellation is final once observed; repeating it is a no-op
            TradeAction::Cancel => Ok(None),
            _ => Err(ActionGateError::RoomClosed(room_id.to_string())),
        };
    }
    if phase == TradePhase::Completed && action == TradeAction::Cancel {
        return Err(ActionGateError::RoomCompleted(room_id.to_string()));
    }
    if phase >= action.target_phase() {
        return Ok(None);
    }

    Ok(Some(Gate { wallet, role }))
}

/// Role of a wallet within a room: positional against the stored parties,
/// falling back to the role the attempted action implies.
pub(crate) fn role_in_room(
    ctx: &TradeCtx,
    room_id: &str,
    wallet: &str,
    action: TradeAction,
) -> Role {
    if let Some(room) = ctx.rooms.room(room_id) {
        if room.buyer_wallet == wallet {
            return Role::Buyer;
        }
        if room.seller_wallet == wallet {
            return Role::Seller;
        }
    }
    action.required_role().unwrap_or(Role::Buyer)
}

/// Buyer wallet and order id of the request that opened a room, recovered
/// from its local history.
pub(crate) fn request_context(ctx: &TradeCtx, room_id: &str) -> Option<(String, Option<String>)> {
    let history = ctx.store.history(room_id);
    history
        .iter()
        .rev()
        .find(|msg| protocol_tag(msg) == Some(TAG_TRADE_REQUEST))
        .map(|msg| (msg.sender_wallet.clone(), order_id_of(msg)))
}

fn order_id_of(msg: &ChatMessage) -> Option<String> {
    msg.metadata
        .get("orderId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Emits one cleared transition: local echo first, then the best-effort
/// broadcast, the counterparty notification, and the lifecycle update. Send
/// failures are logged and never unwind the local state.
pub(crate) async fn emit_transition(
    ctx: &TradeCtx,
    room_id: &str,
    gate: &Gate,
    envelope: TradeEnvelope,
    text: String,
) -> ChatMessage {
    let msg = ChatMessage::new(
        room_id,
        &gate.wallet,
        gate.role,
        envelope.tag(),
        text,
        envelope.to_metadata(),
    );

    ctx.store.append(msg.clone());
    ctx.phases.invalidate(room_id);

    let reason = envelope.fields().reason.clone();
    apply_lifecycle(ctx, room_id, envelope.tag(), reason.as_deref());

    if let Err(err) = ctx
        .transport
        .send(room_id, TransportEvent::Chat(msg.clone()))
        .await
    {
        warn!("send failed for room {room_id}, keeping local echo: {err}");
    }

    if let Routed::Protocol {
        notification: Some(notification),
        ..
    } = ctx.router.route(&msg)
    {
        ctx.store.push_notification(notification.clone());
        let _ = ctx
            .transport
            .send(room_id, TransportEvent::Notification(notification.clone()))
            .await;
        if room_id != GLOBAL_ROOM {
            // unrelated participants and the admin watch the global room
            let _ = ctx
                .transport
                .send(GLOBAL_ROOM, TransportEvent::Notification(notification))
                .await;
        }
    }

    msg
}
