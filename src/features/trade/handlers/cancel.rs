use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum CancelTradeError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),

    #[error("a cancellation reason is required")]
    MissingReason,
}

#[derive(Debug, Clone)]
pub struct CancelTradeInput {
    pub reason: String,
    pub order_id: Option<String>,
}

/// Either party abandons the trade with a reason. Final once observed.
pub async fn handle_cancel_trade(
    ctx: &TradeCtx,
    room_id: &str,
    input: CancelTradeInput,
) -> Result<Option<ChatMessage>, CancelTradeError> {
    if input.reason.trim().is_empty() {
        return Err(CancelTradeError::MissingReason);
    }

    let Some(gate) = gate_action(ctx, room_id, TradeAction::Cancel)? else {
        return Ok(None);
    };

    let envelope = TradeEnvelope::OrderFailed(EnvelopeFields {
        order_id: input.order_id.clone(),
        reason: Some(input.reason.clone()),
        ..Default::default()
    });
    let text = format!("Trade failed: {}", input.reason);

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/cancel sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}
