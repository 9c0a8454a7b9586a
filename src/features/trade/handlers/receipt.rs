use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum ConfirmReceiptError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmReceiptInput {
    pub order_id: Option<String>,
}

/// Buyer confirms the tokens arrived, closing the trade.
pub async fn handle_confirm_receipt(
    ctx: &TradeCtx,
    room_id: &str,
    input: ConfirmReceiptInput,
) -> Result<Option<ChatMessage>, ConfirmReceiptError> {
    let Some(gate) = gate_action(ctx, room_id, TradeAction::ConfirmReceipt)? else {
        return Ok(None);
    };

    let envelope = TradeEnvelope::BuyerConfirmedReceipt(EnvelopeFields {
        order_id: input.order_id.clone(),
        buyer_wallet: Some(gate.wallet.clone()),
        ..Default::default()
    });
    let text = "Assets received, trade complete".to_string();

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/receipt sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}
