use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum ConfirmPaymentError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmPaymentInput {
    pub order_id: Option<String>,
    /// Amount actually sent, when the buyer wants it on record.
    pub amount_pkr: Option<f64>,
}

/// Buyer reports the fiat payment as sent and asks the seller to verify it.
pub async fn handle_confirm_payment(
    ctx: &TradeCtx,
    room_id: &str,
    input: ConfirmPaymentInput,
) -> Result<Option<ChatMessage>, ConfirmPaymentError> {
    if let Some(amount) = input.amount_pkr {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ConfirmPaymentError::InvalidAmount(amount));
        }
    }

    let Some(gate) = gate_action(ctx, room_id, TradeAction::ConfirmPaymentSent)? else {
        return Ok(None);
    };

    let envelope = TradeEnvelope::BuyerPaid(EnvelopeFields {
        order_id: input.order_id.clone(),
        amount_pkr: input.amount_pkr,
        buyer_wallet: Some(gate.wallet.clone()),
        ..Default::default()
    });
    let text = match input.amount_pkr {
        Some(amount) => format!("Payment of {amount} PKR sent, awaiting verification"),
        None => "Payment sent, awaiting verification".to_string(),
    };

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/payment sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}
