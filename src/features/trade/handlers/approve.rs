use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{
    ActionGateError, emit_transition, gate_action, request_context,
};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::orders::TradeRoom;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum ApproveTradeError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),

    #[error("receive details are required to approve a trade")]
    MissingPaymentDetails,
}

#[derive(Debug, Clone)]
pub struct ApproveTradeInput {
    /// Where the buyer should send the fiat payment.
    pub payment_method: String,
    pub order_id: Option<String>,
    pub buyer_wallet: Option<String>,
}

/// Seller approves a requested trade and supplies the account the buyer
/// should pay into.
pub async fn handle_approve_trade(
    ctx: &TradeCtx,
    room_id: &str,
    input: ApproveTradeInput,
) -> Result<Option<ChatMessage>, ApproveTradeError> {
    if input.payment_method.trim().is_empty() {
        return Err(ApproveTradeError::MissingPaymentDetails);
    }

    let Some(gate) = gate_action(ctx, room_id, TradeAction::ApproveTrade)? else {
        return Ok(None);
    };

    // the requesting buyer is recoverable from history when the caller does
    // not name one
    let recovered = request_context(ctx, room_id);
    let buyer_wallet = input
        .buyer_wallet
        .clone()
        .or_else(|| recovered.as_ref().map(|(buyer, _)| buyer.clone()));
    let order_id = input
        .order_id
        .clone()
        .or_else(|| recovered.and_then(|(_, order_id)| order_id));

    if let Some(buyer) = &buyer_wallet {
        ctx.rooms.open_room(TradeRoom::open(
            room_id,
            buyer,
            &gate.wallet,
            order_id.clone().unwrap_or_else(|| room_id.to_string()),
        ));
    }

    let envelope = TradeEnvelope::SellerAccepted(EnvelopeFields {
        order_id,
        payment_method: Some(input.payment_method.clone()),
        buyer_wallet,
        seller_wallet: Some(gate.wallet.clone()),
        ..Default::default()
    });
    let text = format!("Trade approved. Send payment to: {}", input.payment_method);

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/approve sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}
