use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::domain::pricing::{QuoteError, quote_trade};
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::orders::{OrderStore, TradeRoom};
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum TradeRequestError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("order not found: {0}")]
    UnknownOrder(String),
}

#[derive(Debug, Clone)]
pub struct TradeRequestInput {
    pub order_id: Option<String>,
    pub amount_pkr: f64,
    pub token: String,
}

/// Buyer opens a trade against a standing order: prices the request, opens
/// the room, and asks the seller for approval.
pub async fn handle_trade_request(
    ctx: &TradeCtx,
    room_id: &str,
    input: TradeRequestInput,
) -> Result<Option<ChatMessage>, TradeRequestError> {
    let Some(gate) = gate_action(ctx, room_id, TradeAction::RequestTrade)? else {
        return Ok(None);
    };

    let order = match &input.order_id {
        Some(id) => Some(
            ctx.orders
                .get_order(id)
                .ok_or_else(|| TradeRequestError::UnknownOrder(id.clone()))?,
        ),
        None => None,
    };

    let quote = quote_trade(
        ctx.rates.as_ref(),
        order.as_ref(),
        input.amount_pkr,
        &input.token,
    )?;

    let seller_wallet = order.as_ref().map(|o| o.owner_wallet.clone());
    if let (Some(order), Some(seller)) = (&order, &seller_wallet) {
        ctx.rooms.open_room(TradeRoom::open(
            room_id,
            &gate.wallet,
            seller,
            &order.id,
        ));
    }

    let envelope = TradeEnvelope::TradeRequest(EnvelopeFields {
        order_id: input.order_id.clone(),
        amount_pkr: Some(quote.amount_pkr),
        token: Some(quote.token.clone()),
        buyer_wallet: Some(gate.wallet.clone()),
        seller_wallet,
        ..Default::default()
    });
    let text = format!(
        "Trade request: {} PKR of {} at {} PKR ({:.6} {})",
        quote.amount_pkr, quote.token, quote.rate_pkr, quote.token_amount, quote.token
    );

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/request sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}
