use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum VerifyPaymentError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),
}

#[derive(Debug, Clone, Default)]
pub struct VerifyPaymentInput {
    pub order_id: Option<String>,
    /// Bank reference or note attached to the verification.
    pub note: Option<String>,
}

/// Seller confirms the fiat payment arrived.
pub async fn handle_verify_payment(
    ctx: &TradeCtx,
    room_id: &str,
    input: VerifyPaymentInput,
) -> Result<Option<ChatMessage>, VerifyPaymentError> {
    let Some(gate) = gate_action(ctx, room_id, TradeAction::VerifyPayment)? else {
        return Ok(None);
    };

    let mut fields = EnvelopeFields {
        order_id: input.order_id.clone(),
        seller_wallet: Some(gate.wallet.clone()),
        ..Default::default()
    };
    if let Some(note) = &input.note {
        fields
            .extra
            .insert("note".into(), serde_json::Value::String(note.clone()));
    }

    let envelope = TradeEnvelope::SellerVerified(fields);
    let text = "Payment verified".to_string();

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/verify sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::trade::orders::TradeRoom;
    use crate::features::trade::phase::TradePhase;
    use crate::features::trade::testing::seeded_ctx;

    #[tokio::test]
    async fn verification_advances_the_phase() {
        let ctx = seeded_ctx(Some("0xseller"));
        ctx.rooms.open_room(TradeRoom::open(
            "room-1", "0xbuyer", "0xseller", "order-1",
        ));

        let msg = handle_verify_payment(&ctx, "room-1", VerifyPaymentInput::default())
            .await
            .unwrap()
            .expect("message emitted");
        assert_eq!(msg.kind, "seller_verified");
        assert_eq!(ctx.phase("room-1"), TradePhase::PaymentVerified);
    }

    #[tokio::test]
    async fn verifying_twice_sends_once() {
        let ctx = seeded_ctx(Some("0xseller"));
        ctx.rooms.open_room(TradeRoom::open(
            "room-1", "0xbuyer", "0xseller", "order-1",
        ));

        handle_verify_payment(&ctx, "room-1", VerifyPaymentInput::default())
            .await
            .unwrap();
        let second = handle_verify_payment(&ctx, "room-1", VerifyPaymentInput::default())
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(ctx.store.history("room-1").len(), 1);
    }
}
