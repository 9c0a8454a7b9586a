use thiserror::Error;
use tracing::info;

use crate::features::trade::TradeCtx;
use crate::features::trade::envelope::{EnvelopeFields, TradeEnvelope};
use crate::features::trade::handlers::{ActionGateError, emit_transition, gate_action};
use crate::features::trade::message::ChatMessage;
use crate::features::trade::phase::TradeAction;

#[derive(Debug, Error)]
pub enum MarkTransferredError {
    #[error(transparent)]
    Gate(#[from] ActionGateError),
}

#[derive(Debug, Clone, Default)]
pub struct MarkTransferredInput {
    pub order_id: Option<String>,
    pub token: Option<String>,
    /// On-chain transaction reference, when the seller has one.
    pub tx_ref: Option<String>,
}

/// Seller reports the tokens as sent to the buyer's wallet.
pub async fn handle_mark_transferred(
    ctx: &TradeCtx,
    room_id: &str,
    input: MarkTransferredInput,
) -> Result<Option<ChatMessage>, MarkTransferredError> {
    let Some(gate) = gate_action(ctx, room_id, TradeAction::MarkTransferred)? else {
        return Ok(None);
    };

    let mut fields = EnvelopeFields {
        order_id: input.order_id.clone(),
        token: input.token.clone(),
        seller_wallet: Some(gate.wallet.clone()),
        ..Default::default()
    };
    if let Some(tx_ref) = &input.tx_ref {
        fields
            .extra
            .insert("txRef".into(), serde_json::Value::String(tx_ref.clone()));
    }

    let envelope = TradeEnvelope::SellerTransferred(fields);
    let text = match &input.token {
        Some(token) => format!("{token} transferred to the buyer wallet"),
        None => "Assets transferred to the buyer wallet".to_string(),
    };

    let msg = emit_transition(ctx, room_id, &gate, envelope, text).await;
    info!("trade/transfer sent for room {room_id}: {}", msg.id);
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::trade::orders::{RoomStatus, TradeRoom};
    use crate::features::trade::phase::TradePhase;
    use crate::features::trade::testing::seeded_ctx;

    #[tokio::test]
    async fn transfer_advances_phase_and_room_status() {
        let ctx = seeded_ctx(Some("0xseller"));
        ctx.rooms.open_room(TradeRoom::open(
            "room-1", "0xbuyer", "0xseller", "order-1",
        ));

        let msg = handle_mark_transferred(
            &ctx,
            "room-1",
            MarkTransferredInput {
                order_id: Some("order-1".into()),
                token: Some("USDC".into()),
                tx_ref: Some("0xdeadbeef".into()),
            },
        )
        .await
        .unwrap()
        .expect("message emitted");

        assert_eq!(msg.kind, "seller_transferred");
        assert_eq!(msg.metadata.get("txRef").and_then(|v| v.as_str()), Some("0xdeadbeef"));
        assert_eq!(ctx.phase("room-1"), TradePhase::AssetsTransferred);
        assert_eq!(
            ctx.rooms.room("room-1").unwrap().status,
            RoomStatus::AssetsTransferred
        );
    }

    #[tokio::test]
    async fn buyer_cannot_mark_the_transfer() {
        let ctx = seeded_ctx(Some("0xbuyer"));
        ctx.rooms.open_room(TradeRoom::open(
            "room-1", "0xbuyer", "0xseller", "order-1",
        ));
        let err = handle_mark_transferred(&ctx, "room-1", MarkTransferredInput::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarkTransferredError::Gate(ActionGateError::RoleMismatch { .. })
        ));
    }
}
