use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use crate::features::trade::TradeCtx;
use crate::features::trade::apply_lifecycle;
use crate::features::trade::envelope::{ParsedPayload, TradeEnvelope, parse_payload};
use crate::features::trade::message::{ChatMessage, ChatNotification, GLOBAL_ROOM, Role};
use crate::features::trade::orders::TradeRoom;
use crate::features::trade::reconciler;
use crate::features::trade::router::{Routed, should_alert};
use crate::features::trade::transport::{Transport, TransportEvent};
use crate::identity::wallet::WalletIdentity;

/// Reference polling cadence for active trade rooms.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Handle on a running room subscription. `stop` is idempotent and releases
/// the realtime listener and the poll timer together; no events are applied
/// after the loop exits.
pub struct RoomHandle {
    stop_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl Clone for RoomHandle {
    fn clone(&self) -> Self {
        Self {
            stop_tx: Arc::clone(&self.stop_tx),
            join: None, // don't clone the JoinHandle!
        }
    }
}

impl RoomHandle {
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.try_lock().ok().and_then(|mut opt| opt.take()) {
            let _ = tx.send(());
        }
    }

    pub async fn stopped(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Joins a room: reconciles its history, then follows inbound events until
/// stopped. Realtime and polling feed one loop; when the realtime channel is
/// live the poll timer is never started, and when it is not the room runs on
/// polling alone.
pub async fn start_room(
    ctx: TradeCtx,
    room_id: impl Into<String>,
    poll_interval: Duration,
) -> RoomHandle {
    let room_id = room_id.into();
    let (stop_tx, stop_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        room_loop(ctx, room_id, poll_interval, stop_rx).await;
    });

    RoomHandle {
        stop_tx: Arc::new(Mutex::new(Some(stop_tx))),
        join: Some(join),
    }
}

async fn room_loop(
    ctx: TradeCtx,
    room_id: String,
    poll_interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let outcome = reconciler::reconcile(&ctx.store, ctx.history.as_ref(), &room_id).await;
    if outcome.degraded {
        info!("room {room_id} opened on cached history");
    }
    replay_timeline(&ctx, &outcome.timeline);

    let mut events = match ctx.transport.subscribe(&room_id).await {
        Ok(rx) => Some(rx),
        Err(err) => {
            warn!("realtime subscribe failed for room {room_id}, polling instead: {err}");
            None
        }
    };
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if let Some(rx) = events.as_mut() {
            tokio::select! {
                _ = &mut stop_rx => break,
                inbound = rx.recv() => match inbound {
                    Some(event) => apply_inbound(&ctx, &room_id, event),
                    None => {
                        warn!("realtime channel ended for room {room_id}, falling back to polling");
                        events = None;
                    }
                },
            }
        } else {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = poll.tick() => {
                    let outcome = reconciler::reconcile(&ctx.store, ctx.history.as_ref(), &room_id).await;
                    replay_timeline(&ctx, &outcome.timeline);
                },
            }
        }
    }

    info!("room {room_id} subscription stopped");
}

/// Applies one inbound event. Never fails: anything unrecognized is kept as
/// plain chat and anything already seen is a no-op.
pub(crate) fn apply_inbound(ctx: &TradeCtx, room_id: &str, event: TransportEvent) {
    match event {
        TransportEvent::Chat(msg) => {
            if ctx.store.append(msg.clone()) {
                ctx.phases.invalidate(&msg.room_id);
            }
            if let Routed::Protocol {
                envelope,
                notification,
            } = ctx.router.route(&msg)
            {
                register_room(ctx, &msg, &envelope);
                apply_lifecycle(
                    ctx,
                    &msg.room_id,
                    envelope.tag(),
                    envelope.fields().reason.as_deref(),
                );
                if let Some(notification) = notification {
                    ctx.store.push_notification(notification.clone());
                    alert(ctx, &notification);
                }
            }
        }
        TransportEvent::Notification(notification) => {
            if ctx.router.first_in_bucket(&notification) {
                ctx.store.push_notification(notification.clone());
                alert(ctx, &notification);
            }
        }
        TransportEvent::Snapshot(messages) => {
            let local = ctx.store.history(room_id);
            let merged = reconciler::merge_histories(local, messages);
            ctx.store.replace_history(room_id, merged.clone());
            ctx.phases.invalidate(room_id);
            replay_timeline(ctx, &merged);
        }
    }
}

/// Re-derives room records and coarse status from a reconciled timeline.
/// History replay never re-alerts.
pub(crate) fn replay_timeline(ctx: &TradeCtx, timeline: &[ChatMessage]) {
    for msg in timeline {
        if let ParsedPayload::Protocol(envelope) = parse_payload(msg) {
            register_room(ctx, msg, &envelope);
            apply_lifecycle(
                ctx,
                &msg.room_id,
                envelope.tag(),
                envelope.fields().reason.as_deref(),
            );
        }
    }
}

/// Opens the local room record for a trade first seen from the counterparty
/// side, once both parties can be named.
fn register_room(ctx: &TradeCtx, msg: &ChatMessage, envelope: &TradeEnvelope) {
    if msg.room_id == GLOBAL_ROOM || ctx.rooms.room(&msg.room_id).is_some() {
        return;
    }
    let fields = envelope.fields();
    let buyer = fields
        .buyer_wallet
        .clone()
        .or_else(|| (msg.sender_role == Role::Buyer).then(|| msg.sender_wallet.clone()));
    let seller = fields
        .seller_wallet
        .clone()
        .or_else(|| (msg.sender_role == Role::Seller).then(|| msg.sender_wallet.clone()));

    if let (Some(buyer), Some(seller)) = (buyer, seller) {
        let order_id = fields
            .order_id
            .clone()
            .unwrap_or_else(|| msg.room_id.clone());
        ctx.rooms
            .open_room(TradeRoom::open(&msg.room_id, buyer, seller, order_id));
    }
}

fn alert(ctx: &TradeCtx, notification: &ChatNotification) {
    let Some(local) = ctx.wallet.current_address() else {
        return;
    };
    if should_alert(notification, &local) {
        // the embedding UI hangs its auto-open/toast behavior off this line
        info!(
            "alert [{}] room {}: {}",
            notification.kind.as_str(),
            notification.room_id,
            notification.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::trade::handlers::approve::{ApproveTradeInput, handle_approve_trade};
    use crate::features::trade::handlers::cancel::{CancelTradeInput, handle_cancel_trade};
    use crate::features::trade::handlers::payment::{ConfirmPaymentInput, handle_confirm_payment};
    use crate::features::trade::handlers::receipt::{ConfirmReceiptInput, handle_confirm_receipt};
    use crate::features::trade::handlers::request::{TradeRequestInput, handle_trade_request};
    use crate::features::trade::handlers::transfer::{
        MarkTransferredInput, handle_mark_transferred,
    };
    use crate::features::trade::handlers::verify::{VerifyPaymentInput, handle_verify_payment};
    use crate::features::trade::history::testing::FixedHistory;
    use crate::features::trade::message::NotificationKind;
    use crate::features::trade::orders::RoomStatus;
    use crate::features::trade::phase::TradePhase;
    use crate::features::trade::testing::{build_ctx, seeded_ctx};
    use crate::features::trade::transport::{ChannelTransport, Transport, TransportError};
    use async_trait::async_trait;

    const ROOM: &str = "room-1";

    /// Hands a message emitted by one client to the other, as the channel
    /// would.
    fn deliver(to: &TradeCtx, msg: &ChatMessage) {
        apply_inbound(to, ROOM, TransportEvent::Chat(msg.clone()));
    }

    #[tokio::test]
    async fn scenario_full_happy_path_converges_on_both_sides() {
        let buyer = seeded_ctx(Some("0xbuyer"));
        let seller = seeded_ctx(Some("0xseller"));

        // buyer requests 5,000 PKR of USDC at 280
        let m = handle_trade_request(
            &buyer,
            ROOM,
            TradeRequestInput {
                order_id: Some("order-1".into()),
                amount_pkr: 5_000.0,
                token: "USDC".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&seller, &m);
        assert_eq!(buyer.phase(ROOM), TradePhase::AwaitingCounterpartyApproval);
        assert_eq!(seller.phase(ROOM), TradePhase::AwaitingCounterpartyApproval);

        let m = handle_approve_trade(
            &seller,
            ROOM,
            ApproveTradeInput {
                payment_method: "Meezan Bank 4411".into(),
                order_id: None,
                buyer_wallet: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&buyer, &m);
        assert_eq!(buyer.phase(ROOM), TradePhase::CounterpartyApproved);

        let m = handle_confirm_payment(
            &buyer,
            ROOM,
            ConfirmPaymentInput {
                order_id: Some("order-1".into()),
                amount_pkr: Some(5_000.0),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&seller, &m);
        assert_eq!(seller.phase(ROOM), TradePhase::AwaitingPaymentVerification);

        let m = handle_verify_payment(&seller, ROOM, VerifyPaymentInput::default())
            .await
            .unwrap()
            .unwrap();
        deliver(&buyer, &m);
        assert_eq!(buyer.phase(ROOM), TradePhase::PaymentVerified);

        let m = handle_mark_transferred(
            &seller,
            ROOM,
            MarkTransferredInput {
                order_id: Some("order-1".into()),
                token: Some("USDC".into()),
                tx_ref: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&buyer, &m);
        assert_eq!(buyer.phase(ROOM), TradePhase::AssetsTransferred);

        let m = handle_confirm_receipt(
            &buyer,
            ROOM,
            ConfirmReceiptInput {
                order_id: Some("order-1".into()),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&seller, &m);

        for ctx in [&buyer, &seller] {
            assert_eq!(ctx.phase(ROOM), TradePhase::Completed);
            assert!(ctx.rooms.is_completed(ROOM));
            assert!(!ctx.rooms.is_pending(ROOM));
            assert_eq!(
                ctx.rooms.room(ROOM).unwrap().status,
                RoomStatus::Completed
            );
        }
    }

    #[tokio::test]
    async fn scenario_seller_cancels_mid_trade() {
        let buyer = seeded_ctx(Some("0xbuyer"));
        let seller = seeded_ctx(Some("0xseller"));

        let m = handle_trade_request(
            &buyer,
            ROOM,
            TradeRequestInput {
                order_id: Some("order-1".into()),
                amount_pkr: 5_000.0,
                token: "USDC".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&seller, &m);

        let m = handle_approve_trade(
            &seller,
            ROOM,
            ApproveTradeInput {
                payment_method: "bank".into(),
                order_id: None,
                buyer_wallet: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&buyer, &m);

        let m = handle_confirm_payment(&buyer, ROOM, ConfirmPaymentInput::default())
            .await
            .unwrap()
            .unwrap();
        deliver(&seller, &m);
        assert_eq!(seller.phase(ROOM), TradePhase::AwaitingPaymentVerification);

        let m = handle_cancel_trade(
            &seller,
            ROOM,
            CancelTradeInput {
                reason: "Seller cancelled".into(),
                order_id: Some("order-1".into()),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&buyer, &m);

        for ctx in [&buyer, &seller] {
            assert_eq!(ctx.phase(ROOM), TradePhase::Failed);
            assert!(ctx.rooms.is_pending(ROOM));
            assert_eq!(
                ctx.rooms.failure_reason(ROOM).as_deref(),
                Some("Seller cancelled")
            );
        }

        // no further transitions accepted on either side
        let err = handle_verify_payment(&seller, ROOM, VerifyPaymentInput::default())
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("already failed"));
        assert!(
            handle_confirm_receipt(&buyer, ROOM, ConfirmReceiptInput::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn scenario_duplicate_payment_envelope_applies_once() {
        let buyer = seeded_ctx(Some("0xbuyer"));
        let seller = seeded_ctx(Some("0xseller"));

        let m = handle_trade_request(
            &buyer,
            ROOM,
            TradeRequestInput {
                order_id: Some("order-1".into()),
                amount_pkr: 5_000.0,
                token: "USDC".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        deliver(&seller, &m);

        let paid = handle_confirm_payment(&buyer, ROOM, ConfirmPaymentInput::default())
            .await
            .unwrap()
            .unwrap();

        let before = seller.store.notifications(ROOM).len();
        deliver(&seller, &paid);
        deliver(&seller, &paid); // network retry

        assert_eq!(seller.store.history(ROOM).len(), 2);
        assert_eq!(
            seller.rooms.room(ROOM).unwrap().status,
            RoomStatus::PaymentConfirmed
        );
        let paid_notifications: Vec<_> = seller
            .store
            .notifications(ROOM)
            .into_iter()
            .skip(before)
            .filter(|n| n.kind == NotificationKind::PaymentReceived)
            .collect();
        assert_eq!(paid_notifications.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_catches_a_room_up() {
        let buyer = seeded_ctx(Some("0xbuyer"));
        let observer = seeded_ctx(Some("0xobserver"));

        let mut missed = Vec::new();
        for msg in [
            handle_trade_request(
                &buyer,
                ROOM,
                TradeRequestInput {
                    order_id: Some("order-1".into()),
                    amount_pkr: 5_000.0,
                    token: "USDC".into(),
                },
            )
            .await
            .unwrap()
            .unwrap(),
            handle_confirm_payment(&buyer, ROOM, ConfirmPaymentInput::default())
                .await
                .unwrap()
                .unwrap(),
        ] {
            missed.push(msg);
        }

        apply_inbound(&observer, ROOM, TransportEvent::Snapshot(missed));
        assert_eq!(
            observer.phase(ROOM),
            TradePhase::AwaitingPaymentVerification
        );
        assert_eq!(observer.store.history(ROOM).len(), 2);
    }

    #[tokio::test]
    async fn live_subscription_follows_the_room() {
        let transport = Arc::new(ChannelTransport::new());
        let history = Arc::new(FixedHistory::new());
        let buyer = build_ctx(Some("0xbuyer"), transport.clone(), history.clone());
        let seller = build_ctx(Some("0xseller"), transport.clone(), history.clone());

        let handle = start_room(seller.clone(), ROOM, Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle_trade_request(
            &buyer,
            ROOM,
            TradeRequestInput {
                order_id: Some("order-1".into()),
                amount_pkr: 5_000.0,
                token: "USDC".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            seller.phase(ROOM),
            TradePhase::AwaitingCounterpartyApproval
        );

        handle.stop();
        handle.stop(); // teardown is idempotent
        handle.stopped().await;
    }

    /// Transport with no realtime path at all.
    struct PollOnlyTransport;

    #[async_trait]
    impl Transport for PollOnlyTransport {
        async fn send(&self, _room_id: &str, _event: TransportEvent) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            room_id: &str,
        ) -> Result<tokio::sync::mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
            Err(TransportError::Unavailable(room_id.to_string()))
        }
    }

    #[tokio::test]
    async fn polling_fallback_converges_without_realtime() {
        let history = Arc::new(FixedHistory::new());
        let producer = seeded_ctx(Some("0xbuyer"));
        let follower = build_ctx(
            Some("0xseller"),
            Arc::new(PollOnlyTransport),
            history.clone(),
        );

        let handle = start_room(follower.clone(), ROOM, Duration::from_millis(30)).await;

        let msg = handle_trade_request(
            &producer,
            ROOM,
            TradeRequestInput {
                order_id: Some("order-1".into()),
                amount_pkr: 5_000.0,
                token: "USDC".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        history.set(ROOM, vec![msg]);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            follower.phase(ROOM),
            TradePhase::AwaitingCounterpartyApproval
        );

        handle.stop();
        handle.stopped().await;
    }
}
