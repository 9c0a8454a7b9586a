pub mod envelope;
pub mod handlers;
pub mod history;
pub mod message;
pub mod orders;
pub mod phase;
pub mod reconciler;
pub mod router;
pub mod store;
pub mod subscriber;
pub mod transport;

pub mod domain {
    pub mod pricing;
}

use std::sync::Arc;

use tracing::warn;

use crate::features::trade::domain::pricing::RateSource;
use crate::features::trade::history::HistoryApi;
use crate::features::trade::message::Role;
use crate::features::trade::orders::{OrderPatch, OrderStore, RoomBook, RoomStatus};
use crate::features::trade::phase::{PhaseCache, TradeAction, TradePhase, allowed_actions};
use crate::features::trade::router::NotificationRouter;
use crate::features::trade::store::MessageStore;
use crate::features::trade::transport::Transport;
use crate::identity::wallet::WalletIdentity;

/// Everything one client process needs to take part in trades. Components
/// receive this explicitly; there is no ambient global state.
#[derive(Clone)]
pub struct TradeCtx {
    pub wallet: Arc<dyn WalletIdentity>,
    pub store: Arc<MessageStore>,
    pub transport: Arc<dyn Transport>,
    pub history: Arc<dyn HistoryApi>,
    pub orders: Arc<dyn OrderStore>,
    pub rates: Arc<dyn RateSource>,
    pub rooms: Arc<RoomBook>,
    pub router: Arc<NotificationRouter>,
    pub phases: Arc<PhaseCache>,
}

impl TradeCtx {
    /// Current phase of a room, folded from its local history.
    pub fn phase(&self, room_id: &str) -> TradePhase {
        let history = self.store.history(room_id);
        self.phases.phase_of(room_id, &history)
    }

    /// Legal actions for the current wallet in a room. Empty when there is
    /// no identity or the wallet is not a party to the room; a room with no
    /// record yet also offers nothing, since the opening request is driven
    /// from the order listing rather than this surface.
    pub fn available_actions(&self, room_id: &str) -> Vec<TradeAction> {
        let Some(wallet) = self.wallet.current_address() else {
            return Vec::new();
        };
        let Some(room) = self.rooms.room(room_id) else {
            return Vec::new();
        };
        let role = if room.buyer_wallet == wallet {
            Role::Buyer
        } else if room.seller_wallet == wallet {
            Role::Seller
        } else {
            return Vec::new();
        };
        allowed_actions(self.phase(room_id), role)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::TradeCtx;
    use crate::features::trade::domain::pricing::FixedRates;
    use crate::features::trade::history::{HistoryApi, NoRemoteHistory};
    use crate::features::trade::orders::{
        MemoryOrderStore, Order, OrderStore, RoomBook, RoomStatus,
    };
    use crate::features::trade::phase::PhaseCache;
    use crate::features::trade::router::NotificationRouter;
    use crate::features::trade::store::MessageStore;
    use crate::features::trade::transport::{ChannelTransport, Transport};
    use crate::identity::wallet::ConfigWallet;

    /// Standalone client with `order-1` on the book and a USDC rate of 280.
    pub(crate) fn seeded_ctx(wallet: Option<&str>) -> TradeCtx {
        build_ctx(
            wallet,
            Arc::new(ChannelTransport::new()),
            Arc::new(NoRemoteHistory),
        )
    }

    /// A second identity over the same stores, for tests that play both
    /// sides of a room in one process.
    pub(crate) fn seeded_ctx_sharing(other: &TradeCtx, wallet: Option<&str>) -> TradeCtx {
        let mut ctx = other.clone();
        ctx.wallet = Arc::new(ConfigWallet::new(wallet.map(Into::into)));
        ctx
    }

    pub(crate) fn build_ctx(
        wallet: Option<&str>,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryApi>,
    ) -> TradeCtx {
        let orders = MemoryOrderStore::new();
        orders
            .create_order(Order {
                id: "order-1".into(),
                owner_wallet: "0xseller".into(),
                token: "USDC".into(),
                rate_pkr: 280.0,
                min_amount_pkr: 1_000.0,
                max_amount_pkr: 100_000.0,
                payment_method: Some("bank transfer".into()),
                status: RoomStatus::Pending,
            })
            .expect("seed order");

        TradeCtx {
            wallet: Arc::new(ConfigWallet::new(wallet.map(Into::into))),
            store: Arc::new(MessageStore::in_memory()),
            transport,
            history,
            orders: Arc::new(orders),
            rates: Arc::new(FixedRates::new(HashMap::from([(
                "USDC".to_string(),
                280.0,
            )]))),
            rooms: Arc::new(RoomBook::new()),
            router: Arc::new(NotificationRouter::new()),
            phases: Arc::new(PhaseCache::new()),
        }
    }
}

/// Drives the coarse room status off one protocol message and mirrors the
/// change onto the standing order record. Only the status field is ever
/// written back.
pub(crate) fn apply_lifecycle(ctx: &TradeCtx, room_id: &str, tag: &str, reason: Option<&str>) {
    let Some(status) = ctx.rooms.on_event(room_id, tag, reason) else {
        return;
    };
    let Some(room) = ctx.rooms.room(room_id) else {
        return;
    };
    let patch = OrderPatch {
        status: Some(status),
        ..Default::default()
    };
    if let Err(err) = ctx.orders.update_order(&room.order_id, patch) {
        warn!("order {} status update skipped: {err}", room.order_id);
    }
    if status == RoomStatus::Cancelled {
        if let Some(reason) = ctx.rooms.failure_reason(room_id) {
            warn!("room {room_id} failed: {reason}");
        }
    }
}
