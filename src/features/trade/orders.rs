use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::trade::envelope::{
    self, TAG_BUYER_CONFIRMED_RECEIPT, TAG_BUYER_PAID, TAG_ORDER_FAILED, TAG_SELLER_TRANSFERRED,
};
use crate::features::trade::message::now_ms;

/// Coarse room status used by list and dashboard views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Pending,
    PaymentConfirmed,
    AssetsTransferred,
    Completed,
    Cancelled,
}

impl RoomStatus {
    fn rank(self) -> u8 {
        match self {
            RoomStatus::Pending => 0,
            RoomStatus::PaymentConfirmed => 1,
            RoomStatus::AssetsTransferred => 2,
            RoomStatus::Completed => 3,
            RoomStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Completed | RoomStatus::Cancelled)
    }
}

/// Room status reached by one protocol tag, if the tag affects status.
pub fn status_for_tag(tag: &str) -> Option<RoomStatus> {
    match envelope::canonical_tag(tag)? {
        TAG_BUYER_PAID => Some(RoomStatus::PaymentConfirmed),
        TAG_SELLER_TRANSFERRED => Some(RoomStatus::AssetsTransferred),
        TAG_BUYER_CONFIRMED_RECEIPT => Some(RoomStatus::Completed),
        TAG_ORDER_FAILED => Some(RoomStatus::Cancelled),
        _ => None,
    }
}

/// The coordination channel and permanent audit record of one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRoom {
    pub id: String,
    pub buyer_wallet: String,
    pub seller_wallet: String,
    pub order_id: String,
    pub status: RoomStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TradeRoom {
    pub fn open(
        id: impl Into<String>,
        buyer_wallet: impl Into<String>,
        seller_wallet: impl Into<String>,
        order_id: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            buyer_wallet: buyer_wallet.into(),
            seller_wallet: seller_wallet.into(),
            order_id: order_id.into(),
            status: RoomStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomOrdering {
    /// `updated_at` descending, for recent-activity views.
    #[default]
    RecentActivity,
    /// `created_at` ascending, for audit ordering.
    Audit,
}

#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub wallet: Option<String>,
    pub status: Option<RoomStatus>,
    pub ordering: RoomOrdering,
}

/// Tracks every trade room this client has seen, drives the coarse status
/// off the message stream, and keeps the pending/completed partition.
/// Rooms are never deleted.
#[derive(Default)]
pub struct RoomBook {
    inner: Mutex<BookInner>,
}

#[derive(Default)]
struct BookInner {
    rooms: HashMap<String, TradeRoom>,
    pending: HashSet<String>,
    completed: HashSet<String>,
    failures: HashMap<String, String>,
}

impl RoomBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a room when a counterparty accepts an order. Re-opening an
    /// existing id is a no-op.
    pub fn open_room(&self, room: TradeRoom) {
        let mut inner = self.inner.lock().expect("room book lock");
        if inner.rooms.contains_key(&room.id) {
            return;
        }
        inner.pending.insert(room.id.clone());
        inner.rooms.insert(room.id.clone(), room);
    }

    /// Applies one protocol message to the room's coarse status. The mapping
    /// is monotone: a status never moves backward, terminal statuses never
    /// change, and duplicate events are no-ops. Returns the new status when
    /// it changed.
    pub fn on_event(&self, room_id: &str, tag: &str, reason: Option<&str>) -> Option<RoomStatus> {
        let next = status_for_tag(tag)?;

        let mut inner = self.inner.lock().expect("room book lock");
        let room = inner.rooms.get_mut(room_id)?;
        let current = room.status;

        if current.is_terminal() || next.rank() <= current.rank() {
            return None;
        }

        room.status = next;
        room.updated_at = now_ms();
        info!("room {room_id} status {current:?} -> {next:?}");

        match next {
            RoomStatus::Completed => {
                inner.pending.remove(room_id);
                inner.completed.insert(room_id.to_string());
            }
            RoomStatus::Cancelled => {
                // stays pending until explicitly dismissed; only the failure
                // reason is recorded
                let reason = reason.unwrap_or("trade failed").to_string();
                inner.failures.insert(room_id.to_string(), reason);
            }
            _ => {}
        }
        Some(next)
    }

    pub fn room(&self, room_id: &str) -> Option<TradeRoom> {
        self.inner
            .lock()
            .expect("room book lock")
            .rooms
            .get(room_id)
            .cloned()
    }

    pub fn is_pending(&self, room_id: &str) -> bool {
        self.inner
            .lock()
            .expect("room book lock")
            .pending
            .contains(room_id)
    }

    pub fn is_completed(&self, room_id: &str) -> bool {
        self.inner
            .lock()
            .expect("room book lock")
            .completed
            .contains(room_id)
    }

    pub fn failure_reason(&self, room_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("room book lock")
            .failures
            .get(room_id)
            .cloned()
    }

    /// Removes a cancelled room from the pending set. Explicit participant or
    /// operator action; the room record itself is retained.
    pub fn dismiss(&self, room_id: &str) {
        let mut inner = self.inner.lock().expect("room book lock");
        if inner
            .rooms
            .get(room_id)
            .is_some_and(|r| r.status == RoomStatus::Cancelled)
        {
            inner.pending.remove(room_id);
        }
    }

    pub fn list(&self, filter: &RoomFilter) -> Vec<TradeRoom> {
        let inner = self.inner.lock().expect("room book lock");
        let mut rooms: Vec<TradeRoom> = inner
            .rooms
            .values()
            .filter(|room| {
                filter
                    .wallet
                    .as_deref()
                    .is_none_or(|w| room.buyer_wallet == w || room.seller_wallet == w)
            })
            .filter(|room| filter.status.is_none_or(|s| room.status == s))
            .cloned()
            .collect();
        match filter.ordering {
            RoomOrdering::RecentActivity => {
                rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)))
            }
            RoomOrdering::Audit => {
                rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            }
        }
        rooms
    }
}

/// Standing offer terms a room is instantiated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub owner_wallet: String,
    pub token: String,
    /// Offered price, PKR per token unit.
    pub rate_pkr: f64,
    pub min_amount_pkr: f64,
    pub max_amount_pkr: f64,
    pub payment_method: Option<String>,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<RoomStatus>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub owner_wallet: Option<String>,
    pub token: Option<String>,
    pub status: Option<RoomStatus>,
}

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("order already exists: {0}")]
    Duplicate(String),
    #[error("order not found: {0}")]
    NotFound(String),
}

/// Persistent store of standing order terms. Trade handlers read terms from
/// it; only the lifecycle path writes, and only the status field.
pub trait OrderStore: Send + Sync {
    fn create_order(&self, order: Order) -> Result<(), OrderStoreError>;
    fn get_order(&self, id: &str) -> Option<Order>;
    fn update_order(&self, id: &str, patch: OrderPatch) -> Result<(), OrderStoreError>;
    fn list_orders(&self, filter: &OrderFilter) -> Vec<Order>;
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryOrderStore {
    fn create_order(&self, order: Order) -> Result<(), OrderStoreError> {
        let mut orders = self.orders.lock().expect("order store lock");
        if orders.contains_key(&order.id) {
            return Err(OrderStoreError::Duplicate(order.id));
        }
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    fn get_order(&self, id: &str) -> Option<Order> {
        self.orders.lock().expect("order store lock").get(id).cloned()
    }

    fn update_order(&self, id: &str, patch: OrderPatch) -> Result<(), OrderStoreError> {
        let mut orders = self.orders.lock().expect("order store lock");
        let order = orders
            .get_mut(id)
            .ok_or_else(|| OrderStoreError::NotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            order.status = status;
        }
        if let Some(method) = patch.payment_method {
            order.payment_method = Some(method);
        }
        Ok(())
    }

    fn list_orders(&self, filter: &OrderFilter) -> Vec<Order> {
        let orders = self.orders.lock().expect("order store lock");
        let mut out: Vec<Order> = orders
            .values()
            .filter(|o| filter.owner_wallet.as_deref().is_none_or(|w| o.owner_wallet == w))
            .filter(|o| filter.token.as_deref().is_none_or(|t| o.token == t))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
