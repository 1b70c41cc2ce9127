//! Core data types shared by the order book and the matcher: orders, trades,
//! and the small enums describing their sides/kinds/status.

use serde::{Deserialize, Serialize};

pub type OrderId = u64;
pub type TradeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

/// A resting or in-flight order.
///
/// `price` is required for `Limit` and absent for `Market`. `timestamp` is a
/// monotonic arrival stamp assigned by the owning worker, used for price-time
/// priority tie-breaks; it never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub player_id: String,
    pub item_id: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub price: Option<f64>,
    pub timestamp: i64,
    pub status: OrderStatus,
}

impl Order {
    pub fn new(
        id: OrderId,
        player_id: impl Into<String>,
        item_id: impl Into<String>,
        side: Side,
        kind: OrderKind,
        quantity: f64,
        price: Option<f64>,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            player_id: player_id.into(),
            item_id: item_id.into(),
            side,
            kind,
            quantity,
            price,
            timestamp,
            status: OrderStatus::Pending,
        }
    }

    pub fn is_market(&self) -> bool {
        matches!(self.kind, OrderKind::Market)
    }
}

/// An immutable record of a single match. Never stored by the book itself;
/// the matcher emits it and the caller (the worker) consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub item_id: String,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: i64,
}
