//! Double-sided limit order book: two price-time priority heaps plus an
//! id-indexed lookup, and the crossing matcher.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::market::heap::PriorityQueue;
use crate::market::order::{Order, OrderId, OrderKind, OrderStatus, Side, Trade, TradeId};

/// Floating point quantities never rest at exactly zero after subtraction;
/// treat anything at or below this as fully consumed.
const QTY_EPSILON: f64 = 1e-9;

fn cmp_bid(a: &Order, b: &Order) -> Ordering {
    match (a.is_market(), b.is_market()) {
        (true, true) => a.timestamp.cmp(&b.timestamp),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b
            .price
            .partial_cmp(&a.price)
            .unwrap_or(Ordering::Equal)
            .then(a.timestamp.cmp(&b.timestamp)),
    }
}

fn cmp_ask(a: &Order, b: &Order) -> Ordering {
    match (a.is_market(), b.is_market()) {
        (true, true) => a.timestamp.cmp(&b.timestamp),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .price
            .partial_cmp(&b.price)
            .unwrap_or(Ordering::Equal)
            .then(a.timestamp.cmp(&b.timestamp)),
    }
}

pub struct OrderBook {
    item_id: String,
    bids: PriorityQueue<Order>,
    asks: PriorityQueue<Order>,
    index: HashMap<OrderId, Order>,
    next_trade_id: TradeId,
}

impl OrderBook {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            bids: PriorityQueue::new(cmp_bid),
            asks: PriorityQueue::new(cmp_ask),
            index: HashMap::new(),
            next_trade_id: 1,
        }
    }

    fn heap_mut(&mut self, side: Side) -> &mut PriorityQueue<Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Places `order` in the correct heap and records it in the id index.
    /// Rejects malformed orders (missing limit price, non-positive quantity,
    /// duplicate id) without mutating book state.
    pub fn add(&mut self, order: Order) -> EngineResult<()> {
        if order.quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "order {} has non-positive quantity {}",
                order.id, order.quantity
            )));
        }
        if matches!(order.kind, OrderKind::Limit) {
            match order.price {
                Some(p) if p > 0.0 => {}
                _ => {
                    return Err(EngineError::Validation(format!(
                        "limit order {} requires a positive price",
                        order.id
                    )))
                }
            }
        }
        if self.index.contains_key(&order.id) {
            return Err(EngineError::Validation(format!(
                "order id {} already present in book",
                order.id
            )));
        }

        self.index.insert(order.id, order.clone());
        self.heap_mut(order.side).push(order);
        Ok(())
    }

    /// Removes an order from both the heap and the index. Idempotent: a
    /// second call for the same id returns `false`.
    pub fn remove(&mut self, order_id: OrderId) -> bool {
        let Some(order) = self.index.remove(&order_id) else {
            return false;
        };
        let removed = self.heap_mut(order.side).remove_first(|o| o.id == order_id);
        if !removed {
            panic!(
                "INVARIANT: order {} present in index but missing from its heap",
                order_id
            );
        }
        true
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.index.get(&order_id).cloned()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.peek().and_then(|o| o.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.peek().and_then(|o| o.price)
    }

    pub fn bids_snapshot(&self) -> Vec<Order> {
        self.bids.snapshot()
    }

    pub fn asks_snapshot(&self) -> Vec<Order> {
        self.asks.snapshot()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Invariant I1: every order in a heap is also in the index and vice
    /// versa. Only ever false on a bug.
    pub fn check_invariants(&self) -> bool {
        self.bids.len() + self.asks.len() == self.index.len()
    }

    /// Runs the crossing loop until no crossing pair remains, emitting a
    /// `Trade` per match. `now` stamps the trades (supplied by the caller's
    /// clock collaborator, not tracked by the book itself).
    pub fn match_orders(&mut self, now: i64) -> Vec<Trade> {
        let mut trades = Vec::new();

        loop {
            let trade_price = {
                let (Some(bid), Some(ask)) = (self.bids.peek(), self.asks.peek()) else {
                    break;
                };
                if bid.is_market() && ask.is_market() {
                    // No reference price available from the book alone;
                    // this combination does not occur in practice.
                    break;
                }
                let crosses = bid.is_market()
                    || ask.is_market()
                    || bid.price.unwrap() >= ask.price.unwrap();
                if !crosses {
                    break;
                }
                if bid.is_market() {
                    ask.price.unwrap()
                } else if ask.is_market() {
                    bid.price.unwrap()
                } else {
                    // Ask privileged by convention for two crossing limits.
                    ask.price.unwrap()
                }
            };

            let mut bid = self.bids.pop().expect("peeked bid must still be present");
            let mut ask = self.asks.pop().expect("peeked ask must still be present");

            let trade_qty = bid.quantity.min(ask.quantity);
            let trade_id = self.next_trade_id;
            self.next_trade_id += 1;

            trades.push(Trade {
                id: trade_id,
                buy_order_id: bid.id,
                sell_order_id: ask.id,
                item_id: self.item_id.clone(),
                quantity: trade_qty,
                price: trade_price,
                timestamp: now,
            });

            bid.quantity -= trade_qty;
            ask.quantity -= trade_qty;
            self.settle_side(bid);
            self.settle_side(ask);
        }

        trades
    }

    fn settle_side(&mut self, mut order: Order) {
        if order.quantity <= QTY_EPSILON {
            order.status = OrderStatus::Filled;
            self.index.remove(&order.id);
        } else {
            order.status = OrderStatus::Partial;
            self.index.insert(order.id, order.clone());
            self.heap_mut(order.side).push(order);
        }
    }
}
