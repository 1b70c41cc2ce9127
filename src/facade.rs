//! Dispatch façade (C8): the thin surface a session-facing layer (HTTP,
//! WebSocket, or a direct in-process caller) sits on top of. Every method
//! here is a handful of lines over the dispatcher — the only thing the
//! façade adds is the pre-flight validation of §4.8: a request that is
//! already known to fail (no session, insufficient balance or inventory) is
//! rejected before a worker's mailbox is ever touched.

use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::{MarketUpdate, StatsSnapshot, TickCoordinator};
use crate::dispatcher::{Dispatcher, OrderBookSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::market::{AccountSnapshot, OrderId, OrderKind, Side, Trade};
use crate::session::{ItemId, PlayerId, SessionId, SessionRegistry};
use crate::worker::{MarketSnapshot, SubmitRequest};

use tokio::sync::mpsc;

pub struct SubmitOrderRequest {
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub price: Option<f64>,
}

pub struct EngineHandle {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<TickCoordinator>,
    sessions: SessionRegistry,
}

impl EngineHandle {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new((*config).clone()));
        let coordinator = TickCoordinator::start(config.clone(), dispatcher.clone());
        Self {
            config,
            dispatcher,
            coordinator,
            sessions: SessionRegistry::new(),
        }
    }

    /// Spawns a worker for `item_id` if one does not already exist. Separate
    /// from session creation — items are a world-level concept, sessions a
    /// player-level one.
    pub fn ensure_item(&self, item_id: &ItemId, initial_price: f64) {
        self.dispatcher.spawn(item_id.as_str(), initial_price);
    }

    pub fn create_session(&self, initial_balance: f64) -> SessionId {
        let (session_id, _player_id) = self.sessions.create_session(initial_balance);
        session_id
    }

    fn player_for(&self, session_id: SessionId) -> EngineResult<PlayerId> {
        self.sessions
            .player_for(session_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown session {session_id}")))
    }

    pub async fn submit_order(
        &self,
        session_id: SessionId,
        item_id: &ItemId,
        request: SubmitOrderRequest,
    ) -> EngineResult<(OrderId, Vec<Trade>)> {
        let player_id = self.player_for(session_id)?;

        if request.quantity <= 0.0 {
            return Err(EngineError::Validation("quantity must be positive".into()));
        }
        if matches!(request.kind, OrderKind::Limit) && request.price.map_or(true, |p| p <= 0.0) {
            return Err(EngineError::Validation(
                "a limit order requires a positive price".into(),
            ));
        }

        self.preflight(item_id, &player_id, &request).await?;

        self.dispatcher
            .submit(
                item_id.as_str(),
                SubmitRequest {
                    player_id: player_id.to_string(),
                    side: request.side,
                    kind: request.kind,
                    quantity: request.quantity,
                    price: request.price,
                },
            )
            .await
    }

    /// Checks the player can plausibly afford this order before it ever
    /// reaches the owning worker's mailbox. The worker still re-checks (and
    /// is the sole authority) when it actually reserves funds — the market
    /// price may have moved between this read and that reservation — so
    /// this is a fast rejection path, not a substitute for the worker's own
    /// check.
    async fn preflight(
        &self,
        item_id: &ItemId,
        player_id: &PlayerId,
        request: &SubmitOrderRequest,
    ) -> EngineResult<()> {
        let account = self
            .dispatcher
            .get_account(item_id.as_str(), &player_id.to_string())
            .await?;

        match request.side {
            Side::Buy => {
                let unit_price = match request.price {
                    Some(price) => price,
                    None => {
                        let market = self.dispatcher.get_market(item_id.as_str()).await?;
                        market.current_price
                    }
                };
                let required = unit_price * request.quantity;
                if account.balance < required {
                    return Err(EngineError::InsufficientFunds {
                        balance: account.balance,
                        required,
                    });
                }
            }
            Side::Sell => {
                let have = account.inventory.get(item_id.as_str()).copied().unwrap_or(0.0);
                if have < request.quantity {
                    return Err(EngineError::InsufficientInventory {
                        item_id: item_id.to_string(),
                        have,
                        required: request.quantity,
                    });
                }
            }
        }
        Ok(())
    }

    pub async fn cancel_order(&self, item_id: &ItemId, order_id: OrderId) -> EngineResult<()> {
        self.dispatcher.cancel(item_id.as_str(), order_id).await
    }

    pub async fn get_order_book(&self, item_id: &ItemId) -> EngineResult<OrderBookSnapshot> {
        self.dispatcher.get_order_book(item_id.as_str()).await
    }

    pub async fn get_market(&self, item_id: &ItemId) -> EngineResult<MarketSnapshot> {
        self.dispatcher.get_market(item_id.as_str()).await
    }

    pub async fn get_account(
        &self,
        session_id: SessionId,
        item_id: &ItemId,
    ) -> EngineResult<AccountSnapshot> {
        let player_id = self.player_for(session_id)?;
        self.dispatcher
            .get_account(item_id.as_str(), &player_id.to_string())
            .await
    }

    /// Subscribes to the engine-wide update bus. Not scoped to one item —
    /// callers filter by `MarketUpdate::item_id` themselves, matching the
    /// coordinator's own fan-out model.
    pub fn subscribe_market(&self) -> mpsc::Receiver<MarketUpdate> {
        self.coordinator.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats_snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn shutdown(&self) {
        self.coordinator.shutdown();
        self.dispatcher.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            tick_interval_ms: 10,
            worker_pool_size: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn submit_order_rejects_unknown_session() {
        let engine = EngineHandle::new(test_config());
        let item_id = ItemId::new("BTC");
        engine.ensure_item(&item_id, 50_000.0);

        let bogus = SessionId(uuid::Uuid::new_v4());
        let err = engine
            .submit_order(
                bogus,
                &item_id,
                SubmitOrderRequest {
                    side: Side::Buy,
                    kind: OrderKind::Limit,
                    quantity: 1.0,
                    price: Some(100.0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn submit_order_rejects_insufficient_funds_before_touching_worker() {
        let engine = EngineHandle::new(test_config());
        let item_id = ItemId::new("BTC");
        engine.ensure_item(&item_id, 50_000.0);
        let session_id = engine.create_session(100.0);

        let err = engine
            .submit_order(
                session_id,
                &item_id,
                SubmitOrderRequest {
                    side: Side::Buy,
                    kind: OrderKind::Limit,
                    quantity: 10.0,
                    price: Some(50_000.0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn submit_order_rejects_insufficient_inventory() {
        let engine = EngineHandle::new(test_config());
        let item_id = ItemId::new("BTC");
        engine.ensure_item(&item_id, 50_000.0);
        let session_id = engine.create_session(1_000_000.0);

        let err = engine
            .submit_order(
                session_id,
                &item_id,
                SubmitOrderRequest {
                    side: Side::Sell,
                    kind: OrderKind::Limit,
                    quantity: 5.0,
                    price: Some(50_000.0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientInventory { .. }));
    }

    #[tokio::test]
    async fn submit_order_succeeds_when_affordable() {
        let engine = EngineHandle::new(test_config());
        let item_id = ItemId::new("BTC");
        engine.ensure_item(&item_id, 50_000.0);
        let session_id = engine.create_session(200_000.0);

        let (order_id, trades) = engine
            .submit_order(
                session_id,
                &item_id,
                SubmitOrderRequest {
                    side: Side::Buy,
                    kind: OrderKind::Limit,
                    quantity: 1.0,
                    price: Some(49_900.0),
                },
            )
            .await
            .unwrap();
        assert!(order_id > 0);
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn get_account_reflects_reservation_after_submit() {
        let config = test_config();
        let starting_balance = config.starting_balance;
        let engine = EngineHandle::new(config);
        let item_id = ItemId::new("BTC");
        engine.ensure_item(&item_id, 50_000.0);
        // The session's requested balance is not wired into worker-side
        // account creation (see DESIGN.md) — the account a player gets on
        // first touching an item comes from the engine-wide starting
        // balance regardless of what was requested at session creation.
        let session_id = engine.create_session(200_000.0);

        engine
            .submit_order(
                session_id,
                &item_id,
                SubmitOrderRequest {
                    side: Side::Buy,
                    kind: OrderKind::Limit,
                    quantity: 1.0,
                    price: Some(49_900.0),
                },
            )
            .await
            .unwrap();

        let account = engine.get_account(session_id, &item_id).await.unwrap();
        assert_eq!(account.balance, starting_balance - 49_900.0);
    }
}
