//! Worker pool / dispatcher (C6): owns the item id → worker handle mapping
//! and routes every request by `item_id`. Misrouting is a programmer error,
//! never a runtime outcome.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::warn;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::market::{AccountSnapshot, Order, OrderId, Trade};
use crate::worker::{
    spawn_worker, MarketSnapshot, SubmitRequest, WorkerCommand, WorkerHandle, WorkerResponse,
};

pub struct OrderBookSnapshot {
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

pub struct TickOutcome {
    pub trades: Vec<Trade>,
    pub current_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

pub struct Dispatcher {
    config: Arc<Config>,
    workers: RwLock<HashMap<String, Arc<WorkerHandle>>>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: a second `spawn` for an item already present is a no-op.
    pub fn spawn(&self, item_id: &str, initial_price: f64) {
        let mut workers = self.workers.write();
        if workers.contains_key(item_id) {
            return;
        }
        let handle = spawn_worker(item_id.to_string(), initial_price, self.config.clone());
        workers.insert(item_id.to_string(), Arc::new(handle));
    }

    /// Gracefully stops and removes a single item's worker.
    pub async fn remove(&self, item_id: &str) {
        let handle = self.workers.write().remove(item_id);
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    fn handle_for(&self, item_id: &str) -> EngineResult<Arc<WorkerHandle>> {
        self.workers.read().get(item_id).cloned().ok_or_else(|| {
            warn!(item_id, "dispatch attempted for item with no worker");
            EngineError::NoWorker(item_id.to_string())
        })
    }

    /// Routes `command` to `item_id`'s worker, logging (and passing through)
    /// any failure the worker boundary reports — the one chokepoint every
    /// public method below funnels through.
    async fn dispatch(&self, item_id: &str, command: WorkerCommand) -> EngineResult<WorkerResponse> {
        let handle = self.handle_for(item_id)?;
        match handle.request(command).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(item_id, error = %err, "worker request failed");
                Err(err)
            }
        }
    }

    pub async fn submit(&self, item_id: &str, request: SubmitRequest) -> EngineResult<(OrderId, Vec<Trade>)> {
        match self.dispatch(item_id, WorkerCommand::Submit(request)).await? {
            WorkerResponse::OrderSubmitted { order_id, trades } => Ok((order_id, trades)),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for Submit".into(),
            )),
        }
    }

    pub async fn cancel(&self, item_id: &str, order_id: OrderId) -> EngineResult<()> {
        match self.dispatch(item_id, WorkerCommand::Cancel(order_id)).await? {
            WorkerResponse::OrderCancelled { .. } => Ok(()),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for Cancel".into(),
            )),
        }
    }

    pub async fn get_order_book(&self, item_id: &str) -> EngineResult<OrderBookSnapshot> {
        match self.dispatch(item_id, WorkerCommand::GetOrderBook).await? {
            WorkerResponse::OrderBookSnapshot { bids, asks } => Ok(OrderBookSnapshot { bids, asks }),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for GetOrderBook".into(),
            )),
        }
    }

    pub async fn get_account(&self, item_id: &str, player_id: &str) -> EngineResult<AccountSnapshot> {
        match self
            .dispatch(item_id, WorkerCommand::GetAccount(player_id.to_string()))
            .await?
        {
            WorkerResponse::Account(snapshot) => Ok(snapshot),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for GetAccount".into(),
            )),
        }
    }

    pub async fn get_market(&self, item_id: &str) -> EngineResult<MarketSnapshot> {
        match self.dispatch(item_id, WorkerCommand::GetMarket).await? {
            WorkerResponse::Market(snapshot) => Ok(snapshot),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for GetMarket".into(),
            )),
        }
    }

    pub async fn tick(&self, item_id: &str) -> EngineResult<TickOutcome> {
        match self.dispatch(item_id, WorkerCommand::Tick).await? {
            WorkerResponse::TickCompleted {
                trades,
                current_price,
                best_bid,
                best_ask,
            } => Ok(TickOutcome {
                trades,
                current_price,
                best_bid,
                best_ask,
            }),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for Tick".into(),
            )),
        }
    }

    /// Test seam: seeds `player_id`'s inventory for `item_id` directly, so a
    /// sell-side scenario can start a seller with holdings without first
    /// routing them through a buy-and-settle cycle.
    #[doc(hidden)]
    pub async fn grant_inventory(
        &self,
        item_id: &str,
        player_id: &str,
        quantity: f64,
    ) -> EngineResult<()> {
        match self
            .dispatch(
                item_id,
                WorkerCommand::GrantInventory {
                    player_id: player_id.to_string(),
                    quantity,
                },
            )
            .await?
        {
            WorkerResponse::Acknowledged => Ok(()),
            _ => Err(EngineError::Invariant(
                "worker returned the wrong response variant for GrantInventory".into(),
            )),
        }
    }

    /// Issues `Tick` to every worker in parallel. No ordering guarantee
    /// across workers beyond each worker's own sequential consistency.
    pub async fn tick_all(&self) -> HashMap<String, EngineResult<TickOutcome>> {
        let items: Vec<(String, Arc<WorkerHandle>)> = {
            let workers = self.workers.read();
            workers
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let futures = items.into_iter().map(|(item_id, handle)| async move {
            let result = match handle.request(WorkerCommand::Tick).await {
                Ok(WorkerResponse::TickCompleted {
                    trades,
                    current_price,
                    best_bid,
                    best_ask,
                }) => Ok(TickOutcome {
                    trades,
                    current_price,
                    best_bid,
                    best_ask,
                }),
                Ok(_) => Err(EngineError::Invariant(
                    "worker returned the wrong response variant for Tick".into(),
                )),
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "tick_all: worker tick failed");
                    Err(e)
                }
            };
            (item_id, result)
        });

        join_all(futures).await.into_iter().collect()
    }

    /// Fault-injection hook for crash/restart test scenarios — there is no
    /// real external trigger for a worker panic in production use.
    #[doc(hidden)]
    pub async fn simulate_crash(&self, item_id: &str) -> EngineResult<()> {
        let handle = self.handle_for(item_id)?;
        let _ = handle.request(WorkerCommand::SimulateCrash).await;
        Ok(())
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.workers.read().keys().cloned().collect()
    }

    pub fn crash_count(&self, item_id: &str) -> Option<u32> {
        self.workers.read().get(item_id).map(|h| h.crash_count())
    }

    /// Stops every worker, awaiting each.
    pub async fn stop(&self) {
        let handles: Vec<Arc<WorkerHandle>> = self.workers.write().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
    }
}
