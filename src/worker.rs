//! The market worker (C5): an actor that owns exactly one order book, one
//! price engine, and the account ledger slice for players who have traded
//! this item. It serves a tagged request/response protocol over a mailbox
//! and never suspends mid-request — each handler is a synchronous step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::collaborators::{Clock, Rng01, StdRng01};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::market::{
    AccountLedger, AccountSnapshot, MarketState, Order, OrderBook, OrderId, OrderKind, Side, Trade,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub player_id: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub price: Option<f64>,
}

pub enum WorkerCommand {
    Submit(SubmitRequest),
    Cancel(OrderId),
    GetOrderBook,
    GetAccount(String),
    GetMarket,
    Tick,
    /// Fault-injection hook used by the crash/restart test scenario — there
    /// is no real external trigger for a worker panic, so the harness needs
    /// a deterministic way to force one.
    SimulateCrash,
    /// Test seam: credits `player_id`'s inventory for this item directly.
    /// In production, inventory only ever arrives via a settled buy-side
    /// trade (`WorkerCore::tick`); this lets a scenario start a seller with
    /// holdings without first routing them through a buy-and-settle cycle.
    #[doc(hidden)]
    GrantInventory { player_id: String, quantity: f64 },
    Stop,
}

pub enum WorkerResponse {
    Acknowledged,
    OrderSubmitted {
        order_id: OrderId,
        trades: Vec<Trade>,
    },
    OrderCancelled {
        order_id: OrderId,
    },
    OrderBookSnapshot {
        bids: Vec<Order>,
        asks: Vec<Order>,
    },
    Account(AccountSnapshot),
    Market(MarketSnapshot),
    TickCompleted {
        trades: Vec<Trade>,
        current_price: f64,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    },
}

struct Envelope {
    command: WorkerCommand,
    reply: oneshot::Sender<EngineResult<WorkerResponse>>,
}

#[derive(Debug, Default)]
struct WorkerRuntime {
    status: Option<WorkerStatus>,
    crash_count: u32,
    last_crash_time: i64,
}

/// Handle held by the dispatcher: a mailbox plus the shared runtime status
/// the dispatcher consults before forwarding a request.
pub struct WorkerHandle {
    pub item_id: String,
    sender: mpsc::Sender<Envelope>,
    runtime: Arc<RwLock<WorkerRuntime>>,
    config: Arc<Config>,
}

impl WorkerHandle {
    pub fn status(&self) -> WorkerStatus {
        self.runtime.read().status.unwrap_or(WorkerStatus::Starting)
    }

    pub fn crash_count(&self) -> u32 {
        self.runtime.read().crash_count
    }

    /// Routes `command` to the worker, honoring the per-request timeout
    /// budget and the `Crashed`/`Stopping` precheck.
    pub async fn request(&self, command: WorkerCommand) -> EngineResult<WorkerResponse> {
        match self.status() {
            WorkerStatus::Crashed => return Err(EngineError::WorkerUnavailable(self.item_id.clone())),
            WorkerStatus::Stopping | WorkerStatus::Stopped => {
                return Err(EngineError::WorkerUnavailable(self.item_id.clone()))
            }
            WorkerStatus::Starting | WorkerStatus::Running => {}
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            command,
            reply: reply_tx,
        };
        if self.sender.send(envelope).await.is_err() {
            return Err(EngineError::WorkerUnavailable(self.item_id.clone()));
        }

        match tokio::time::timeout(
            Duration::from_millis(self.config.request_timeout_ms),
            reply_rx,
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(EngineError::WorkerUnavailable(self.item_id.clone())),
            Err(_) => {
                // The handler may genuinely be stuck; mark the worker
                // crashed so the dispatcher's restart policy kicks in, then
                // schedule the same backoff-driven recovery the panic path
                // uses rather than leaving it unroutable forever.
                let crash_count = {
                    let mut rt = self.runtime.write();
                    rt.status = Some(WorkerStatus::Crashed);
                    rt.crash_count += 1;
                    rt.crash_count
                };
                let backoff_ms = self.config.restart_backoff_ms(crash_count);
                warn!(
                    item_id = %self.item_id,
                    crash_count,
                    backoff_ms,
                    "request timed out; worker presumed crashed, scheduling recovery"
                );

                let runtime = self.runtime.clone();
                let item_id = self.item_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    runtime.write().status = Some(WorkerStatus::Running);
                    info!(item_id = %item_id, "worker marked running again after timeout backoff");
                });

                Err(EngineError::Timeout(self.item_id.clone()))
            }
        }
    }

    /// Gracefully stops the worker, awaiting its acknowledgement.
    pub async fn stop(&self) {
        let _ = self.request(WorkerCommand::Stop).await;
    }
}

/// The synchronous state a worker task owns: book, price engine, ledger, and
/// the bookkeeping needed to settle trades and refund cancellations.
struct WorkerCore {
    item_id: String,
    book: OrderBook,
    engine: MarketState,
    ledger: AccountLedger,
    next_order_id: OrderId,
    order_owners: HashMap<OrderId, String>,
    // Per-unit price reserved at submission for buy orders, needed to refund
    // the correct amount on cancel (market orders don't carry a price field).
    reserved_unit_price: HashMap<OrderId, f64>,
}

impl WorkerCore {
    fn new(item_id: String, initial_price: f64, config: &Config) -> Self {
        let engine = MarketState::new(
            item_id.clone(),
            initial_price,
            config.drift,
            config.volatility,
            config.dt,
            config.base_adjustment,
            config.pressure_factor,
            config.time_window_ms,
            config.price_floor,
        );
        Self {
            item_id: item_id.clone(),
            book: OrderBook::new(item_id),
            engine,
            ledger: AccountLedger::new(config.starting_balance),
            next_order_id: 1,
            order_owners: HashMap::new(),
            reserved_unit_price: HashMap::new(),
        }
    }

    fn handle(
        &mut self,
        command: WorkerCommand,
        clock: &dyn Clock,
        rng: &mut dyn Rng01,
    ) -> EngineResult<WorkerResponse> {
        match command {
            WorkerCommand::Submit(req) => self.submit(req, clock),
            WorkerCommand::Cancel(order_id) => self.cancel(order_id),
            WorkerCommand::GetOrderBook => Ok(WorkerResponse::OrderBookSnapshot {
                bids: self.book.bids_snapshot(),
                asks: self.book.asks_snapshot(),
            }),
            WorkerCommand::GetAccount(player_id) => {
                let snapshot = self
                    .ledger
                    .get(&player_id)
                    .map(|acct| acct.snapshot())
                    .unwrap_or_else(|| AccountSnapshot {
                        balance: self.ledger.starting_balance(),
                        inventory: HashMap::new(),
                    });
                Ok(WorkerResponse::Account(snapshot))
            }
            WorkerCommand::GetMarket => Ok(WorkerResponse::Market(MarketSnapshot {
                current_price: self.engine.current_price,
                best_bid: self.book.best_bid(),
                best_ask: self.book.best_ask(),
            })),
            WorkerCommand::Tick => self.tick(clock, rng),
            WorkerCommand::SimulateCrash => {
                panic!("INVARIANT: simulated worker fault");
            }
            WorkerCommand::GrantInventory { player_id, quantity } => {
                self.ledger
                    .get_or_create(&player_id)
                    .adjust_inventory(&self.item_id, quantity)?;
                Ok(WorkerResponse::Acknowledged)
            }
            WorkerCommand::Stop => Ok(WorkerResponse::Acknowledged),
        }
    }

    fn submit(&mut self, req: SubmitRequest, clock: &dyn Clock) -> EngineResult<WorkerResponse> {
        if req.quantity <= 0.0 {
            return Err(EngineError::Validation("quantity must be positive".into()));
        }
        let unit_price = match req.kind {
            OrderKind::Limit => match req.price {
                Some(p) if p > 0.0 => p,
                _ => {
                    return Err(EngineError::Validation(
                        "limit order requires a positive price".into(),
                    ))
                }
            },
            OrderKind::Market => self.engine.current_price,
        };

        match req.side {
            Side::Buy => {
                self.ledger
                    .get_or_create(&req.player_id)
                    .adjust_balance(-(unit_price * req.quantity))?;
            }
            Side::Sell => {
                self.ledger
                    .get_or_create(&req.player_id)
                    .adjust_inventory(&self.item_id, -req.quantity)?;
            }
        }

        let order_id = self.next_order_id;
        self.next_order_id += 1;
        let now = clock.now_ms();
        let price = match req.kind {
            OrderKind::Limit => req.price,
            OrderKind::Market => None,
        };
        let order = Order::new(
            order_id,
            req.player_id.clone(),
            self.item_id.clone(),
            req.side,
            req.kind,
            req.quantity,
            price,
            now,
        );

        if let Err(e) = self.book.add(order) {
            // Defensive: refund the reservation if the book unexpectedly
            // rejects a validated order, leaving the ledger consistent.
            match req.side {
                Side::Buy => {
                    let _ = self
                        .ledger
                        .get_or_create(&req.player_id)
                        .adjust_balance(unit_price * req.quantity);
                }
                Side::Sell => {
                    let _ = self
                        .ledger
                        .get_or_create(&req.player_id)
                        .adjust_inventory(&self.item_id, req.quantity);
                }
            }
            return Err(e);
        }

        self.order_owners.insert(order_id, req.player_id);
        if matches!(req.side, Side::Buy) {
            self.reserved_unit_price.insert(order_id, unit_price);
        }
        self.engine.record_order(req.side, req.quantity, now);

        Ok(WorkerResponse::OrderSubmitted {
            order_id,
            trades: Vec::new(),
        })
    }

    fn cancel(&mut self, order_id: OrderId) -> EngineResult<WorkerResponse> {
        let Some(order) = self.book.get(order_id) else {
            return Err(EngineError::UnknownOrder(order_id.to_string()));
        };
        self.book.remove(order_id);
        let player = self
            .order_owners
            .remove(&order_id)
            .unwrap_or(order.player_id.clone());

        match order.side {
            Side::Buy => {
                let unit_price = self
                    .reserved_unit_price
                    .remove(&order_id)
                    .unwrap_or_else(|| order.price.unwrap_or(self.engine.current_price));
                let _ = self
                    .ledger
                    .get_or_create(&player)
                    .adjust_balance(unit_price * order.quantity);
            }
            Side::Sell => {
                let _ = self
                    .ledger
                    .get_or_create(&player)
                    .adjust_inventory(&self.item_id, order.quantity);
            }
        }

        Ok(WorkerResponse::OrderCancelled { order_id })
    }

    fn tick(&mut self, clock: &dyn Clock, rng: &mut dyn Rng01) -> EngineResult<WorkerResponse> {
        let now = clock.now_ms();
        let current_price = self.engine.step(rng, now);
        let trades = self.book.match_orders(now);

        for trade in &trades {
            if let Some(buyer) = self.order_owners.get(&trade.buy_order_id).cloned() {
                self.ledger
                    .get_or_create(&buyer)
                    .adjust_inventory(&self.item_id, trade.quantity)
                    .expect("crediting inventory never fails");
            }
            if let Some(seller) = self.order_owners.get(&trade.sell_order_id).cloned() {
                self.ledger
                    .get_or_create(&seller)
                    .adjust_balance(trade.quantity * trade.price)
                    .expect("crediting balance never fails");
            }
        }

        let touched: HashSet<OrderId> = trades
            .iter()
            .flat_map(|t| [t.buy_order_id, t.sell_order_id])
            .collect();
        for id in touched {
            if self.book.get(id).is_none() {
                self.order_owners.remove(&id);
                self.reserved_unit_price.remove(&id);
            }
        }

        Ok(WorkerResponse::TickCompleted {
            trades,
            current_price,
            best_bid: self.book.best_bid(),
            best_ask: self.book.best_ask(),
        })
    }
}

/// Spawns a worker task for `item_id`, blocking (within the async context)
/// until it has initialized — by the time this returns, the worker is
/// guaranteed `Running` and safe to route requests to.
pub fn spawn_worker(item_id: String, initial_price: f64, config: Arc<Config>) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(128);
    let runtime = Arc::new(RwLock::new(WorkerRuntime {
        status: Some(WorkerStatus::Starting),
        crash_count: 0,
        last_crash_time: 0,
    }));
    let runtime_for_task = runtime.clone();
    let handle_config = config.clone();

    tokio::spawn(run_worker(
        item_id.clone(),
        initial_price,
        config,
        rx,
        runtime_for_task,
    ));

    WorkerHandle {
        item_id,
        sender: tx,
        runtime,
        config: handle_config,
    }
}

async fn run_worker(
    item_id: String,
    initial_price: f64,
    config: Arc<Config>,
    mut rx: mpsc::Receiver<Envelope>,
    runtime: Arc<RwLock<WorkerRuntime>>,
) {
    let clock = crate::collaborators::SystemClock;
    let mut rng = StdRng01::from_entropy();
    let mut core = WorkerCore::new(item_id, initial_price, &config);

    runtime.write().status = Some(WorkerStatus::Running);
    debug!(item_id = %core.item_id, "worker running");

    while let Some(envelope) = rx.recv().await {
        let Envelope { command, reply } = envelope;

        if matches!(command, WorkerCommand::Stop) {
            runtime.write().status = Some(WorkerStatus::Stopping);
            let _ = reply.send(Ok(WorkerResponse::Acknowledged));
            break;
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            core.handle(command, &clock, &mut rng)
        }));

        match outcome {
            Ok(response) => {
                let _ = reply.send(response);
            }
            Err(_) => {
                let backoff_ms = {
                    let mut rt = runtime.write();
                    rt.status = Some(WorkerStatus::Crashed);
                    rt.crash_count += 1;
                    rt.last_crash_time = clock.now_ms();
                    config.restart_backoff_ms(rt.crash_count)
                };
                error!(
                    item_id = %core.item_id,
                    crash_count = runtime.read().crash_count,
                    backoff_ms,
                    "worker panicked, entering backoff"
                );
                let _ = reply.send(Err(EngineError::WorkerUnavailable(core.item_id.clone())));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                runtime.write().status = Some(WorkerStatus::Running);
                info!(item_id = %core.item_id, "worker recovered after panic backoff");
            }
        }
    }

    runtime.write().status = Some(WorkerStatus::Stopped);
    debug!(item_id = %core.item_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            request_timeout_ms: 200,
            retry_delay_ms: 10,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn submit_reserves_and_cancel_refunds() {
        let handle = spawn_worker("BTC".into(), 50000.0, test_config());

        let resp = handle
            .request(WorkerCommand::Submit(SubmitRequest {
                player_id: "alice".into(),
                side: Side::Buy,
                kind: OrderKind::Limit,
                quantity: 5.0,
                price: Some(100.0),
            }))
            .await
            .unwrap();
        let order_id = match resp {
            WorkerResponse::OrderSubmitted { order_id, .. } => order_id,
            _ => panic!("expected OrderSubmitted"),
        };

        let resp = handle
            .request(WorkerCommand::Cancel(order_id))
            .await
            .unwrap();
        assert!(matches!(resp, WorkerResponse::OrderCancelled { .. }));
    }

    #[tokio::test]
    async fn cancel_unknown_order_fails() {
        let handle = spawn_worker("BTC".into(), 50000.0, test_config());
        let err = handle.request(WorkerCommand::Cancel(999)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownOrder(_)));
    }

    #[tokio::test]
    async fn tick_matches_resting_orders_and_settles_ledgers() {
        let handle = spawn_worker("BTC".into(), 50000.0, test_config());

        handle
            .request(WorkerCommand::Submit(SubmitRequest {
                player_id: "alice".into(),
                side: Side::Buy,
                kind: OrderKind::Limit,
                quantity: 1.5,
                price: Some(50000.0),
            }))
            .await
            .unwrap();
        // Selling requires holding the inventory first — grant bob 1.5 BTC
        // the way a prior buy-and-settle cycle would have.
        handle
            .request(WorkerCommand::GrantInventory {
                player_id: "bob".into(),
                quantity: 1.5,
            })
            .await
            .unwrap();
        handle
            .request(WorkerCommand::Submit(SubmitRequest {
                player_id: "bob".into(),
                side: Side::Sell,
                kind: OrderKind::Limit,
                quantity: 1.5,
                price: Some(49900.0),
            }))
            .await
            .unwrap();

        let resp = handle.request(WorkerCommand::Tick).await.unwrap();
        match resp {
            WorkerResponse::TickCompleted { trades, .. } => {
                assert_eq!(trades.len(), 1);
                assert_eq!(trades[0].price, 49900.0);
            }
            _ => panic!("expected TickCompleted"),
        }
    }

    #[tokio::test]
    async fn crash_marks_unavailable_then_recovers() {
        let handle = spawn_worker("BTC".into(), 50000.0, test_config());

        let err = handle
            .request(WorkerCommand::SimulateCrash)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkerUnavailable(_)));

        // Immediately after, the worker is in backoff and unavailable.
        tokio::time::sleep(Duration::from_millis(5)).await;

        // After the backoff window it recovers and serves requests again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let resp = handle.request(WorkerCommand::GetOrderBook).await.unwrap();
        assert!(matches!(resp, WorkerResponse::OrderBookSnapshot { .. }));
        assert_eq!(handle.crash_count(), 1);
    }
}
