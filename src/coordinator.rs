//! Tick coordinator and update bus (C7): drives the periodic `MarketTick`
//! for every active item, drains a bounded task queue with a fixed pool of
//! runner tasks, and fans fills and price moves out to subscribers over a
//! broadcast channel.
//!
//! The task queue accepts two kinds of work: `ProcessOrder`, an async
//! submission path that replies via a oneshot, and `MarketTick`, enqueued by
//! the timer loop. Both drain through the same runner pool. The timer loop
//! never blocks on a full queue — it prefers to drop its own enqueue attempt
//! over stalling the tick cadence for every other item.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::collaborators::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::market::{OrderId, Trade};
use crate::worker::SubmitRequest;

const UPDATE_BUS_CAPACITY: usize = 1024;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketUpdateKind {
    Init,
    Price,
    Trade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub kind: MarketUpdateKind,
    pub item_id: String,
    pub current_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LastKnown {
    current_price: f64,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    timestamp: i64,
}

enum Task {
    ProcessOrder {
        item_id: String,
        request: SubmitRequest,
        reply: oneshot::Sender<EngineResult<(OrderId, Vec<Trade>)>>,
    },
    MarketTick(String),
}

#[derive(Debug, Default)]
struct Stats {
    orders_processed: AtomicU64,
    trades_matched: AtomicU64,
    updates_broadcast: AtomicU64,
    dropped_updates: AtomicU64,
    last_tick_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub orders_processed: u64,
    pub trades_matched: u64,
    pub updates_broadcast: u64,
    pub dropped_updates: u64,
    pub active_workers: usize,
    pub workers_restarted: u64,
    pub uptime_ms: i64,
    pub last_tick_ms: i64,
}

/// Owns the task queue, the runner pool, the tick timer, and the update bus.
/// Constructed once per running engine via [`TickCoordinator::start`].
pub struct TickCoordinator {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    queue_tx: mpsc::Sender<Task>,
    bus: broadcast::Sender<MarketUpdate>,
    stats: Arc<Stats>,
    last_known: RwLock<HashMap<String, LastKnown>>,
    start_time_ms: i64,
    shutdown: AtomicBool,
}

impl TickCoordinator {
    /// Spawns the runner pool and the tick timer and returns a handle shared
    /// by every caller of `submit_order_async` / `subscribe`.
    pub fn start(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::start_with_clock(config, dispatcher, clock)
    }

    pub fn start_with_clock(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (bus_tx, _) = broadcast::channel(UPDATE_BUS_CAPACITY);

        let coordinator = Arc::new(Self {
            start_time_ms: clock.now_ms(),
            config: config.clone(),
            dispatcher,
            clock,
            queue_tx,
            bus: bus_tx,
            stats: Arc::new(Stats::default()),
            last_known: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });

        info!(
            tick_interval_ms = config.tick_interval_ms,
            worker_pool_size = config.worker_pool_size,
            queue_capacity = config.queue_capacity,
            "tick coordinator starting"
        );

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        for _ in 0..config.worker_pool_size {
            let coordinator = coordinator.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move { coordinator.run_task_loop(queue_rx).await });
        }

        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_tick_timer().await });
        }

        coordinator
    }

    async fn run_task_loop(self: Arc<Self>, queue_rx: Arc<Mutex<mpsc::Receiver<Task>>>) {
        loop {
            let task = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };
            match task {
                Some(task) => self.process_task(task).await,
                None => break,
            }
        }
    }

    async fn process_task(&self, task: Task) {
        match task {
            Task::ProcessOrder {
                item_id,
                request,
                reply,
            } => {
                let result = self.dispatcher.submit(&item_id, request).await;
                if result.is_ok() {
                    self.stats.orders_processed.fetch_add(1, Ordering::Relaxed);
                }
                let _ = reply.send(result);
            }
            Task::MarketTick(item_id) => self.run_tick_for(&item_id).await,
        }
    }

    async fn run_tick_for(&self, item_id: &str) {
        let outcome = match self.dispatcher.tick(item_id).await {
            Ok(outcome) => outcome,
            // The worker is crashed, stopped, or mid-backoff — skip this
            // tick, the next timer firing will try again.
            Err(err) => {
                debug!(item_id, error = %err, "tick skipped, worker unavailable");
                return;
            }
        };

        let now = self.clock.now_ms();
        self.stats.last_tick_ms.store(now, Ordering::Relaxed);
        self.stats
            .trades_matched
            .fetch_add(outcome.trades.len() as u64, Ordering::Relaxed);

        let known = LastKnown {
            current_price: outcome.current_price,
            best_bid: outcome.best_bid,
            best_ask: outcome.best_ask,
            timestamp: now,
        };
        self.last_known.write().insert(item_id.to_string(), known);

        self.publish(self.update_from(item_id, &known, MarketUpdateKind::Price));
        if !outcome.trades.is_empty() {
            self.publish(self.update_from(item_id, &known, MarketUpdateKind::Trade));
        }
    }

    fn update_from(&self, item_id: &str, known: &LastKnown, kind: MarketUpdateKind) -> MarketUpdate {
        MarketUpdate {
            kind,
            item_id: item_id.to_string(),
            current_price: known.current_price,
            best_bid: known.best_bid,
            best_ask: known.best_ask,
            timestamp: known.timestamp,
        }
    }

    fn publish(&self, update: MarketUpdate) {
        // `send` errors only when there are no live receivers, which is not
        // a failure — nobody is listening right now.
        let _ = self.bus.send(update);
        self.stats.updates_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    async fn run_tick_timer(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        loop {
            interval.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            for item_id in self.dispatcher.item_ids() {
                if self
                    .queue_tx
                    .try_send(Task::MarketTick(item_id.clone()))
                    .is_err()
                {
                    debug!(item_id = %item_id, "task queue full, dropping this tick");
                }
            }
        }
    }

    /// Submits an order through the task queue rather than calling the
    /// dispatcher directly. Returns `Backpressure` immediately if the queue
    /// is full, rather than waiting for room.
    pub async fn submit_order_async(
        &self,
        item_id: &str,
        request: SubmitRequest,
    ) -> EngineResult<(OrderId, Vec<Trade>)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue_tx
            .try_send(Task::ProcessOrder {
                item_id: item_id.to_string(),
                request,
                reply: reply_tx,
            })
            .map_err(|_| {
                warn!(item_id, "task queue full, rejecting submit with backpressure");
                EngineError::Backpressure
            })?;
        reply_rx
            .await
            .map_err(|_| EngineError::WorkerUnavailable(item_id.to_string()))?
    }

    /// Subscribes to the update bus. The returned receiver first yields one
    /// `Init` event per item with known state at the moment of subscription,
    /// then every `Price`/`Trade` event published from here on. Dropping the
    /// receiver (or falling behind far enough to hit `Lagged`) ends the
    /// subscription; a lagged subscriber's skipped events count toward
    /// `dropped_updates` rather than being redelivered — the update bus is
    /// a feed of present tense, not a log.
    pub fn subscribe(self: &Arc<Self>) -> mpsc::Receiver<MarketUpdate> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        for (item_id, known) in self.last_known.read().iter() {
            let _ = tx.try_send(self.update_from(item_id, known, MarketUpdateKind::Init));
        }

        let mut broadcast_rx = self.bus.subscribe();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(update) => {
                        if tx.send(update).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        stats.dropped_updates.fetch_add(n, Ordering::Relaxed);
                        warn!(dropped = n, "subscriber lagged, dropping updates");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    /// A point-in-time read of engine-wide counters. `active_workers` and
    /// `workers_restarted` are derived from the dispatcher at call time
    /// rather than tracked redundantly here.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let item_ids = self.dispatcher.item_ids();
        let workers_restarted = item_ids
            .iter()
            .filter_map(|id| self.dispatcher.crash_count(id))
            .map(|c| c as u64)
            .sum();

        StatsSnapshot {
            orders_processed: self.stats.orders_processed.load(Ordering::Relaxed),
            trades_matched: self.stats.trades_matched.load(Ordering::Relaxed),
            updates_broadcast: self.stats.updates_broadcast.load(Ordering::Relaxed),
            dropped_updates: self.stats.dropped_updates.load(Ordering::Relaxed),
            active_workers: item_ids.len(),
            workers_restarted,
            uptime_ms: self.clock.now_ms() - self.start_time_ms,
            last_tick_ms: self.stats.last_tick_ms.load(Ordering::Relaxed),
        }
    }

    /// Stops the tick timer and runner pool from enqueueing or draining
    /// further work. Does not touch the dispatcher's workers.
    pub fn shutdown(&self) {
        info!("tick coordinator shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{OrderKind, Side};

    fn fast_config() -> Config {
        Config {
            tick_interval_ms: 5,
            queue_capacity: 8,
            worker_pool_size: 2,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn submit_order_async_routes_through_dispatcher() {
        let dispatcher = Arc::new(Dispatcher::new(fast_config()));
        dispatcher.spawn("BTC", 50_000.0);
        let coordinator = TickCoordinator::start(Arc::new(fast_config()), dispatcher.clone());

        let (order_id, trades) = coordinator
            .submit_order_async(
                "BTC",
                SubmitRequest {
                    player_id: "alice".into(),
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
    async fn submit_order_async_reports_backpressure_when_queue_is_full() {
        let config = Arc::new(Config {
            queue_capacity: 1,
            worker_pool_size: 0,
            ..Config::default()
        });
        let dispatcher = Arc::new(Dispatcher::new((*config).clone()));
        dispatcher.spawn("BTC", 100.0);
        let coordinator = TickCoordinator::start(config, dispatcher);

        let req = || SubmitRequest {
            player_id: "alice".into(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            quantity: 1.0,
            price: Some(10.0),
        };

        let (tx, _rx) = oneshot::channel();
        coordinator
            .queue_tx
            .try_send(Task::ProcessOrder {
                item_id: "BTC".into(),
                request: req(),
                reply: tx,
            })
            .unwrap();

        let err = coordinator.submit_order_async("BTC", req()).await.unwrap_err();
        assert!(matches!(err, EngineError::Backpressure));
    }

    #[tokio::test]
    async fn tick_timer_publishes_price_updates() {
        let dispatcher = Arc::new(Dispatcher::new(fast_config()));
        dispatcher.spawn("BTC", 50_000.0);
        let coordinator = TickCoordinator::start(Arc::new(fast_config()), dispatcher);

        let mut rx = coordinator.subscribe();
        let update = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timed out waiting for an update")
            .expect("bus closed");
        assert_eq!(update.item_id, "BTC");
    }

    #[tokio::test]
    async fn subscribe_emits_init_for_known_items_before_live_updates() {
        let dispatcher = Arc::new(Dispatcher::new(fast_config()));
        dispatcher.spawn("BTC", 50_000.0);
        let coordinator = TickCoordinator::start(Arc::new(fast_config()), dispatcher);

        // Let at least one tick land so BTC has known state.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = coordinator.subscribe();
        let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.kind, MarketUpdateKind::Init);
        assert_eq!(first.item_id, "BTC");
    }

    #[tokio::test]
    async fn stats_snapshot_reflects_activity() {
        let dispatcher = Arc::new(Dispatcher::new(fast_config()));
        dispatcher.spawn("BTC", 50_000.0);
        let coordinator = TickCoordinator::start(Arc::new(fast_config()), dispatcher);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = coordinator.stats_snapshot();
        assert_eq!(snap.active_workers, 1);
        assert!(snap.last_tick_ms > 0);
    }
}
