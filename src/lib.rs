//! Per-instrument matching and pricing engine: a priority-queue order book
//! with price-time priority (C1/C2), a GBM price simulator driven by
//! order-flow pressure (C3), a per-item account ledger (C4), an actor-per-item
//! market worker (C5) behind a dispatcher (C6), a tick coordinator and update
//! bus (C7), and a dispatch façade (C8) tying the rest together.
//!
//! HTTP/WebSocket transport, durable session storage, and persistence are
//! external collaborators — this crate exposes plain async functions and
//! channels for such a layer to call, not a server.

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod market;
pub mod session;
pub mod worker;

pub use config::Config;
pub use coordinator::{MarketUpdate, MarketUpdateKind, StatsSnapshot, TickCoordinator};
pub use dispatcher::{Dispatcher, OrderBookSnapshot, TickOutcome};
pub use error::{EngineError, EngineResult};
pub use facade::{EngineHandle, SubmitOrderRequest};
pub use market::{AccountSnapshot, Order, OrderId, OrderKind, OrderStatus, Side, Trade, TradeId};
pub use session::{ItemId, PlayerId, SessionId};
pub use worker::MarketSnapshot;
