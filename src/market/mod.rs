//! The per-instrument engine tier: the order book and matcher (C1/C2), the
//! GBM price simulator (C3), and the account ledger (C4). Everything here is
//! plain synchronous state owned by exactly one worker task.

pub mod book;
pub mod heap;
pub mod ledger;
pub mod order;
pub mod price_engine;

pub use book::OrderBook;
pub use ledger::{AccountLedger, AccountSnapshot, AccountState};
pub use order::{Order, OrderId, OrderKind, OrderStatus, Side, Trade, TradeId};
pub use price_engine::MarketState;
