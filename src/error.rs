//! Error taxonomy for the matching/pricing engine.
//!
//! Every kind here is surfaced as a tagged value to callers; none of them
//! represent an unrecoverable process termination except `Invariant`, which
//! is only ever reachable from a bug and is caught at the worker boundary.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("no worker for item {0}")]
    NoWorker(String),

    #[error("worker for item {0} is unavailable")]
    WorkerUnavailable(String),

    #[error("request to worker for item {0} timed out")]
    Timeout(String),

    #[error("task queue is full")]
    Backpressure,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: f64, required: f64 },

    #[error("insufficient inventory of {item_id}: have {have}, required {required}")]
    InsufficientInventory {
        item_id: String,
        have: f64,
        required: f64,
    },

    #[error("unknown order {0}")]
    UnknownOrder(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
