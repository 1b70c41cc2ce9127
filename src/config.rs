//! Engine configuration, loaded from the environment.
//!
//! Mirrors the `Config::from_env` pattern of the original application:
//! `dotenv` is loaded first, every field has a documented default, and
//! parse failures fall back to the default rather than erroring out.

#[derive(Debug, Clone)]
pub struct Config {
    /// Period of the tick loop, in milliseconds.
    pub tick_interval_ms: u64,
    /// Bound on the tick coordinator's task queue.
    pub queue_capacity: usize,
    /// Number of runner tasks draining the task queue.
    pub worker_pool_size: usize,
    /// Per-task retry budget before giving up.
    pub max_retries: u32,
    /// Base retry delay, doubled per attempt up to a cap.
    pub retry_delay_ms: u64,
    /// GBM drift (mu).
    pub drift: f64,
    /// GBM volatility (sigma).
    pub volatility: f64,
    /// Time step per tick, in years.
    pub dt: f64,
    /// Pressure adjustment base multiplier.
    pub base_adjustment: f64,
    /// Pressure scaling factor.
    pub pressure_factor: f64,
    /// Order-flow accumulation window, in milliseconds.
    pub time_window_ms: i64,
    /// Starting balance granted to a new session.
    pub starting_balance: f64,
    /// Hard lower bound on instrument price.
    pub price_floor: f64,
    /// Per-request response budget before a worker is presumed crashed.
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            queue_capacity: 1000,
            worker_pool_size: 4,
            max_retries: 3,
            retry_delay_ms: 100,
            drift: 0.08,
            volatility: 0.2,
            dt: 1.0 / 252.0,
            base_adjustment: 0.01,
            pressure_factor: 1.0,
            time_window_ms: 60_000,
            starting_balance: 100_000.0,
            price_floor: 0.01,
            request_timeout_ms: 5_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("TICK_INTERVAL_MS") {
            if let Ok(v) = v.parse() {
                cfg.tick_interval_ms = v;
            }
        }
        if let Ok(v) = std::env::var("QUEUE_CAPACITY") {
            if let Ok(v) = v.parse() {
                cfg.queue_capacity = v;
            }
        }
        if let Ok(v) = std::env::var("WORKER_POOL_SIZE") {
            if let Ok(v) = v.parse() {
                cfg.worker_pool_size = v;
            }
        }
        if let Ok(v) = std::env::var("MAX_RETRIES") {
            if let Ok(v) = v.parse() {
                cfg.max_retries = v;
            }
        }
        if let Ok(v) = std::env::var("RETRY_DELAY_MS") {
            if let Ok(v) = v.parse() {
                cfg.retry_delay_ms = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_DRIFT") {
            if let Ok(v) = v.parse() {
                cfg.drift = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_VOLATILITY") {
            if let Ok(v) = v.parse() {
                cfg.volatility = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_DT") {
            if let Ok(v) = v.parse() {
                cfg.dt = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_BASE_ADJUSTMENT") {
            if let Ok(v) = v.parse() {
                cfg.base_adjustment = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_PRESSURE_FACTOR") {
            if let Ok(v) = v.parse() {
                cfg.pressure_factor = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_TIME_WINDOW_MS") {
            if let Ok(v) = v.parse() {
                cfg.time_window_ms = v;
            }
        }
        if let Ok(v) = std::env::var("STARTING_BALANCE") {
            if let Ok(v) = v.parse() {
                cfg.starting_balance = v;
            }
        }
        if let Ok(v) = std::env::var("PRICE_FLOOR") {
            if let Ok(v) = v.parse() {
                cfg.price_floor = v;
            }
        }

        cfg
    }

    /// Exponential backoff for worker restarts: `min(retry_delay_ms * 2^n, 10s)`.
    pub fn restart_backoff_ms(&self, crash_count: u32) -> u64 {
        let scaled = self.retry_delay_ms.saturating_mul(1u64 << crash_count.min(32));
        scaled.min(10_000)
    }
}
