//! External collaborators the engine consumes but does not own: wall-clock
//! time and uniform randomness. Modeled as traits so production code can
//! inject real sources and tests can inject deterministic ones.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Clock: Send + Sync {
    /// Monotonic-ish wall time, in milliseconds.
    fn now_ms(&self) -> i64;
}

pub trait Rng01: Send + Sync {
    /// Uniform pseudo-random sample on the open interval (0, 1).
    fn uniform01(&mut self) -> f64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// `rand`-backed source, seedable for reproducible simulations.
pub struct StdRng01(StdRng);

impl StdRng01 {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn from_seed_u64(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl Rng01 for StdRng01 {
    fn uniform01(&mut self) -> f64 {
        // `gen::<f64>()` samples [0, 1); callers needing the open interval
        // (e.g. Box-Muller's log) redraw on the boundary themselves.
        self.0.gen::<f64>()
    }
}

#[cfg(test)]
pub struct FixedClock(pub std::sync::atomic::AtomicI64);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
pub struct SequenceRng01 {
    pub values: Vec<f64>,
    pub idx: usize,
}

#[cfg(test)]
impl Rng01 for SequenceRng01 {
    fn uniform01(&mut self) -> f64 {
        let v = self.values[self.idx % self.values.len()];
        self.idx += 1;
        v
    }
}
