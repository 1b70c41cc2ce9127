//! Geometric Brownian motion reference-price simulator with an order-flow
//! pressure adjustment.
//!
//! Each tick: draw a standard normal via Box-Muller, step the GBM price,
//! then nudge it by a bounded order-flow pressure term before clamping to
//! the price floor. The floor is a hard clamp, not a resample — a
//! catastrophic negative shock is silently capped, never retried.

use std::f64::consts::PI;

use crate::collaborators::Rng01;
use crate::market::order::Side;

fn box_muller(rng: &mut dyn Rng01) -> f64 {
    let mut u1 = rng.uniform01();
    while u1 <= 1e-5 {
        u1 = rng.uniform01();
    }
    let u2 = rng.uniform01();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

pub struct MarketState {
    pub item_id: String,
    pub current_price: f64,
    pub drift: f64,
    pub volatility: f64,
    pub dt: f64,
    pub base_adjustment: f64,
    pub pressure_factor: f64,
    pub time_window_ms: i64,
    pub price_floor: f64,
    buy_volume_accum: f64,
    sell_volume_accum: f64,
    order_arrival_times: Vec<i64>,
}

impl MarketState {
    pub fn new(
        item_id: impl Into<String>,
        initial_price: f64,
        drift: f64,
        volatility: f64,
        dt: f64,
        base_adjustment: f64,
        pressure_factor: f64,
        time_window_ms: i64,
        price_floor: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            current_price: initial_price.max(price_floor),
            drift,
            volatility,
            dt,
            base_adjustment,
            pressure_factor,
            time_window_ms,
            price_floor,
            buy_volume_accum: 0.0,
            sell_volume_accum: 0.0,
            order_arrival_times: Vec::new(),
        }
    }

    /// Records order flow for the pressure term; called by the worker on
    /// every submission (not just on tick).
    pub fn record_order(&mut self, side: Side, volume: f64, now_ms: i64) {
        self.order_arrival_times.push(now_ms);
        match side {
            Side::Buy => self.buy_volume_accum += volume,
            Side::Sell => self.sell_volume_accum += volume,
        }
    }

    fn pressure(&self) -> f64 {
        let denom = self.buy_volume_accum + self.sell_volume_accum;
        if denom == 0.0 {
            0.0
        } else {
            ((self.buy_volume_accum - self.sell_volume_accum) / denom).clamp(-1.0, 1.0)
        }
    }

    /// Advances the price by one tick and clears the flow accumulators and
    /// any arrival stamps that have aged out of the window.
    pub fn step(&mut self, rng: &mut dyn Rng01, now_ms: i64) -> f64 {
        let eps = box_muller(rng);
        let drift_term = (self.drift - self.volatility.powi(2) / 2.0) * self.dt;
        let diffusion_term = self.volatility * eps * self.dt.sqrt();
        let gbm_price = self.current_price * (drift_term + diffusion_term).exp();

        let pressure = self.pressure();
        let adjustment = self.base_adjustment * self.pressure_factor * pressure;
        let new_price = (gbm_price * (1.0 + adjustment)).max(self.price_floor);

        self.current_price = new_price;
        self.buy_volume_accum = 0.0;
        self.sell_volume_accum = 0.0;
        let cutoff = now_ms - self.time_window_ms;
        self.order_arrival_times.retain(|&t| t >= cutoff);

        new_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SequenceRng01;

    fn zero_vol_state(initial: f64) -> MarketState {
        MarketState::new("X", initial, 0.05, 0.0, 1.0 / 252.0, 0.01, 1.0, 60_000, 0.01)
    }

    #[test]
    fn zero_volatility_drifts_deterministically() {
        let mut state = zero_vol_state(100.0);
        let mut rng = SequenceRng01 {
            values: vec![0.4, 0.6],
            idx: 0,
        };
        let mut prices = Vec::new();
        for t in 0..100 {
            prices.push(state.step(&mut rng, t * 1000));
        }
        let drift_term = (state.drift - 0.0) * state.dt;
        let expected_ratio = drift_term.exp();
        for w in prices.windows(2) {
            let ratio = w[1] / w[0];
            assert!((ratio - expected_ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn negative_drift_clamps_at_floor() {
        let mut state = MarketState::new("X", 0.01, -0.5, 0.5, 1.0 / 252.0, 0.01, 1.0, 60_000, 0.01);
        let mut rng = SequenceRng01 {
            values: vec![0.01, 0.99, 0.5, 0.5, 0.9, 0.1],
            idx: 0,
        };
        for t in 0..1000 {
            let p = state.step(&mut rng, t * 10);
            assert!(p >= 0.01, "price {} dropped below floor at tick {}", p, t);
        }
    }

    #[test]
    fn pressure_is_bounded_and_signed() {
        let mut state = zero_vol_state(100.0);
        state.record_order(Side::Buy, 1000.0, 0);
        assert_eq!(state.pressure(), 1.0);
        state.record_order(Side::Sell, 3000.0, 1);
        assert!(state.pressure() < 0.0);
        assert!(state.pressure() >= -1.0);
    }

    #[test]
    fn no_volume_means_zero_pressure() {
        let state = zero_vol_state(100.0);
        assert_eq!(state.pressure(), 0.0);
    }

    #[test]
    fn arrival_times_expire_outside_window() {
        let mut state = zero_vol_state(100.0);
        state.record_order(Side::Buy, 10.0, 0);
        let mut rng = SequenceRng01 {
            values: vec![0.4, 0.6],
            idx: 0,
        };
        state.step(&mut rng, 70_000);
        assert!(state.order_arrival_times.is_empty());
    }
}
