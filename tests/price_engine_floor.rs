//! Scenario 5: a hostile drift/volatility combination must never push the
//! simulated price below the configured floor, even over a long run.

use marketcraft_engine::{Config, Dispatcher};

#[tokio::test]
async fn price_never_drops_below_floor_over_a_thousand_ticks() {
    let config = Config {
        drift: -0.5,
        volatility: 0.5,
        price_floor: 0.01,
        ..Config::default()
    };
    let dispatcher = Dispatcher::new(config);
    dispatcher.spawn("DUST", 0.01);

    for tick in 0..1000 {
        let outcome = dispatcher.tick("DUST").await.unwrap();
        assert!(
            outcome.current_price >= 0.01,
            "price {} dropped below the floor at tick {}",
            outcome.current_price,
            tick
        );
    }
}
