//! Thin wiring binary: load config, initialize tracing, spawn a couple of
//! items on the façade, and place a few orders so the tick loop has
//! something to chew on. Not a server — there is no HTTP/WebSocket surface
//! here, that's an external collaborator per scope.

use anyhow::Result;
use marketcraft_engine::{Config, EngineHandle, ItemId, OrderKind, Side, SubmitOrderRequest};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketcraft_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env();
    info!(?config, "starting marketcraft engine demo");

    let engine = EngineHandle::new(config);

    let gold = ItemId::new("gold-ore");
    let wood = ItemId::new("oak-plank");
    engine.ensure_item(&gold, 12.5);
    engine.ensure_item(&wood, 2.0);

    let alice = engine.create_session(10_000.0);
    let bob = engine.create_session(10_000.0);

    engine
        .submit_order(
            alice,
            &gold,
            SubmitOrderRequest {
                side: Side::Buy,
                kind: OrderKind::Limit,
                quantity: 10.0,
                price: Some(12.0),
            },
        )
        .await?;

    engine
        .submit_order(
            bob,
            &gold,
            SubmitOrderRequest {
                side: Side::Sell,
                kind: OrderKind::Limit,
                quantity: 10.0,
                price: Some(11.5),
            },
        )
        .await?;

    let mut updates = engine.subscribe_market();
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            info!(?update, "market update");
        }
    });

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let book = engine.get_order_book(&gold).await?;
    info!(bids = book.bids.len(), asks = book.asks.len(), "gold order book");

    let stats = engine.stats();
    info!(?stats, "engine stats");

    engine.shutdown().await;
    Ok(())
}
