use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use volscalp::binance::{FuturesClient, RateLimiter};
use volscalp::config::Settings;
use volscalp::engine::{Event, LiveEngine, EVENT_QUEUE_DEPTH};
use volscalp::oms::OrderGateway;
use volscalp::transport::{MarketStream, UserStream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cfg = Arc::new(Settings::from_env()?);

    tracing::info!("Starting volscalp live directional scalping");
    tracing::info!(pairs = ?cfg.trading_pairs, testnet = cfg.use_testnet, "configuration loaded");
    if !cfg.credentials.is_configured() {
        tracing::warn!(
            "API credentials not set: user data stream and order submission will fail. \
             Set BINANCE_API_KEY and BINANCE_API_SECRET."
        );
    }

    // One process-wide weight budget shared by every REST caller
    let limiter = Arc::new(RateLimiter::new(
        cfg.api_weight_limit,
        cfg.api_weight_window_sec,
    ));
    let client = Arc::new(FuturesClient::new(
        cfg.rest_url.clone(),
        cfg.credentials.clone(),
        Arc::clone(&limiter),
    ));

    let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);
    let shutdown = CancellationToken::new();

    // Transport producers
    let market = MarketStream::new(Arc::clone(&cfg), event_tx.clone(), shutdown.clone());
    let market_handle = tokio::spawn(market.run());

    let user = UserStream::new(
        Arc::clone(&cfg),
        Arc::clone(&client),
        event_tx.clone(),
        shutdown.clone(),
    );
    let user_handle = tokio::spawn(user.run());
    drop(event_tx);

    // Ctrl-C trips the shared cancellation token
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                signal_token.cancel();
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        }
    });

    // The dispatcher runs on the main task and owns all engine state
    let gateway: Arc<dyn OrderGateway> = client;
    let engine = LiveEngine::new(Arc::clone(&cfg), gateway, shutdown.clone());
    engine.run(event_rx).await;

    shutdown.cancel();
    let _ = tokio::join!(market_handle, user_handle);
    tracing::info!("shutdown complete");
    Ok(())
}
