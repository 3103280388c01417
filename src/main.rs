//! fanout-gateway server entry point.
//!
//! Wires the Redis collaborators, the dispatcher and the metadata bridge,
//! then serves the WebSocket and REST endpoints.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use fanout_gateway::adapters::redis_store::{
    RedisIdAllocator, RedisPermissionOracle, RedisPublisher, RedisReplayCache, RedisSubscriber,
};
use fanout_gateway::adapters::{IdAllocator, UpstreamLink};
use fanout_gateway::api;
use fanout_gateway::app_state::{AppState, GatewayContext};
use fanout_gateway::bridge::spawn_bridge;
use fanout_gateway::config::GatewayConfig;
use fanout_gateway::dispatch::Dispatcher;
use fanout_gateway::domain::{ConnectionRegistry, PermissionTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env().context("invalid configuration")?;
    tracing::info!(addr = %config.listen_addr, "starting fanout-gateway");

    // Redis connections
    let client = redis::Client::open(config.redis_url.as_str()).context("invalid REDIS_URL")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("redis connection failed")?;

    // Upstream bus feeding the dispatcher
    let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
    let upstream = RedisSubscriber::connect(&client, bus_tx).await?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(upstream),
        config.raw_message_policy,
    ));
    let pump = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        while let Some((channel, payload)) = bus_rx.recv().await {
            pump.handle_bus_message(&channel, &payload);
        }
        tracing::error!("upstream bus pump stopped");
    });

    // Bridge control channel
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(String, String)>();
    let control = RedisSubscriber::connect(&client, raw_tx).await?;
    control.subscribe(&config.bridge.input_stream);
    tokio::spawn(async move {
        while let Some((_, payload)) = raw_rx.recv().await {
            if control_tx.send(payload).is_err() {
                break;
            }
        }
    });

    // Metadata bridge
    let allocator: Arc<dyn IdAllocator> = Arc::new(RedisIdAllocator::new(
        conn.clone(),
        config.keys.id_counter.clone(),
    ));
    let (bridge, _bridge_task) = spawn_bridge(
        config.bridge.keep_alive,
        Arc::clone(&allocator),
        Arc::new(RedisPublisher::new(
            conn.clone(),
            config.bridge.output_stream.clone(),
        )),
        control_rx,
    );

    // Build application state
    let gateway = GatewayContext {
        dispatcher,
        registry: Arc::new(ConnectionRegistry::new()),
        tracker: Arc::new(PermissionTracker::new()),
        bridge,
        allocator,
        oracle: Arc::new(RedisPermissionOracle::new(conn.clone(), config.keys.clone())),
        cache: Arc::new(RedisReplayCache::new(conn, config.keys.replay_prefix.clone())),
        heartbeat: config.heartbeat.clone(),
        access: config.access.clone(),
    };
    let app = api::build_app(AppState::new(gateway, config.admin_token.clone()));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
