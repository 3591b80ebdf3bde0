// Framework bootstrap for the lobby engine runtime.

use crate::frameworks::config;
use crate::interface_adapters::clients::{AtlasClient, DustkidClient, UserDbClient};
use crate::interface_adapters::net::gateway::spawn_state_serializer;
use crate::interface_adapters::net::{create_lobby_handler, start_round_handler, ws_handler};
use crate::interface_adapters::state::AppState;
use crate::use_cases::lobby::{LobbyTimings, RotatingThresholds};
use crate::use_cases::{run_ingester, spawn_broker, BrokerConfig};

use axum::{
    routing::{get, post},
    Router,
};
use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state().await?;

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/create_lobby", post(create_lobby_handler))
        .route("/api/start_round", post(start_round_handler))
        .with_state(state);

    tracing::info!(%address, "listening");

    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

async fn build_state() -> Result<Arc<AppState>> {
    let atlas = AtlasClient::new(config::atlas_base_url(), config::atlas_timeout())
        .map_err(|e| std::io::Error::other(format!("failed to initialize atlas client: {e}")))?;
    let dustkid = DustkidClient::new(config::dustkid_base_url(), config::dustkid_timeout())
        .map_err(|e| std::io::Error::other(format!("failed to initialize dustkid client: {e}")))?;
    let userdb = UserDbClient::new(config::userdb_base_url(), config::userdb_timeout())
        .map_err(|e| std::io::Error::other(format!("failed to initialize userdb client: {e}")))?;

    let atlas = Arc::new(atlas);
    let dustkid = Arc::new(dustkid);
    let userdb = Arc::new(userdb);

    // Ingester: pulls the upstream event feed and republishes raw frames on
    // an in-process broadcast bus. The broker fans each frame out to every
    // live lobby.
    let (bus_tx, bus_rx) = broadcast::channel(config::INGESTER_BUS_CAPACITY);
    let ingester_shutdown = Arc::new(Notify::new());
    let http = reqwest::Client::new();
    tokio::spawn(run_ingester(
        http,
        config::dustkid_events_url(),
        bus_tx,
        ingester_shutdown,
    ));

    let on_lobby_created: crate::use_cases::OnLobbyCreated = Arc::new(|lobby_id, handle| {
        tracing::debug!(lobby_id, "attaching state serializer");
        spawn_state_serializer(
            handle.state_tx.subscribe(),
            handle.state_bytes_tx.clone(),
            handle.state_latest_tx.clone(),
        );
    });

    let broker_config = BrokerConfig {
        max_lobby_count: config::max_lobby_count(),
        elimination_timings: LobbyTimings {
            warmup: config::WARMUP_DURATION,
            round: config::ROUND_DURATION,
            round_padding: config::ROUND_PADDING,
            break_time: config::BREAK_DURATION,
            game_over_hold: config::GAME_OVER_HOLD,
            empty_timeout: config::EMPTY_LOBBY_TIMEOUT,
        },
        rotating_timings: LobbyTimings {
            warmup: config::WARMUP_DURATION,
            round: config::ROUND_DURATION,
            round_padding: config::ROUND_PADDING,
            break_time: config::BREAK_DURATION,
            game_over_hold: config::ROTATING_GAME_OVER_HOLD,
            empty_timeout: config::EMPTY_LOBBY_TIMEOUT,
        },
        rotating_thresholds: RotatingThresholds {
            min_ss_count: config::rotating_min_ss_count(),
            max_fastest_ss: config::rotating_max_fastest_ss(),
        },
        lobby_cmd_capacity: config::LOBBY_CMD_CAPACITY,
        lobby_state_capacity: config::LOBBY_STATE_CAPACITY,
        // Keeps `LobbyKind::Rotating` exercised from process start, since
        // nothing in the wire protocol can create one on demand.
        bootstrap_rotating_lobby: true,
    };

    let broker_tx = spawn_broker(broker_config, atlas, dustkid, userdb, bus_rx, on_lobby_created);

    Ok(Arc::new(AppState { broker_tx }))
}
