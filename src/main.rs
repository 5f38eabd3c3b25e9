use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

mod game;
mod gateway;
mod protocol;
mod registry;
mod server_info;
mod shared;
mod transport;

use game::room::now_millis;
use gateway::{FeatureFlags, Shared};
use registry::SESSION_SWEEP_SECS;
use transport::ws_session::handle_socket;

const DEFAULT_PORT: u16 = 3000;

#[derive(Parser, Debug)]
#[command(about = "Authoritative room-based multi-snake game server")]
struct Args {
    /// Turn off the in-room chat relay.
    #[arg(long)]
    disable_chat: bool,
    /// Turn on power-up spawning.
    #[arg(long)]
    enable_powerups: bool,
    /// Turn off the accessibility feature flag sent to clients.
    #[arg(long)]
    disable_accessibility: bool,
    /// Listen port; the PORT environment variable wins over this.
    #[arg(long)]
    port: Option<u16>,
    /// Directory the client bundle is served from.
    #[arg(long, default_value = "client")]
    client_dir: String,
}

#[derive(Clone)]
struct AppState {
    shared: Arc<Shared>,
    port: u16,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// `"true"`/`"false"` environment overrides; anything else leaves the
/// CLI-derived default in place.
fn env_flag(name: &str) -> Option<bool> {
    match env::var(name).ok()?.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let features = FeatureFlags {
        chat: env_flag("ENABLE_CHAT").unwrap_or(!args.disable_chat),
        powerups: env_flag("ENABLE_POWERUPS").unwrap_or(args.enable_powerups),
        accessibility: env_flag("ENABLE_ACCESSIBILITY").unwrap_or(!args.disable_accessibility),
    };
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .or(args.port)
        .unwrap_or(DEFAULT_PORT);

    let shared = Shared::new(features);
    tracing::info!(
        port,
        chat = features.chat,
        powerups = features.powerups,
        accessibility = features.accessibility,
        "server_starting"
    );

    spawn_session_sweeper(Arc::clone(&shared));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let state = AppState {
        shared,
        port,
    };
    let app: Router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route("/api/server-info", get(server_info_handler))
        .fallback_service(ServeDir::new(&args.client_dir).append_index_html_on_directories(true))
        .layer(cors)
        .with_state(state);

    let address = format!("0.0.0.0:{port}");
    tracing::info!("listening on {address}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic registry sweep: orphaned sessions get closed as `room_deleted`,
/// day-old ones as `timeout`.
fn spawn_session_sweeper(shared: Arc<Shared>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(SESSION_SWEEP_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = now_millis();
            shared
                .registry
                .sweep(now, |code| shared.rooms.contains_key(code));
        }
    });
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.shared))
}

async fn health() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}

async fn server_info_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(server_info::collect(state.port))
}
