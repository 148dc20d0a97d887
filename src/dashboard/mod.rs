//! Dashboard: Axum web server for watching a running game.
//!
//! Serves a small REST API and a self-contained HTML page. The shared state is
//! fed exclusively from the orchestrator's event channel.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    response::Html,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::engine::GameEvent;
use routes::{AppState, DashboardState};

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>DICEBOT Dashboard</title>
<style>
body { font-family: monospace; background: #111; color: #ddd; margin: 2em; }
h1 { color: #6cf; }
table { border-collapse: collapse; }
td { padding: 2px 12px 2px 0; }
pre { background: #1b1b1b; padding: 1em; max-height: 24em; overflow-y: auto; }
</style>
</head>
<body>
<h1>DICEBOT Dashboard</h1>
<table id="status"></table>
<h2>Recent rolls</h2>
<div id="rolls"></div>
<h2>Log</h2>
<pre id="log"></pre>
<script>
async function refresh() {
  const status = await (await fetch('/api/status')).json();
  document.getElementById('status').innerHTML = Object.entries(status)
    .map(([k, v]) => `<tr><td>${k}</td><td>${v ?? '-'}</td></tr>`).join('');
  const rolls = await (await fetch('/api/rolls')).json();
  document.getElementById('rolls').textContent =
    rolls.slice(-20).map(r => `${r.blue}:${r.red}`).join('  ');
  const log = await (await fetch('/api/log')).json();
  document.getElementById('log').textContent =
    log.map(l => `${l.timestamp} [${l.level}] ${l.message}`).join('\n');
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;

/// Start the dashboard web server in the background.
///
/// The port is bound before returning so a bind failure reaches the caller.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Forward game events into the dashboard state until the channel closes.
pub fn spawn_event_pump(
    state: AppState,
    mut events: broadcast::Receiver<GameEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => state.apply(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dashboard fell behind the event stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/rolls", get(routes::get_rolls))
        .route("/api/log", get(routes::get_log))
        .route("/health", get(routes::health))
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Fresh dashboard state for a given starting snapshot.
pub fn new_state(initial: crate::types::GameState) -> AppState {
    Arc::new(DashboardState::new(initial))
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
