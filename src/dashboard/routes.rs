//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>` and
//! only ever written by the event pump.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::GameEvent;
use crate::strategy::stats::DiceStatistics;
use crate::types::{GamePhase, GameState};

/// Log lines kept for `/api/log`.
const LOG_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub game: RwLock<GameState>,
    pub log: RwLock<VecDeque<LogEntry>>,
    pub stopped_reason: RwLock<Option<String>>,
}

impl DashboardState {
    pub fn new(initial_state: GameState) -> Self {
        Self {
            game: RwLock::new(initial_state),
            log: RwLock::new(VecDeque::with_capacity(LOG_CAPACITY)),
            stopped_reason: RwLock::new(None),
        }
    }

    /// Fold one game event into the shared state.
    pub async fn apply(&self, event: GameEvent) {
        match event {
            GameEvent::Log(message) => self.push_log("info", message).await,
            GameEvent::Error { message, cause } => {
                let line = match cause {
                    Some(c) => format!("{message}: {c}"),
                    None => message,
                };
                self.push_log("error", line).await;
            }
            GameEvent::State(state) => {
                if state.active {
                    *self.stopped_reason.write().await = None;
                }
                *self.game.write().await = state;
            }
            GameEvent::Stopped { reason } => {
                self.game.write().await.active = false;
                self.push_log("info", format!("Stopped: {reason}")).await;
                *self.stopped_reason.write().await = Some(reason);
            }
        }
    }

    async fn push_log(&self, level: &str, message: String) {
        let mut log = self.log.write().await;
        if log.len() == LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.to_string(),
            message,
        });
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub phase: String,
    pub session_id: String,
    pub total_rounds: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub win_rate: f64,
    pub balance: i64,
    pub current_bet: u64,
    pub current_color: String,
    pub consecutive_losses: u32,
    pub consecutive_draws: u32,
    pub ladder_level: u32,
    pub no_double_pending: bool,
    pub last_roll: Option<String>,
    pub uptime_secs: i64,
    pub stopped_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollEntry {
    pub blue: u8,
    pub red: u8,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<DashboardState>;

fn phase_of(game: &GameState) -> GamePhase {
    match (game.active, game.paused) {
        (false, _) => GamePhase::Idle,
        (true, true) => GamePhase::Paused,
        (true, false) => GamePhase::Running,
    }
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let game = state.game.read().await;
    let stopped_reason = state.stopped_reason.read().await.clone();

    Json(StatusResponse {
        phase: phase_of(&game).to_string(),
        session_id: game.session_id.clone(),
        total_rounds: game.total_rounds,
        wins: game.wins,
        losses: game.losses,
        draws: game.draws,
        win_rate: game.win_rate(),
        balance: game.balance,
        current_bet: game.current_bet,
        current_color: game.current_color.to_string(),
        consecutive_losses: game.consecutive_losses,
        consecutive_draws: game.consecutive_draws,
        ladder_level: game.ladder_level,
        no_double_pending: game.no_double_pending,
        last_roll: game.last_roll.map(|r| r.to_string()),
        uptime_secs: game.uptime().map(|d| d.num_seconds()).unwrap_or(0),
        stopped_reason,
    })
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<DiceStatistics> {
    let game = state.game.read().await;
    Json(DiceStatistics::from_state(&game))
}

/// GET /api/rolls
pub async fn get_rolls(State(state): State<AppState>) -> Json<Vec<RollEntry>> {
    let game = state.game.read().await;
    Json(
        game.roll_history
            .iter()
            .map(|r| RollEntry {
                blue: r.blue,
                red: r.red,
            })
            .collect(),
    )
}

/// GET /api/log
pub async fn get_log(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    let log = state.log.read().await;
    Json(log.iter().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
