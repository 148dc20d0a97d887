//! Persistence layer.
//!
//! Two JSON files: the operator's settings record (API access, proxy, the
//! sixteen screen regions and the strategy fields) and the final game state
//! snapshot written when a game stops. A missing file means a fresh start.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{
    BetColor, GameState, NamedRegion, RoiSet, StrategyConfig, StrategyKind, MIN_BET,
};
use crate::vision::openrouter::{ProxySettings, DEFAULT_MODEL};

/// Default settings file path.
pub const DEFAULT_SETTINGS_FILE: &str = "dicebot_settings.json";

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "dicebot_state.json";

// ---------------------------------------------------------------------------
// Settings record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsRecord {
    pub theme: String,
    pub api_key: String,
    pub recognition_model: String,
    pub proxy: ProxySettings,
    pub roi: Vec<NamedRegion>,
    pub base_bet: u64,
    pub preferred_color: BetColor,
    pub strategy: StrategyKind,
    pub color_switch_after_losses: u32,
    pub enable_no_double_bet: bool,
    pub no_double_bet_amount: u64,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        let strategy = StrategyConfig::default();
        Self {
            theme: "dark".to_string(),
            api_key: String::new(),
            recognition_model: DEFAULT_MODEL.to_string(),
            proxy: ProxySettings::default(),
            roi: Vec::new(),
            base_bet: strategy.base_bet,
            preferred_color: strategy.preferred_color,
            strategy: strategy.strategy,
            color_switch_after_losses: strategy.color_switch_after_losses,
            enable_no_double_bet: strategy.enable_no_double_bet,
            no_double_bet_amount: strategy.no_double_bet_amount,
        }
    }
}

impl SettingsRecord {
    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            base_bet: self.base_bet,
            preferred_color: self.preferred_color,
            strategy: self.strategy,
            color_switch_after_losses: self.color_switch_after_losses,
            enable_no_double_bet: self.enable_no_double_bet,
            no_double_bet_amount: self.no_double_bet_amount,
        }
    }

    pub fn set_strategy(&mut self, config: &StrategyConfig) {
        self.base_bet = config.base_bet.max(MIN_BET);
        self.preferred_color = config.preferred_color;
        self.strategy = config.strategy;
        self.color_switch_after_losses = config.color_switch_after_losses;
        self.enable_no_double_bet = config.enable_no_double_bet;
        self.no_double_bet_amount = config.no_double_bet_amount.max(MIN_BET);
    }

    /// Resolve the stored regions. Fails unless all sixteen are present,
    /// uniquely named, and the mandatory ones are among them.
    pub fn roi_set(&self) -> Result<RoiSet> {
        RoiSet::from_regions(&self.roi).context("ROI layout in settings is not usable")
    }

    /// API key from the record, if one was saved.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

/// Save the settings record as pretty JSON.
pub fn save_settings(settings: &SettingsRecord, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SETTINGS_FILE);
    let json = serde_json::to_string_pretty(settings).context("Failed to serialise settings")?;

    std::fs::write(path, &json).with_context(|| format!("Failed to write settings to {path}"))?;

    debug!(path, regions = settings.roi.len(), "Settings saved");
    Ok(())
}

/// Load the settings record. Returns defaults when the file does not exist.
pub fn load_settings(path: Option<&str>) -> Result<SettingsRecord> {
    let path = path.unwrap_or(DEFAULT_SETTINGS_FILE);

    if !Path::new(path).exists() {
        info!(path, "No settings file found, using defaults");
        return Ok(SettingsRecord::default());
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {path}"))?;

    let settings: SettingsRecord = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse settings from {path}"))?;

    info!(
        path,
        regions = settings.roi.len(),
        strategy = %settings.strategy,
        base_bet = settings.base_bet,
        "Settings loaded"
    );
    Ok(settings)
}

// ---------------------------------------------------------------------------
// Game state snapshot
// ---------------------------------------------------------------------------

/// Save the game state snapshot to a JSON file.
pub fn save_state(state: &GameState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise game state")?;

    std::fs::write(path, &json).with_context(|| format!("Failed to write state to {path}"))?;

    debug!(path, rounds = state.total_rounds, balance = state.balance, "State saved");
    Ok(())
}

/// Load the last game state snapshot.
/// Returns None if the file doesn't exist.
pub fn load_state(path: Option<&str>) -> Result<Option<GameState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state from {path}"))?;

    let state: GameState = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse state from {path}"))?;

    info!(
        path,
        session_id = %state.session_id,
        rounds = state.total_rounds,
        balance = state.balance,
        "Previous session loaded"
    );
    Ok(Some(state))
}

/// Delete a persisted file if it exists.
pub fn delete_file(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
