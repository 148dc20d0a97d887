//! Shared types for the DICEBOT agent.
//!
//! These types form the data model used across all modules: strategy
//! settings, dice rolls, screen regions and the per-session game state.
//! They carry no I/O so that the strategy, engine and storage layers can
//! depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Smallest bet the game client accepts (also the smallest button).
pub const MIN_BET: u64 = 10;

/// Number of rolls kept in [`RollHistory`].
pub const ROLL_HISTORY_CAPACITY: usize = 100;

/// Number of named regions a complete ROI layout contains.
pub const ROI_COUNT: usize = 16;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bet color. Blue is the left die, Red the right die.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetColor {
    #[default]
    Blue,
    Red,
}

impl BetColor {
    /// The other color.
    pub fn opposite(&self) -> Self {
        match self {
            BetColor::Blue => BetColor::Red,
            BetColor::Red => BetColor::Blue,
        }
    }
}

impl fmt::Display for BetColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetColor::Blue => write!(f, "Blue"),
            BetColor::Red => write!(f, "Red"),
        }
    }
}

impl std::str::FromStr for BetColor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blue" | "left" => Ok(BetColor::Blue),
            "red" | "right" => Ok(BetColor::Red),
            _ => Err(anyhow::anyhow!("Unknown bet color: {s}")),
        }
    }
}

/// Staking strategy applied after a losing round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Double on every loss, switch color after a configurable loss streak.
    #[default]
    Martingale,
    /// Double on every loss, switch color on a fixed parity rule.
    Ladder,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Martingale => write!(f, "Martingale"),
            StrategyKind::Ladder => write!(f, "Ladder"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "martingale" => Ok(StrategyKind::Martingale),
            "ladder" => Ok(StrategyKind::Ladder),
            _ => Err(anyhow::anyhow!("Unknown strategy: {s}")),
        }
    }
}

/// Lifecycle phase of the round loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamePhase::Idle => write!(f, "IDLE"),
            GamePhase::Running => write!(f, "RUNNING"),
            GamePhase::Paused => write!(f, "PAUSED"),
            GamePhase::Stopping => write!(f, "STOPPING"),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy configuration
// ---------------------------------------------------------------------------

/// Operator-supplied staking settings. Immutable for the length of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub base_bet: u64,
    pub preferred_color: BetColor,
    pub strategy: StrategyKind,
    /// Martingale only: loss streak length that flips the color.
    pub color_switch_after_losses: u32,
    pub enable_no_double_bet: bool,
    /// Size of the "no-double" side bet placed after a run of draws.
    pub no_double_bet_amount: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_bet: MIN_BET,
            preferred_color: BetColor::Blue,
            strategy: StrategyKind::Martingale,
            color_switch_after_losses: 2,
            enable_no_double_bet: true,
            no_double_bet_amount: 200_000,
        }
    }
}

impl StrategyConfig {
    /// Check the settings before a game may start.
    pub fn validate(&self) -> Result<(), DicebotError> {
        if self.base_bet < MIN_BET {
            return Err(DicebotError::InvalidConfig(format!(
                "base bet must be at least {MIN_BET}, got {}",
                self.base_bet
            )));
        }
        if self.no_double_bet_amount < MIN_BET {
            return Err(DicebotError::InvalidConfig(format!(
                "no-double bet must be at least {MIN_BET}, got {}",
                self.no_double_bet_amount
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | base={} | color={} | switch_after={} | no_double={}",
            self.strategy,
            self.base_bet,
            self.preferred_color,
            self.color_switch_after_losses,
            if self.enable_no_double_bet {
                self.no_double_bet_amount.to_string()
            } else {
                "off".to_string()
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Dice
// ---------------------------------------------------------------------------

/// One recognised throw: blue (left) and red (right) die faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiceRoll {
    pub blue: u8,
    pub red: u8,
}

impl DiceRoll {
    /// Build a roll, rejecting faces outside 1..=6.
    pub fn new(blue: u8, red: u8) -> Result<Self, DicebotError> {
        for face in [blue, red] {
            if !(1..=6).contains(&face) {
                return Err(DicebotError::InvalidDie(face));
            }
        }
        Ok(Self { blue, red })
    }

    pub fn is_draw(&self) -> bool {
        self.blue == self.red
    }

    /// The winning color, or `None` on a draw.
    pub fn winner(&self) -> Option<BetColor> {
        match self.blue.cmp(&self.red) {
            std::cmp::Ordering::Greater => Some(BetColor::Blue),
            std::cmp::Ordering::Less => Some(BetColor::Red),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Statistics key, `"blue:red"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.blue, self.red)
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.blue, self.red)
    }
}

/// Bounded roll history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollHistory {
    rolls: VecDeque<DiceRoll>,
}

impl RollHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a roll, evicting the oldest beyond capacity.
    pub fn push(&mut self, roll: DiceRoll) {
        self.rolls.push_back(roll);
        while self.rolls.len() > ROLL_HISTORY_CAPACITY {
            self.rolls.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.rolls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiceRoll> {
        self.rolls.iter()
    }

    /// The most recent `n` rolls (or fewer), oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &DiceRoll> {
        self.rolls.iter().skip(self.rolls.len().saturating_sub(n))
    }

    pub fn latest(&self) -> Option<&DiceRoll> {
        self.rolls.back()
    }
}

// ---------------------------------------------------------------------------
// Screen regions
// ---------------------------------------------------------------------------

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Center point, where clicks land.
    pub fn center(&self) -> (i32, i32) {
        (
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// The sixteen named regions of the game client layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoiName {
    #[serde(rename = "dice_area")]
    DiceArea,
    #[serde(rename = "blue_bet")]
    BlueBet,
    #[serde(rename = "red_bet")]
    RedBet,
    #[serde(rename = "bet_10")]
    Bet10,
    #[serde(rename = "bet_50")]
    Bet50,
    #[serde(rename = "bet_100")]
    Bet100,
    #[serde(rename = "bet_500")]
    Bet500,
    #[serde(rename = "bet_1000")]
    Bet1000,
    #[serde(rename = "bet_2000")]
    Bet2000,
    #[serde(rename = "bet_5000")]
    Bet5000,
    #[serde(rename = "bet_10000")]
    Bet10000,
    #[serde(rename = "bet_20000")]
    Bet20000,
    #[serde(rename = "multiplier_x2")]
    MultiplierX2,
    #[serde(rename = "no_double")]
    NoDouble,
    #[serde(rename = "scroll_right")]
    ScrollRight,
    #[serde(rename = "scroll_left")]
    ScrollLeft,
}

impl RoiName {
    /// All regions in layout order.
    pub const ALL: [RoiName; ROI_COUNT] = [
        RoiName::DiceArea,
        RoiName::BlueBet,
        RoiName::RedBet,
        RoiName::Bet10,
        RoiName::Bet50,
        RoiName::Bet100,
        RoiName::Bet500,
        RoiName::Bet1000,
        RoiName::Bet2000,
        RoiName::Bet5000,
        RoiName::Bet10000,
        RoiName::Bet20000,
        RoiName::MultiplierX2,
        RoiName::NoDouble,
        RoiName::ScrollRight,
        RoiName::ScrollLeft,
    ];

    /// Regions without which a game cannot start.
    pub const MANDATORY: [RoiName; 5] = [
        RoiName::DiceArea,
        RoiName::BlueBet,
        RoiName::RedBet,
        RoiName::Bet10,
        RoiName::MultiplierX2,
    ];

    /// Chip value for the denomination buttons.
    pub fn denomination(&self) -> Option<u64> {
        match self {
            RoiName::Bet10 => Some(10),
            RoiName::Bet50 => Some(50),
            RoiName::Bet100 => Some(100),
            RoiName::Bet500 => Some(500),
            RoiName::Bet1000 => Some(1_000),
            RoiName::Bet2000 => Some(2_000),
            RoiName::Bet5000 => Some(5_000),
            RoiName::Bet10000 => Some(10_000),
            RoiName::Bet20000 => Some(20_000),
            _ => None,
        }
    }

    /// Reverse of [`RoiName::denomination`].
    pub fn for_denomination(value: u64) -> Option<RoiName> {
        RoiName::ALL
            .iter()
            .copied()
            .find(|name| name.denomination() == Some(value))
    }

    pub fn is_mandatory(&self) -> bool {
        RoiName::MANDATORY.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoiName::DiceArea => "dice_area",
            RoiName::BlueBet => "blue_bet",
            RoiName::RedBet => "red_bet",
            RoiName::Bet10 => "bet_10",
            RoiName::Bet50 => "bet_50",
            RoiName::Bet100 => "bet_100",
            RoiName::Bet500 => "bet_500",
            RoiName::Bet1000 => "bet_1000",
            RoiName::Bet2000 => "bet_2000",
            RoiName::Bet5000 => "bet_5000",
            RoiName::Bet10000 => "bet_10000",
            RoiName::Bet20000 => "bet_20000",
            RoiName::MultiplierX2 => "multiplier_x2",
            RoiName::NoDouble => "no_double",
            RoiName::ScrollRight => "scroll_right",
            RoiName::ScrollLeft => "scroll_left",
        }
    }
}

impl fmt::Display for RoiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A region as persisted by the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRegion {
    pub name: RoiName,
    #[serde(flatten)]
    pub rect: Rect,
}

/// Resolved region layout used by the round loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiSet {
    regions: BTreeMap<RoiName, Rect>,
}

impl RoiSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layout from the persisted list. The list must hold exactly
    /// one entry per region and every mandatory region.
    pub fn from_regions(regions: &[NamedRegion]) -> Result<Self, DicebotError> {
        if regions.len() != ROI_COUNT {
            return Err(DicebotError::IncompleteRoi {
                found: regions.len(),
                expected: ROI_COUNT,
            });
        }

        let mut set = RoiSet::new();
        for region in regions {
            if set.regions.insert(region.name, region.rect).is_some() {
                return Err(DicebotError::DuplicateRegion(region.name));
            }
        }
        set.validate()?;
        Ok(set)
    }

    pub fn insert(&mut self, name: RoiName, rect: Rect) {
        self.regions.insert(name, rect);
    }

    pub fn get(&self, name: RoiName) -> Option<Rect> {
        self.regions.get(&name).copied()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Check the regions required to play a round are present.
    pub fn validate(&self) -> Result<(), DicebotError> {
        if let Some(missing) = RoiName::MANDATORY
            .iter()
            .find(|name| !self.regions.contains_key(name))
        {
            return Err(DicebotError::MissingRegion(*missing));
        }
        if self.denominations().is_empty() {
            return Err(DicebotError::NoDenominations);
        }
        Ok(())
    }

    /// Chip values that have a configured button.
    pub fn denominations(&self) -> BTreeSet<u64> {
        self.regions
            .keys()
            .filter_map(|name| name.denomination())
            .collect()
    }

    pub fn denomination_button(&self, value: u64) -> Option<Rect> {
        RoiName::for_denomination(value).and_then(|name| self.get(name))
    }

    pub fn color_area(&self, color: BetColor) -> Option<Rect> {
        match color {
            BetColor::Blue => self.get(RoiName::BlueBet),
            BetColor::Red => self.get(RoiName::RedBet),
        }
    }

    /// Persisted form, in layout order.
    pub fn to_regions(&self) -> Vec<NamedRegion> {
        self.regions
            .iter()
            .map(|(name, rect)| NamedRegion {
                name: *name,
                rect: *rect,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Game state
// ---------------------------------------------------------------------------

/// Per-session game state. Owned by the round worker and replaced
/// wholesale after each round; observers only ever see clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub active: bool,
    pub paused: bool,
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub current_bet: u64,
    pub current_color: BetColor,
    pub consecutive_draws: u32,
    pub consecutive_losses: u32,
    pub ladder_level: u32,
    /// Set for exactly one round after the side bet was placed.
    pub no_double_pending: bool,
    pub total_rounds: u64,
    pub wins: u64,
    /// Includes draws.
    pub losses: u64,
    pub draws: u64,
    pub balance: i64,
    pub dice_outcome_counts: BTreeMap<String, u64>,
    pub roll_history: RollHistory,
    pub last_roll: Option<DiceRoll>,
}

impl GameState {
    /// Fresh, inactive state seeded from the strategy settings.
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            active: false,
            paused: false,
            session_id: String::new(),
            started_at: None,
            current_bet: config.base_bet,
            current_color: config.preferred_color,
            consecutive_draws: 0,
            consecutive_losses: 0,
            ladder_level: 0,
            no_double_pending: false,
            total_rounds: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            balance: 0,
            dice_outcome_counts: BTreeMap::new(),
            roll_history: RollHistory::new(),
            last_roll: None,
        }
    }

    /// State for a session that starts now.
    pub fn started(config: &StrategyConfig) -> Self {
        Self {
            active: true,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Some(Utc::now()),
            ..Self::new(config)
        }
    }

    /// Win rate as a percentage of all rounds. 0.0 before the first round.
    pub fn win_rate(&self) -> f64 {
        percentage(self.wins, self.total_rounds)
    }

    pub fn draw_rate(&self) -> f64 {
        percentage(self.draws, self.total_rounds)
    }

    /// Decisive losses only.
    pub fn decisive_losses(&self) -> u64 {
        self.losses.saturating_sub(self.draws)
    }

    /// Time since the session started.
    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.started_at.map(|start| Utc::now() - start)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rounds={} (W{}/L{}/D{}) | win_rate={:.1}% | balance={} | bet={} on {} | streak L{} D{} | ladder={}",
            self.total_rounds,
            self.wins,
            self.losses,
            self.draws,
            self.win_rate(),
            self.balance,
            self.current_bet,
            self.current_color,
            self.consecutive_losses,
            self.consecutive_draws,
            self.ladder_level,
        )
    }
}

pub(crate) fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DICEBOT.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DicebotError {
    #[error("Invalid strategy settings: {0}")]
    InvalidConfig(String),

    #[error("ROI layout incomplete: {found} of {expected} regions configured")]
    IncompleteRoi { found: usize, expected: usize },

    #[error("ROI region configured twice: {0}")]
    DuplicateRegion(RoiName),

    #[error("ROI region not configured: {0}")]
    MissingRegion(RoiName),

    #[error("No bet denomination buttons configured")]
    NoDenominations,

    #[error("Die face out of range: {0}")]
    InvalidDie(u8),

    #[error("A game is already running")]
    AlreadyRunning,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
