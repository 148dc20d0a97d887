//! Staking engine: turns a recognised roll into the next game state.
//!
//! Both strategies double the stake on every loss and reset to the base bet
//! on a win. They differ only in when the bet color flips.

pub mod sizing;
pub mod stats;

use tracing::debug;

use crate::types::{BetColor, DiceRoll, GameState, StrategyConfig, StrategyKind};

/// Consecutive draws after which the no-double side bet is placed.
pub const NO_DOUBLE_DRAW_THRESHOLD: u32 = 4;

/// Ladder streak lengths on which a draw never flips the color.
const LADDER_DRAW_HOLD: [u32; 3] = [4, 5, 6];

/// Result of one round from the player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Win,
    Loss,
    Draw,
}

impl std::fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundOutcome::Win => write!(f, "WIN"),
            RoundOutcome::Loss => write!(f, "LOSS"),
            RoundOutcome::Draw => write!(f, "DRAW"),
        }
    }
}

/// What caused a loss; the Ladder color rule depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossTrigger {
    Draw,
    Decisive,
}

/// Classify a roll against the color that was bet.
pub fn round_outcome(roll: DiceRoll, bet_color: BetColor) -> RoundOutcome {
    match roll.winner() {
        None => RoundOutcome::Draw,
        Some(color) if color == bet_color => RoundOutcome::Win,
        Some(_) => RoundOutcome::Loss,
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Applies staking rules for one strategy configuration.
///
/// Every method is pure: the input state is never touched and a new state is
/// returned, so the round worker can replace its state wholesale.
#[derive(Debug, Clone)]
pub struct StakingEngine {
    config: StrategyConfig,
}

impl StakingEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Advance the state by one recognised roll.
    pub fn apply_result(&self, state: &GameState, roll: DiceRoll) -> GameState {
        apply_result(state, roll, &self.config)
    }

    pub fn should_place_no_double(&self, state: &GameState) -> bool {
        self.config.enable_no_double_bet && should_place_no_double(state)
    }

    pub fn mark_no_double_placed(&self, state: &GameState) -> GameState {
        mark_no_double_placed(state, &self.config)
    }
}

/// Advance `state` by one recognised roll under `config`.
pub fn apply_result(state: &GameState, roll: DiceRoll, config: &StrategyConfig) -> GameState {
    let mut next = state.clone();

    next.total_rounds += 1;
    next.roll_history.push(roll);
    *next.dice_outcome_counts.entry(roll.key()).or_insert(0) += 1;
    next.last_roll = Some(roll);

    match round_outcome(roll, state.current_color) {
        RoundOutcome::Draw => {
            next.draws += 1;
            next.losses += 1;
            next.consecutive_draws += 1;
            next.consecutive_losses += 1;
            next.balance = next.balance.saturating_sub(stake(state.current_bet));
            apply_loss(&mut next, config, LossTrigger::Draw);

            if state.no_double_pending {
                next.balance = next.balance.saturating_sub(stake(config.no_double_bet_amount));
                next.no_double_pending = false;
            }
        }
        RoundOutcome::Win => {
            next.consecutive_draws = 0;
            next.no_double_pending = false;
            next.wins += 1;
            next.balance = next.balance.saturating_add(stake(state.current_bet));
            next.consecutive_losses = 0;
            next.current_bet = config.base_bet;
            next.ladder_level = 0;
        }
        RoundOutcome::Loss => {
            next.consecutive_draws = 0;
            next.no_double_pending = false;
            next.losses += 1;
            next.consecutive_losses += 1;
            next.balance = next.balance.saturating_sub(stake(state.current_bet));
            apply_loss(&mut next, config, LossTrigger::Decisive);
        }
    }

    debug!(
        roll = %roll,
        bet = state.current_bet,
        next_bet = next.current_bet,
        color = %next.current_color,
        losses_in_row = next.consecutive_losses,
        "Round applied"
    );
    next
}

/// Escalate the stake and apply the strategy's color rule. Expects
/// `consecutive_losses` to already include this loss.
fn apply_loss(state: &mut GameState, config: &StrategyConfig, trigger: LossTrigger) {
    state.current_bet = state.current_bet.saturating_mul(2);

    match config.strategy {
        StrategyKind::Martingale => {
            if state.consecutive_losses >= config.color_switch_after_losses {
                state.current_color = state.current_color.opposite();
                state.consecutive_losses = 0;
            }
        }
        StrategyKind::Ladder => {
            state.ladder_level += 1;
            let streak = state.consecutive_losses;
            let held = trigger == LossTrigger::Draw && LADDER_DRAW_HOLD.contains(&streak);
            // The streak counter keeps running across color flips.
            if !held && streak % 2 == 1 {
                state.current_color = state.current_color.opposite();
            }
        }
    }
}

/// True when enough draws have piled up and no side bet is outstanding.
pub fn should_place_no_double(state: &GameState) -> bool {
    state.consecutive_draws >= NO_DOUBLE_DRAW_THRESHOLD && !state.no_double_pending
}

/// State after the side bet macro ran: pending flag set, stake back to base.
pub fn mark_no_double_placed(state: &GameState, config: &StrategyConfig) -> GameState {
    GameState {
        no_double_pending: true,
        current_bet: config.base_bet,
        ..state.clone()
    }
}

fn stake(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
