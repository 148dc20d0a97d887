//! Session dice statistics: outcome frequencies and per-die face counts.

use serde::Serialize;
use std::fmt;

use crate::types::{percentage, GameState, RollHistory};

/// Outcomes listed in the report.
pub const TOP_OUTCOMES: usize = 10;

/// Trailing windows for the per-die breakdown. `None` means the whole history.
const WINDOWS: [Option<usize>; 4] = [None, Some(50), Some(25), Some(10)];

/// Face counts for both dice over a trailing window of rolls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceWindow {
    pub label: String,
    pub rolls: usize,
    /// Index 0 is face 1.
    pub blue: [u64; 6],
    pub red: [u64; 6],
}

impl FaceWindow {
    fn from_history(history: &RollHistory, window: Option<usize>) -> Self {
        let take = window.unwrap_or(history.len());
        let mut blue = [0u64; 6];
        let mut red = [0u64; 6];
        let mut rolls = 0;
        for roll in history.recent(take) {
            bump(&mut blue, roll.blue);
            bump(&mut red, roll.red);
            rolls += 1;
        }

        let label = match window {
            None => format!("all ({rolls})"),
            Some(n) => format!("last {n}"),
        };
        Self {
            label,
            rolls,
            blue,
            red,
        }
    }
}

/// Snapshot of the statistics for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiceStatistics {
    pub total_rounds: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub win_rate: f64,
    pub loss_rate: f64,
    pub draw_rate: f64,
    pub balance: i64,
    /// Most frequent outcomes, `("blue:red", count)`, most frequent first.
    pub top_outcomes: Vec<(String, u64)>,
    pub windows: Vec<FaceWindow>,
}

impl DiceStatistics {
    pub fn from_state(state: &GameState) -> Self {
        let mut outcomes: Vec<(String, u64)> = state
            .dice_outcome_counts
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        // Keys come from a BTreeMap, so ties stay in key order.
        outcomes.sort_by(|a, b| b.1.cmp(&a.1));
        outcomes.truncate(TOP_OUTCOMES);

        Self {
            total_rounds: state.total_rounds,
            wins: state.wins,
            losses: state.losses,
            draws: state.draws,
            win_rate: state.win_rate(),
            loss_rate: percentage(state.losses, state.total_rounds),
            draw_rate: state.draw_rate(),
            balance: state.balance,
            top_outcomes: outcomes,
            windows: WINDOWS
                .iter()
                .map(|w| FaceWindow::from_history(&state.roll_history, *w))
                .collect(),
        }
    }
}

impl fmt::Display for DiceStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Dice statistics ===")?;
        writeln!(f, "Rounds: {}", self.total_rounds)?;
        writeln!(f, "Wins:   {} ({:.1}%)", self.wins, self.win_rate)?;
        writeln!(f, "Losses: {} ({:.1}%)", self.losses, self.loss_rate)?;
        writeln!(f, "Draws:  {} ({:.1}%)", self.draws, self.draw_rate)?;
        writeln!(f, "Balance: {}", self.balance)?;

        if !self.top_outcomes.is_empty() {
            writeln!(f, "Top outcomes:")?;
            for (key, count) in &self.top_outcomes {
                writeln!(
                    f,
                    "  {key}  x{count} ({:.1}%)",
                    percentage(*count, self.total_rounds)
                )?;
            }
        }

        for window in &self.windows {
            if window.rolls == 0 {
                continue;
            }
            writeln!(f, "Faces, {}:", window.label)?;
            writeln!(f, "  blue {}", faces_line(&window.blue))?;
            writeln!(f, "  red  {}", faces_line(&window.red))?;
        }
        Ok(())
    }
}

fn bump(counts: &mut [u64; 6], face: u8) {
    if let Some(slot) = (face as usize).checked_sub(1).and_then(|i| counts.get_mut(i)) {
        *slot += 1;
    }
}

fn faces_line(counts: &[u64; 6]) -> String {
    counts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}:{c}", i + 1))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
