//! Bet sizing against the fixed set of chip buttons.
//!
//! The game client only accepts a bet built from one denomination button
//! followed by some number of X2 multiplier clicks, so a target amount has
//! to be decomposed into `denomination * 2^k`.

use std::collections::BTreeSet;

use tracing::debug;

/// Every chip value the game client offers, ascending.
pub const DENOMINATIONS: [u64; 9] = [10, 50, 100, 500, 1_000, 2_000, 5_000, 10_000, 20_000];

/// Denomination used by the no-double side bet macro.
pub const NO_DOUBLE_DENOMINATION: u64 = 20_000;

/// How to click a bet together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetPlan {
    pub base_denomination: u64,
    pub doubling_clicks: u32,
}

impl BetPlan {
    /// The amount the plan produces.
    pub fn amount(&self) -> u64 {
        self.base_denomination << self.doubling_clicks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizingError {
    #[error("Bet {target} is not a denomination doubled any number of times")]
    Unreachable { target: u64 },
}

/// Decompose `target` into a configured button plus X2 clicks.
///
/// An exact button wins outright. Otherwise the largest button that doubles
/// exactly onto the target is chosen, regardless of how many clicks that
/// takes. Zero-valued entries are ignored.
pub fn decompose(target: u64, available: &BTreeSet<u64>) -> Result<BetPlan, SizingError> {
    if target > 0 && available.contains(&target) {
        return Ok(BetPlan {
            base_denomination: target,
            doubling_clicks: 0,
        });
    }

    for &denomination in available.iter().rev() {
        if denomination == 0 || denomination > target {
            continue;
        }

        let mut candidate = denomination;
        let mut clicks = 0u32;
        while candidate < target {
            match candidate.checked_mul(2) {
                Some(next) => {
                    candidate = next;
                    clicks += 1;
                }
                None => break,
            }
        }

        if candidate == target {
            debug!(target, denomination, clicks, "Bet decomposed");
            return Ok(BetPlan {
                base_denomination: denomination,
                doubling_clicks: clicks,
            });
        }
    }

    Err(SizingError::Unreachable { target })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
