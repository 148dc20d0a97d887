//! Bet placement.
//!
//! Turns a bet decision into clicks on the configured regions. A normal bet
//! is one denomination button, the color area, then the X2 multiplier as
//! often as the sizing plan requires. The no-double side bet is a fixed
//! macro the game client layout depends on.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{CancelToken, Cancelled, EventBus, LoopTimings};
use crate::desktop::InputInjector;
use crate::strategy::sizing::{decompose, BetPlan, SizingError, NO_DOUBLE_DENOMINATION};
use crate::types::{BetColor, Rect, RoiName, RoiSet};

/// Scroll clicks on each side of the no-double macro.
pub const NO_DOUBLE_SCROLL_STEPS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error("region not configured: {0}")]
    MissingRegion(RoiName),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

// ---------------------------------------------------------------------------
// Placer
// ---------------------------------------------------------------------------

pub struct BetPlacer {
    input: Arc<dyn InputInjector>,
    rois: RoiSet,
    timings: LoopTimings,
    events: EventBus,
}

impl BetPlacer {
    pub fn new(
        input: Arc<dyn InputInjector>,
        rois: RoiSet,
        timings: LoopTimings,
        events: EventBus,
    ) -> Self {
        Self {
            input,
            rois,
            timings,
            events,
        }
    }

    /// Place `amount` on `color`. Returns the plan that was clicked.
    pub async fn place_bet(
        &self,
        amount: u64,
        color: BetColor,
        cancel: &CancelToken,
    ) -> Result<BetPlan, PlaceError> {
        let plan = decompose(amount, &self.rois.denominations())?;
        let button_name = RoiName::for_denomination(plan.base_denomination)
            .ok_or(SizingError::Unreachable { target: amount })?;
        let button = self.region(button_name)?;
        let color_area = self.region(match color {
            BetColor::Blue => RoiName::BlueBet,
            BetColor::Red => RoiName::RedBet,
        })?;
        let x2 = if plan.doubling_clicks > 0 {
            Some(self.region(RoiName::MultiplierX2)?)
        } else {
            None
        };

        self.events.log(format!("Placing {amount} on {color}"));

        self.click(button, &format!("chip {}", plan.base_denomination), cancel)
            .await?;
        self.click(color_area, &format!("{color} area"), cancel).await?;

        if let Some(x2) = x2 {
            self.events.log(format!(
                "Doubling from {}: {} x X2 -> {amount}",
                plan.base_denomination, plan.doubling_clicks
            ));
            for i in 0..plan.doubling_clicks {
                self.click(
                    x2,
                    &format!("X2 {}/{}", i + 1, plan.doubling_clicks),
                    cancel,
                )
                .await?;
                cancel.sleep(self.timings.between_clicks).await?;
            }
        }

        self.events.log(format!("Bet {amount} placed on {color}"));
        Ok(plan)
    }

    /// Run the no-double side bet macro: scroll right, pick the largest chip,
    /// tap no-double, scroll back. Steps whose region is missing are skipped
    /// with a warning.
    pub async fn place_no_double(&self, cancel: &CancelToken) -> Result<(), PlaceError> {
        self.events.log("Placing no-double bet");

        self.scroll(RoiName::ScrollRight, cancel).await?;
        cancel.sleep(self.timings.click_delay).await?;

        match self.rois.denomination_button(NO_DOUBLE_DENOMINATION) {
            Some(rect) => self.click(rect, "no-double chip", cancel).await?,
            None => self.warn_missing(RoiName::Bet20000),
        }
        cancel.sleep(self.timings.between_clicks).await?;

        match self.rois.get(RoiName::NoDouble) {
            Some(rect) => self.click(rect, "no-double", cancel).await?,
            None => self.warn_missing(RoiName::NoDouble),
        }
        cancel.sleep(self.timings.click_delay).await?;

        self.scroll(RoiName::ScrollLeft, cancel).await?;

        self.events.log("No-double bet placed");
        Ok(())
    }

    async fn scroll(&self, name: RoiName, cancel: &CancelToken) -> Result<(), Cancelled> {
        let Some(rect) = self.rois.get(name) else {
            self.warn_missing(name);
            return Ok(());
        };
        for i in 0..NO_DOUBLE_SCROLL_STEPS {
            self.click(
                rect,
                &format!("{name} {}/{NO_DOUBLE_SCROLL_STEPS}", i + 1),
                cancel,
            )
            .await?;
            cancel.sleep(self.timings.between_clicks).await?;
        }
        Ok(())
    }

    /// One atomic click. Cancellation is only honoured before it starts and
    /// a failed click is logged, not propagated.
    async fn click(&self, rect: Rect, label: &str, cancel: &CancelToken) -> Result<(), Cancelled> {
        cancel.check()?;
        debug!(label, region = %rect, "Click");
        if let Err(e) = self
            .input
            .click_region_center(rect, self.timings.click_delay)
            .await
        {
            self.events
                .error(format!("Click failed: {label}"), Some(format!("{e:#}")));
        }
        Ok(())
    }

    fn region(&self, name: RoiName) -> Result<Rect, PlaceError> {
        self.rois.get(name).ok_or(PlaceError::MissingRegion(name))
    }

    fn warn_missing(&self, name: RoiName) {
        warn!(region = %name, "Region not configured, step skipped");
        self.events
            .log(format!("Region {name} not configured, step skipped"));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
