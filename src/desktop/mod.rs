//! Desktop collaborators: screen capture and synthetic input.
//!
//! The round loop only sees the two traits below. `command` provides
//! implementations that shell out to configured tools; `DryRunInjector`
//! stands in for real input when the agent runs in test mode.

pub mod command;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::types::Rect;

/// Grabs pixels from a screen rectangle.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Encoded image bytes of the region, or `None` when capture failed.
    async fn capture_region(&self, rect: Rect) -> Option<Vec<u8>>;
}

/// Clicks on screen regions.
#[async_trait]
pub trait InputInjector: Send + Sync {
    /// Click the center of `rect`, then wait `post_delay`. The click and its
    /// delay run to completion once started.
    async fn click_region_center(&self, rect: Rect, post_delay: Duration) -> Result<()>;
}

/// Logs clicks instead of performing them.
#[derive(Debug, Default)]
pub struct DryRunInjector {
    clicks: AtomicU64,
}

impl DryRunInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clicks logged so far.
    pub fn click_count(&self) -> u64 {
        self.clicks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InputInjector for DryRunInjector {
    async fn click_region_center(&self, rect: Rect, post_delay: Duration) -> Result<()> {
        let (cx, cy) = rect.center();
        self.clicks.fetch_add(1, Ordering::Relaxed);
        info!(x = cx, y = cy, "[DRY RUN] Would click");
        tokio::time::sleep(post_delay).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
