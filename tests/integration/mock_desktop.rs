//! In-memory desktop and classifier fakes for integration testing.
//!
//! The frame source always shows the same settled dice, the injector records
//! every click by region, and the classifier replays a script of replies
//! before falling back to a fixed answer. No process, screen or network is
//! touched.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dicebot::desktop::{FrameSource, InputInjector};
use dicebot::types::{Rect, RoiName, RoiSet};
use dicebot::vision::{ClassifierError, DiceClassifier};

/// A full layout with a distinct rectangle per region.
pub fn make_rois() -> RoiSet {
    let mut rois = RoiSet::new();
    for (i, name) in RoiName::ALL.iter().enumerate() {
        rois.insert(*name, Rect::new(i as i32 * 40, 600, 30, 30));
    }
    rois
}

/// A layout without the optional no-double macro regions.
pub fn make_rois_without_macro() -> RoiSet {
    let mut rois = RoiSet::new();
    for (i, name) in RoiName::ALL.iter().enumerate() {
        if matches!(
            name,
            RoiName::ScrollLeft | RoiName::ScrollRight | RoiName::NoDouble
        ) {
            continue;
        }
        rois.insert(*name, Rect::new(i as i32 * 40, 600, 30, 30));
    }
    rois
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Always returns the same image: the dice area settles immediately.
pub struct SettledFrames;

#[async_trait]
impl FrameSource for SettledFrames {
    async fn capture_region(&self, _rect: Rect) -> Option<Vec<u8>> {
        Some(vec![0x89, b'P', b'N', b'G', 7, 7, 7])
    }
}

/// A capture tool that hangs: the first capture never returns.
#[derive(Default)]
pub struct StuckFrames {
    captures: Mutex<u32>,
}

impl StuckFrames {
    pub fn captures(&self) -> u32 {
        *self.captures.lock().unwrap()
    }
}

#[async_trait]
impl FrameSource for StuckFrames {
    async fn capture_region(&self, _rect: Rect) -> Option<Vec<u8>> {
        *self.captures.lock().unwrap() += 1;
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Records the region behind every click.
pub struct RecordingInjector {
    rois: RoiSet,
    clicks: Arc<Mutex<Vec<RoiName>>>,
}

impl RecordingInjector {
    pub fn new(rois: RoiSet) -> Self {
        Self {
            rois,
            clicks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn clicks(&self) -> Vec<RoiName> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn count(&self, name: RoiName) -> usize {
        self.clicks().iter().filter(|c| **c == name).count()
    }
}

#[async_trait]
impl InputInjector for RecordingInjector {
    async fn click_region_center(&self, rect: Rect, post_delay: Duration) -> Result<()> {
        let name = self
            .rois
            .to_regions()
            .into_iter()
            .find(|r| r.rect == rect)
            .map(|r| r.name)
            .ok_or_else(|| anyhow::anyhow!("click outside any region: {rect}"))?;
        self.clicks.lock().unwrap().push(name);
        tokio::time::sleep(post_delay).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Replays scripted replies, then answers `fallback` forever.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<String, ClassifierError>>>,
    fallback: String,
    calls: Mutex<u32>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Result<String, ClassifierError>>, fallback: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: fallback.to_string(),
            calls: Mutex::new(0),
        }
    }

    /// Same reply on every call.
    pub fn always(reply: &str) -> Self {
        Self::new(Vec::new(), reply)
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl DiceClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        image: &[u8],
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ClassifierError> {
        assert!(!image.is_empty());
        assert!(!prompt.is_empty());
        assert!(max_tokens > 0);
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
