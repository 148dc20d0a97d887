//! Frame stability detection.
//!
//! Each captured frame is reduced to a SHA-256 fingerprint. The detector
//! keeps a short FIFO of fingerprints and reports stability once the most
//! recent `required_stable_frames` entries are identical.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// 32-byte content hash of one frame.
pub type Fingerprint = [u8; 32];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Fingerprints kept in the FIFO.
    pub max_history: usize,
    /// Identical trailing fingerprints needed to call the frame stable.
    pub required_stable_frames: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            required_stable_frames: 3,
        }
    }
}

/// Where the detector currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityPhase {
    /// No frames yet.
    Empty,
    /// Fewer frames than the stability window.
    Filling,
    Stable,
    Unstable,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StabilityDetector {
    config: DetectorConfig,
    history: VecDeque<Fingerprint>,
}

impl Default for StabilityDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl StabilityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        // A window larger than the FIFO could never be satisfied.
        let config = DetectorConfig {
            max_history: config.max_history.max(1),
            required_stable_frames: config
                .required_stable_frames
                .clamp(1, config.max_history.max(1)),
        };
        Self {
            config,
            history: VecDeque::with_capacity(config.max_history),
        }
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    /// Fingerprint and record a frame. Returns true when the trailing window
    /// is stable. Empty frames are ignored and return false.
    pub fn add_frame(&mut self, frame: &[u8]) -> bool {
        if frame.is_empty() {
            return false;
        }

        self.history.push_back(fingerprint(frame));
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        let k = self.config.required_stable_frames;
        if self.history.len() < k {
            return false;
        }
        let mut window = self.history.iter().skip(self.history.len() - k);
        match window.next() {
            Some(first) => window.all(|fp| fp == first),
            None => false,
        }
    }

    pub fn phase(&self) -> StabilityPhase {
        if self.history.is_empty() {
            StabilityPhase::Empty
        } else if self.history.len() < self.config.required_stable_frames {
            StabilityPhase::Filling
        } else if self.is_stable() {
            StabilityPhase::Stable
        } else {
            StabilityPhase::Unstable
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn frame_count(&self) -> usize {
        self.history.len()
    }

    pub fn last_fingerprint(&self) -> Option<&Fingerprint> {
        self.history.back()
    }

    /// Share of the trailing window held by its most common fingerprint.
    /// 0.0 with fewer than two frames.
    pub fn stability_score(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let window = self.config.required_stable_frames.min(self.history.len()).max(2);
        let start = self.history.len() - window;

        let mut counts: HashMap<&Fingerprint, usize> = HashMap::new();
        for fp in self.history.iter().skip(start) {
            *counts.entry(fp).or_insert(0) += 1;
        }
        let modal = counts.values().copied().max().unwrap_or(0);
        modal as f64 / window as f64
    }
}

/// SHA-256 of the raw frame bytes.
pub fn fingerprint(frame: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(frame);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
