//! Result watching: poll the dice area until it settles, then classify.
//!
//! A round's classifier budget is shared between transient retries on the
//! same frame and re-polls after an unparseable reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::detector::{Fingerprint, StabilityDetector};
use super::{CancelToken, Cancelled, EventBus, LoopTimings};
use crate::desktop::FrameSource;
use crate::types::{DiceRoll, Rect};
use crate::vision::{
    ClassifierError, DiceClassifier, DiceParser, DICE_MAX_TOKENS, DICE_PROMPT,
};

/// How waiting for a round result ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Dice read successfully on the given attempt (1-based).
    Classified { roll: DiceRoll, attempt: u32 },
    /// No stable, classifiable frame before the deadline.
    TimedOut,
    /// Every attempt was used up.
    Exhausted {
        attempts: u32,
        last_error: Option<ClassifierError>,
    },
    /// The classifier reported a failure that retrying cannot fix.
    Aborted(ClassifierError),
}

/// Result of classifying one stable frame.
enum FrameVerdict {
    Parsed(DiceRoll),
    /// Reply did not contain two dice; poll for a fresh stable frame.
    Unparsed,
    Done(WatchOutcome),
}

pub struct ResultWatcher {
    frames: Arc<dyn FrameSource>,
    classifier: Arc<dyn DiceClassifier>,
    parser: DiceParser,
    detector: StabilityDetector,
    dice_area: Rect,
    max_tokens: u32,
    timings: LoopTimings,
    events: EventBus,
}

impl ResultWatcher {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        classifier: Arc<dyn DiceClassifier>,
        parser: DiceParser,
        dice_area: Rect,
        timings: LoopTimings,
        events: EventBus,
    ) -> Self {
        Self {
            frames,
            classifier,
            parser,
            detector: StabilityDetector::default(),
            dice_area,
            max_tokens: DICE_MAX_TOKENS,
            timings,
            events,
        }
    }

    /// Completion budget per classification call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn detector(&self) -> &StabilityDetector {
        &self.detector
    }

    pub fn reset(&mut self) {
        self.detector.reset();
    }

    /// Wait for the dice to settle and read them.
    pub async fn watch(
        &mut self,
        cancel: &CancelToken,
        paused: &AtomicBool,
    ) -> Result<WatchOutcome, Cancelled> {
        self.detector.reset();
        let mut deadline = Instant::now() + self.timings.detection_timeout;
        let mut attempts = 0u32;
        let mut last_error: Option<ClassifierError> = None;
        let mut settled: Option<(Fingerprint, Instant)> = None;

        while Instant::now() < deadline {
            cancel.check()?;
            if paused.load(Ordering::SeqCst) {
                let paused_at = Instant::now();
                while paused.load(Ordering::SeqCst) {
                    cancel.sleep(self.timings.pause_check).await?;
                }
                // Paused time does not count, and pre-pause frames are stale.
                deadline += paused_at.elapsed();
                self.detector.reset();
                settled = None;
                continue;
            }

            let capture = tokio::select! {
                frame = tokio::time::timeout_at(deadline, self.frames.capture_region(self.dice_area)) => frame,
                _ = cancel.cancelled() => return Err(Cancelled),
            };
            let Ok(capture) = capture else {
                warn!("Dice area capture still pending at the deadline");
                break;
            };

            if let Some(frame) = capture {
                let window_stable = self.detector.add_frame(&frame);
                if let Some(fp) = self.detector.last_fingerprint().copied() {
                    let since = match settled {
                        Some((prev, since)) if prev == fp => since,
                        _ => {
                            let now = Instant::now();
                            settled = Some((fp, now));
                            now
                        }
                    };

                    if window_stable && since.elapsed() >= self.timings.stable_duration {
                        self.events.log("Dice area settled, classifying");
                        match self
                            .classify_frame(&frame, &mut attempts, &mut last_error, cancel)
                            .await?
                        {
                            FrameVerdict::Parsed(roll) => {
                                return Ok(WatchOutcome::Classified {
                                    roll,
                                    attempt: attempts,
                                })
                            }
                            FrameVerdict::Done(outcome) => return Ok(outcome),
                            FrameVerdict::Unparsed => {
                                if attempts >= self.timings.max_attempts {
                                    return Ok(WatchOutcome::Exhausted {
                                        attempts,
                                        last_error,
                                    });
                                }
                                self.detector.reset();
                                settled = None;
                            }
                        }
                    }
                }
            } else {
                debug!("Dice area capture unavailable");
            }

            cancel.sleep(self.timings.poll_interval).await?;
        }

        self.events.log("Timed out waiting for the round result");
        Ok(WatchOutcome::TimedOut)
    }

    /// Spend attempts on one frame until it parses, fails to parse, or the
    /// classifier gives up.
    async fn classify_frame(
        &self,
        frame: &[u8],
        attempts: &mut u32,
        last_error: &mut Option<ClassifierError>,
        cancel: &CancelToken,
    ) -> Result<FrameVerdict, Cancelled> {
        let max = self.timings.max_attempts;
        while *attempts < max {
            *attempts += 1;
            if *attempts > 1 {
                self.events.log(format!("Classification attempt {}/{max}", *attempts));
            }

            let call = self.classifier.classify(frame, DICE_PROMPT, self.max_tokens);
            let result = tokio::select! {
                r = call => r,
                _ = cancel.cancelled() => return Err(Cancelled),
            };

            match result {
                Ok(text) => {
                    return match self.parser.parse(&text) {
                        Some(roll) => {
                            self.events.log(format!(
                                "Dice read: blue {} red {} (attempt {})",
                                roll.blue, roll.red, *attempts
                            ));
                            Ok(FrameVerdict::Parsed(roll))
                        }
                        None => {
                            warn!(reply = %text.trim(), attempt = *attempts, "Unparseable classifier reply");
                            self.events
                                .log(format!("Could not parse reply '{}'", text.trim()));
                            Ok(FrameVerdict::Unparsed)
                        }
                    };
                }
                Err(e) if e.is_transient() => {
                    self.events.error(
                        format!("Classifier unavailable (attempt {}/{max})", *attempts),
                        Some(e.message.clone()),
                    );
                    *last_error = Some(e);
                    if *attempts < max {
                        cancel.sleep(self.timings.transient_backoff).await?;
                    }
                }
                Err(e) => {
                    self.events
                        .error("Classifier failed, giving up this round", Some(e.message.clone()));
                    return Ok(FrameVerdict::Done(WatchOutcome::Aborted(e)));
                }
            }
        }

        Ok(FrameVerdict::Done(WatchOutcome::Exhausted {
            attempts: *attempts,
            last_error: last_error.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
