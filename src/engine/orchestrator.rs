//! Round orchestration: the background worker that plays the game.
//!
//! `RoundOrchestrator` is the handle the binary and dashboard hold. It
//! validates settings, spawns one worker task per game and stops it with a
//! bounded join. The worker (`RoundLoop`) owns the `GameState` and publishes
//! snapshots on the event bus after every change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::executor::{BetPlacer, PlaceError};
use super::watcher::{ResultWatcher, WatchOutcome};
use super::{CancelToken, Cancelled, EventBus, GameEvent, LoopTimings};
use crate::desktop::{FrameSource, InputInjector};
use crate::strategy::stats::DiceStatistics;
use crate::strategy::{round_outcome, StakingEngine};
use crate::types::{
    DicebotError, GamePhase, GameState, RoiName, RoiSet, StrategyConfig, StrategyKind,
};
use crate::vision::{DiceClassifier, DiceParser, DICE_MAX_TOKENS};

/// Why the worker left its loop.
#[derive(Debug, thiserror::Error)]
enum LoopError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Fault(String),
}

impl From<Cancelled> for LoopError {
    fn from(_: Cancelled) -> Self {
        LoopError::Cancelled
    }
}

impl From<PlaceError> for LoopError {
    fn from(e: PlaceError) -> Self {
        match e {
            PlaceError::Cancelled(_) => LoopError::Cancelled,
            other => LoopError::Fault(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<Option<GameState>>,
}

impl Worker {
    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

pub struct RoundOrchestrator {
    frames: Arc<dyn FrameSource>,
    input: Arc<dyn InputInjector>,
    classifier: Arc<dyn DiceClassifier>,
    parser: DiceParser,
    max_tokens: u32,
    timings: LoopTimings,
    events: EventBus,
    paused: Arc<AtomicBool>,
    stopping: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl RoundOrchestrator {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        input: Arc<dyn InputInjector>,
        classifier: Arc<dyn DiceClassifier>,
        timings: LoopTimings,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            frames,
            input,
            classifier,
            parser: DiceParser::new()?,
            max_tokens: DICE_MAX_TOKENS,
            timings,
            events: EventBus::default(),
            paused: Arc::new(AtomicBool::new(false)),
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Completion budget per classification call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate the settings and spawn the round worker.
    ///
    /// A second start while a game runs is rejected. Invalid settings emit a
    /// `Stopped` event with the reason and the loop never starts.
    pub async fn start(&self, config: StrategyConfig, rois: RoiSet) -> Result<(), DicebotError> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            warn!("Start requested while a game is running");
            return Err(DicebotError::AlreadyRunning);
        }

        let dice_area = match config
            .validate()
            .and_then(|_| rois.validate())
            .and_then(|_| rois.get(RoiName::DiceArea).ok_or(DicebotError::MissingRegion(RoiName::DiceArea)))
        {
            Ok(rect) => rect,
            Err(e) => {
                self.events.error("Cannot start game", Some(e.to_string()));
                self.events.stopped(format!("Cannot start: {e}"));
                return Err(e);
            }
        };

        let (stop_tx, cancel) = CancelToken::channel();
        self.paused.store(false, Ordering::SeqCst);

        let round_loop = RoundLoop {
            state: GameState::started(&config),
            engine: StakingEngine::new(config),
            placer: BetPlacer::new(
                self.input.clone(),
                rois,
                self.timings,
                self.events.clone(),
            ),
            watcher: ResultWatcher::new(
                self.frames.clone(),
                self.classifier.clone(),
                self.parser.clone(),
                dice_area,
                self.timings,
                self.events.clone(),
            )
            .with_max_tokens(self.max_tokens),
            cancel,
            paused: self.paused.clone(),
            timings: self.timings,
            events: self.events.clone(),
        };

        info!(
            session_id = %round_loop.state.session_id,
            model = self.classifier.model_name(),
            "Starting round worker"
        );
        let handle = tokio::spawn(supervise(round_loop, self.events.clone()));
        *worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Flip the pause flag. Returns the new value, or `None` when no game
    /// is running.
    pub async fn toggle_pause(&self) -> Option<bool> {
        let worker = self.worker.lock().await;
        worker
            .as_ref()
            .filter(|w| !w.handle.is_finished() && !w.stop_requested())?;

        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        self.events
            .log(if paused { "Game paused" } else { "Game resumed" });
        Some(paused)
    }

    /// Signal the worker to stop and wait up to `stop_join` for it.
    ///
    /// Returns the final state when the worker exited in time. A worker that
    /// misses the deadline is detached but stays tracked, so `start` keeps
    /// refusing until it has actually exited.
    pub async fn stop(&self) -> Option<GameState> {
        let mut slot = self.worker.lock().await;
        let worker = slot.as_mut()?;
        self.stopping.store(true, Ordering::SeqCst);
        worker.stop_tx.send_replace(true);
        self.paused.store(false, Ordering::SeqCst);

        let joined = tokio::time::timeout(self.timings.stop_join, &mut worker.handle).await;
        self.stopping.store(false, Ordering::SeqCst);
        match joined {
            Ok(result) => {
                *slot = None;
                match result {
                    Ok(state) => state,
                    Err(e) => {
                        error!(error = %e, "Round worker failed");
                        None
                    }
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timings.stop_join.as_millis() as u64,
                    "Round worker did not stop in time, detaching"
                );
                None
            }
        }
    }

    pub async fn phase(&self) -> GamePhase {
        if self.stopping.load(Ordering::SeqCst) {
            return GamePhase::Stopping;
        }
        let worker = self.worker.lock().await;
        match worker.as_ref() {
            None => GamePhase::Idle,
            Some(w) if w.handle.is_finished() => GamePhase::Idle,
            Some(w) if w.stop_requested() => GamePhase::Stopping,
            Some(_) if self.paused.load(Ordering::SeqCst) => GamePhase::Paused,
            Some(_) => GamePhase::Running,
        }
    }
}

/// Run the loop in its own task so a panic is caught here and reported.
async fn supervise(round_loop: RoundLoop, events: EventBus) -> Option<GameState> {
    match tokio::spawn(round_loop.run()).await {
        Ok(state) => Some(state),
        Err(e) => {
            events.error("Round loop crashed", Some(e.to_string()));
            events.stopped(format!("Round loop crashed: {e}"));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct RoundLoop {
    state: GameState,
    engine: StakingEngine,
    placer: BetPlacer,
    watcher: ResultWatcher,
    cancel: CancelToken,
    paused: Arc<AtomicBool>,
    timings: LoopTimings,
    events: EventBus,
}

impl RoundLoop {
    async fn run(mut self) -> GameState {
        self.events
            .log(format!("Game started: {}", self.engine.config()));
        self.events.state(&self.state);

        let exit = self.play().await;

        self.state.active = false;
        self.state.paused = false;
        let reason = match exit {
            Ok(()) => "Game loop ended".to_string(),
            Err(LoopError::Cancelled) => "Stopped by operator".to_string(),
            Err(LoopError::Fault(e)) => {
                self.events.error("Round loop fault", Some(e.clone()));
                format!("Stopped after fault: {e}")
            }
        };

        self.events
            .log(DiceStatistics::from_state(&self.state).to_string());
        self.events.state(&self.state);
        self.events.stopped(reason);
        self.state
    }

    async fn play(&mut self) -> Result<(), LoopError> {
        loop {
            self.cancel.check()?;

            if self.paused.load(Ordering::SeqCst) {
                if !self.state.paused {
                    self.state.paused = true;
                    self.events.state(&self.state);
                }
                self.cancel.sleep(self.timings.pause_check).await?;
                continue;
            }
            if self.state.paused {
                self.state.paused = false;
                self.events.state(&self.state);
            }

            self.play_round().await?;
        }
    }

    async fn play_round(&mut self) -> Result<(), LoopError> {
        if self.engine.should_place_no_double(&self.state) {
            self.placer.place_no_double(&self.cancel).await?;
            self.state = self.engine.mark_no_double_placed(&self.state);
            self.events.log(format!(
                "Bet reset to base {} after no-double",
                self.state.current_bet
            ));
            self.events.state(&self.state);
        } else {
            let placed = self
                .placer
                .place_bet(self.state.current_bet, self.state.current_color, &self.cancel)
                .await;
            match placed {
                Ok(_) => {}
                Err(PlaceError::Sizing(e)) => {
                    self.events
                        .error("Bet cannot be built from the configured chips, round skipped", Some(e.to_string()));
                    self.cancel.sleep(self.timings.skip_round_wait).await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.events.log("Waiting for the round result");
        match self.watcher.watch(&self.cancel, &self.paused).await? {
            WatchOutcome::Classified { roll, attempt } => {
                let before = &self.state;
                let next = self.engine.apply_result(before, roll);

                self.events.log(format!(
                    "{}: blue {} red {} on attempt {attempt} | bet {} on {} | balance {}",
                    round_outcome(roll, before.current_color),
                    roll.blue,
                    roll.red,
                    before.current_bet,
                    before.current_color,
                    next.balance,
                ));
                if next.current_color != before.current_color {
                    self.events.log(format!(
                        "Color switch: {} -> {}",
                        before.current_color, next.current_color
                    ));
                }
                if self.engine.config().strategy == StrategyKind::Ladder
                    && next.current_bet != before.current_bet
                {
                    self.events.log(format!(
                        "Ladder: level {} -> {}, bet {} -> {}",
                        before.ladder_level, next.ladder_level, before.current_bet, next.current_bet
                    ));
                }

                self.state = next;
                self.events.state(&self.state);
                self.watcher.reset();

                self.cancel.sleep(self.timings.post_round_wait).await?;
            }
            other => {
                let why = match &other {
                    WatchOutcome::TimedOut => "timed out".to_string(),
                    WatchOutcome::Exhausted { attempts, .. } => {
                        format!("classifier failed {attempts} times")
                    }
                    WatchOutcome::Aborted(e) => e.to_string(),
                    WatchOutcome::Classified { .. } => String::new(),
                };
                self.events
                    .log(format!("No result ({why}), skipping round"));
                self.cancel.sleep(self.timings.skip_round_wait).await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::DryRunInjector;
    use crate::types::Rect;
    use crate::vision::ClassifierError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StillFrame;

    #[async_trait]
    impl FrameSource for StillFrame {
        async fn capture_region(&self, _rect: Rect) -> Option<Vec<u8>> {
            Some(vec![1, 2, 3])
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl DiceClassifier for Fixed {
        async fn classify(&self, _: &[u8], _: &str, _: u32) -> Result<String, ClassifierError> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn make_rois() -> RoiSet {
        let mut rois = RoiSet::new();
        for (i, name) in RoiName::ALL.iter().enumerate() {
            rois.insert(*name, Rect::new(i as i32 * 50, 0, 20, 20));
        }
        rois
    }

    fn make_orchestrator(reply: &'static str) -> RoundOrchestrator {
        RoundOrchestrator::new(
            Arc::new(StillFrame),
            Arc::new(DryRunInjector::new()),
            Arc::new(Fixed(reply)),
            LoopTimings::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_refused_with_stopped_event() {
        let orch = make_orchestrator("1:2");
        let mut rx = orch.subscribe();
        let cfg = StrategyConfig {
            base_bet: 1,
            ..Default::default()
        };

        let err = orch.start(cfg, make_rois()).await.unwrap_err();
        assert!(matches!(err, DicebotError::InvalidConfig(_)));
        assert_eq!(orch.phase().await, GamePhase::Idle);

        let mut saw_stopped = false;
        while let Ok(event) = rx.try_recv() {
            if let GameEvent::Stopped { reason } = event {
                assert!(reason.contains("base bet"));
                saw_stopped = true;
            }
        }
        assert!(saw_stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_region_refused() {
        let orch = make_orchestrator("1:2");
        let err = orch
            .start(StrategyConfig::default(), RoiSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, DicebotError::MissingRegion(RoiName::DiceArea));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let orch = make_orchestrator("1:2");
        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();
        assert_eq!(orch.phase().await, GamePhase::Running);
        assert_eq!(
            orch.start(StrategyConfig::default(), make_rois()).await,
            Err(DicebotError::AlreadyRunning)
        );
        orch.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_toggle() {
        let orch = make_orchestrator("1:2");
        assert_eq!(orch.toggle_pause().await, None);

        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();
        assert_eq!(orch.toggle_pause().await, Some(true));
        assert_eq!(orch.phase().await, GamePhase::Paused);
        assert_eq!(orch.toggle_pause().await, Some(false));
        assert_eq!(orch.phase().await, GamePhase::Running);
        orch.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_advance_state_and_stop_returns_it() {
        // Blue bet, blue die high: every round is a win.
        let orch = make_orchestrator("5:2");
        let mut rx = orch.subscribe();
        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();

        // Two full rounds: bet clicks, 1.5 s settle, 5 s post-round wait.
        tokio::time::sleep(Duration::from_secs(20)).await;
        let state = orch.stop().await.expect("worker should stop in time");

        assert!(!state.active);
        assert!(state.total_rounds >= 2);
        assert_eq!(state.wins, state.total_rounds);
        assert_eq!(state.balance, 10 * state.total_rounds as i64);
        assert_eq!(orch.phase().await, GamePhase::Idle);

        let mut reasons = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GameEvent::Stopped { reason } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec!["Stopped by operator".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let orch = make_orchestrator("2:2");
        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();
        orch.stop().await;
        assert!(orch.start(StrategyConfig::default(), make_rois()).await.is_ok());
        orch.stop().await;
    }

    /// Every click takes a minute to come back.
    struct SlowInjector;

    #[async_trait]
    impl InputInjector for SlowInjector {
        async fn click_region_center(&self, _rect: Rect, _post_delay: Duration) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_worker_detached_and_blocks_restart() {
        let orch = RoundOrchestrator::new(
            Arc::new(StillFrame),
            Arc::new(SlowInjector),
            Arc::new(Fixed("1:2")),
            LoopTimings::default(),
        )
        .unwrap();
        let mut rx = orch.subscribe();
        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The first click is still in flight when the join deadline passes.
        let stop_started = tokio::time::Instant::now();
        assert!(orch.stop().await.is_none());
        assert!(stop_started.elapsed() >= LoopTimings::default().stop_join);
        assert_eq!(orch.phase().await, GamePhase::Stopping);
        assert_eq!(orch.toggle_pause().await, None);
        assert_eq!(
            orch.start(StrategyConfig::default(), make_rois()).await,
            Err(DicebotError::AlreadyRunning)
        );

        // Once the click returns the worker sees the stop and exits.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(orch.phase().await, GamePhase::Idle);
        let mut reasons = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let GameEvent::Stopped { reason } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec!["Stopped by operator".to_string()]);

        orch.start(StrategyConfig::default(), make_rois()).await.unwrap();
        assert_eq!(orch.phase().await, GamePhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle() {
        let orch = make_orchestrator("1:2");
        assert!(orch.stop().await.is_none());
    }
}
