//! End-to-end round loop scenarios.
//!
//! Each test starts a real `RoundOrchestrator` against the fakes in
//! `mock_desktop`, lets virtual time run, stops it, and checks the clicks,
//! the published states and the event log.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dicebot::desktop::FrameSource;
use dicebot::engine::orchestrator::RoundOrchestrator;
use dicebot::engine::{GameEvent, LoopTimings};
use dicebot::types::{BetColor, GamePhase, GameState, RoiName, RoiSet, StrategyConfig};
use dicebot::vision::ClassifierError;

use crate::mock_desktop::{
    make_rois, make_rois_without_macro, RecordingInjector, ScriptedClassifier, SettledFrames,
    StuckFrames,
};

struct Harness {
    orch: RoundOrchestrator,
    injector: Arc<RecordingInjector>,
    classifier: Arc<ScriptedClassifier>,
    events: Arc<Mutex<Vec<GameEvent>>>,
}

impl Harness {
    fn new(rois: &RoiSet, classifier: ScriptedClassifier) -> Self {
        Self::with_frames(rois, classifier, Arc::new(SettledFrames))
    }

    fn with_frames(
        rois: &RoiSet,
        classifier: ScriptedClassifier,
        frames: Arc<dyn FrameSource>,
    ) -> Self {
        let injector = Arc::new(RecordingInjector::new(rois.clone()));
        let classifier = Arc::new(classifier);
        let orch = RoundOrchestrator::new(
            frames,
            injector.clone(),
            classifier.clone(),
            LoopTimings::default(),
        )
        .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut rx = orch.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                sink.lock().unwrap().push(event);
            }
        });

        Self {
            orch,
            injector,
            classifier,
            events,
        }
    }

    async fn run(&self, config: StrategyConfig, rois: RoiSet, secs: u64) -> GameState {
        self.orch.start(config, rois).await.unwrap();
        tokio::time::sleep(Duration::from_secs(secs)).await;
        let state = self.orch.stop().await.expect("worker should stop in time");
        // let the collector drain the channel
        tokio::time::sleep(Duration::from_millis(10)).await;
        state
    }

    fn logs(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                GameEvent::Log(line) => Some(line.clone()),
                GameEvent::Error { message, cause } => Some(match cause {
                    Some(c) => format!("{message}: {c}"),
                    None => message.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn states(&self) -> Vec<GameState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                GameEvent::State(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// The first published state after each classified round.
    fn round_states(&self) -> Vec<GameState> {
        let mut out: Vec<GameState> = Vec::new();
        for s in self.states() {
            let seen = out.last().map(|l| l.total_rounds).unwrap_or(0);
            if s.total_rounds > seen {
                out.push(s);
            }
        }
        out
    }

    fn stop_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                GameEvent::Stopped { reason } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }
}

fn has_log(logs: &[String], needle: &str) -> bool {
    logs.iter().any(|l| l.contains(needle))
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_martingale_progression_and_color_switch() {
    // Red die always higher: blue loses twice, then the switch to red wins.
    let rois = make_rois();
    let h = Harness::new(&rois, ScriptedClassifier::always("1:5"));
    let final_state = h.run(StrategyConfig::default(), rois, 40).await;

    let rounds = h.round_states();
    assert!(rounds.len() >= 3, "only {} rounds ran", rounds.len());

    assert_eq!(rounds[0].current_bet, 20);
    assert_eq!(rounds[0].current_color, BetColor::Blue);
    assert_eq!(rounds[0].balance, -10);

    assert_eq!(rounds[1].current_bet, 40);
    assert_eq!(rounds[1].current_color, BetColor::Red);
    assert_eq!(rounds[1].balance, -30);
    assert_eq!(rounds[1].consecutive_losses, 0);

    assert_eq!(rounds[2].current_bet, 10);
    assert_eq!(rounds[2].current_color, BetColor::Red);
    assert_eq!(rounds[2].balance, 10);
    assert_eq!(rounds[2].wins, 1);

    use RoiName::*;
    let clicks = h.injector.clicks();
    assert_eq!(
        &clicks[..9],
        &[
            Bet10, BlueBet, // 10 on blue
            Bet10, BlueBet, MultiplierX2, // 20 on blue
            Bet10, RedBet, MultiplierX2, MultiplierX2, // 40 on red
        ]
    );

    assert!(!final_state.active);
    assert_eq!(final_state.total_rounds, final_state.wins + final_state.losses);

    let logs = h.logs();
    assert!(has_log(&logs, "Color switch: Blue -> Red"));
    assert!(has_log(&logs, "=== Dice statistics ==="));
    assert_eq!(h.stop_reasons(), vec!["Stopped by operator".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_no_double_macro_after_four_draws() {
    let rois = make_rois();
    let h = Harness::new(&rois, ScriptedClassifier::always("3:3"));
    h.run(StrategyConfig::default(), rois, 70).await;

    let rounds = h.round_states();
    assert!(rounds.len() >= 5, "only {} rounds ran", rounds.len());
    assert_eq!(rounds[3].consecutive_draws, 4);
    assert_eq!(rounds[3].current_bet, 160);
    assert_eq!(rounds[3].balance, -150);

    // Round five: macro resets the stake, then the draw costs bet and side bet.
    assert!(h
        .states()
        .iter()
        .any(|s| s.no_double_pending && s.current_bet == 10 && s.total_rounds == 4));
    assert_eq!(rounds[4].balance, -150 - 10 - 200_000);
    assert!(!rounds[4].no_double_pending);
    assert_eq!(rounds[4].draws, 5);
    assert_eq!(rounds[4].current_bet, 20);

    use RoiName::*;
    let clicks = h.injector.clicks();
    let start = clicks
        .iter()
        .position(|c| *c == ScrollRight)
        .expect("macro never ran");
    let normal_bets_before = clicks[..start]
        .iter()
        .filter(|c| matches!(c, BlueBet | RedBet))
        .count();
    assert_eq!(normal_bets_before, 4);

    let mut expected = vec![ScrollRight; 4];
    expected.extend([Bet20000, NoDouble]);
    expected.extend([ScrollLeft; 4]);
    assert_eq!(&clicks[start..start + 10], expected.as_slice());

    // Still drawing and no side bet outstanding: the next round is the macro again.
    if let Some(next) = clicks.get(start + 10) {
        assert_eq!(*next, ScrollRight);
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_double_skips_missing_regions() {
    let rois = make_rois_without_macro();
    let h = Harness::new(&rois, ScriptedClassifier::always("4:4"));
    h.run(StrategyConfig::default(), rois, 70).await;

    let rounds = h.round_states();
    assert!(rounds.len() >= 5, "only {} rounds ran", rounds.len());
    assert_eq!(rounds[4].balance, -150 - 10 - 200_000);

    assert!(h.injector.count(RoiName::Bet20000) >= 1);
    assert_eq!(h.injector.count(RoiName::NoDouble), 0);
    assert!(has_log(&h.logs(), "Region no_double not configured, step skipped"));
    assert!(has_log(&h.logs(), "Region scroll_right not configured, step skipped"));
}

#[tokio::test(start_paused = true)]
async fn test_no_double_disabled() {
    let rois = make_rois();
    let h = Harness::new(&rois, ScriptedClassifier::always("2:2"));
    let config = StrategyConfig {
        enable_no_double_bet: false,
        ..Default::default()
    };
    let final_state = h.run(config, rois, 70).await;

    assert!(final_state.consecutive_draws >= 5);
    assert!(!final_state.no_double_pending);
    assert_eq!(h.injector.count(RoiName::NoDouble), 0);
    assert_eq!(h.injector.count(RoiName::ScrollRight), 0);
}

// ---------------------------------------------------------------------------
// Classifier failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_transient_errors_retried_within_round() {
    let rois = make_rois();
    let script = vec![
        Err(ClassifierError::transient("HTTP 503")),
        Err(ClassifierError::transient("HTTP 502")),
    ];
    let h = Harness::new(&rois, ScriptedClassifier::new(script, "6:1"));
    h.run(StrategyConfig::default(), rois, 15).await;

    let rounds = h.round_states();
    assert!(!rounds.is_empty());
    assert_eq!(rounds[0].wins, 1);
    assert_eq!(rounds[0].balance, 10);
    assert!(h.classifier.calls() >= 3);

    let logs = h.logs();
    assert!(has_log(&logs, "Classification attempt 3/3"));
    assert!(has_log(&logs, "on attempt 3"));
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_skips_round_without_state_change() {
    let rois = make_rois();
    let script = vec![Err(ClassifierError::terminal("invalid API key"))];
    let h = Harness::new(&rois, ScriptedClassifier::new(script, "6:1"));
    h.run(StrategyConfig::default(), rois, 20).await;

    let logs = h.logs();
    assert!(has_log(&logs, "No result (terminal classifier error: invalid API key)"));

    // The skipped round bet 10 on blue; the next round bets the same again.
    use RoiName::*;
    assert_eq!(
        &h.injector.clicks()[..4],
        &[Bet10, BlueBet, Bet10, BlueBet]
    );
    let rounds = h.round_states();
    assert_eq!(rounds[0].total_rounds, 1);
    assert_eq!(rounds[0].wins, 1);
    assert_eq!(rounds[0].balance, 10);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_skip_round() {
    let rois = make_rois();
    let script = vec![
        Err(ClassifierError::transient("connection reset")),
        Err(ClassifierError::transient("connection reset")),
        Err(ClassifierError::transient("connection reset")),
    ];
    let h = Harness::new(&rois, ScriptedClassifier::new(script, "1:6"));
    h.run(StrategyConfig::default(), rois, 30).await;

    assert!(has_log(&h.logs(), "No result (classifier failed 3 times)"));
    let rounds = h.round_states();
    assert!(!rounds.is_empty());
    // First classified round is the second bet: a loss on blue.
    assert_eq!(rounds[0].total_rounds, 1);
    assert_eq!(rounds[0].losses, 1);
    assert_eq!(rounds[0].balance, -10);
}

// ---------------------------------------------------------------------------
// Sizing and control
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_unbuildable_bet_skips_round() {
    let rois = make_rois();
    let h = Harness::new(&rois, ScriptedClassifier::always("6:1"));
    let config = StrategyConfig {
        base_bet: 15,
        ..Default::default()
    };
    let final_state = h.run(config, rois, 10).await;

    assert_eq!(final_state.total_rounds, 0);
    assert_eq!(final_state.balance, 0);
    assert!(h.injector.clicks().is_empty());
    assert_eq!(h.classifier.calls(), 0);
    assert!(has_log(&h.logs(), "Bet cannot be built"));
}

#[tokio::test(start_paused = true)]
async fn test_pause_halts_rounds_until_resumed() {
    let rois = make_rois();
    let h = Harness::new(&rois, ScriptedClassifier::always("5:2"));
    h.orch.start(StrategyConfig::default(), rois).await.unwrap();

    // First round is classified by ~3 s; pause during its post-round wait.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.orch.toggle_pause().await, Some(true));
    tokio::time::sleep(Duration::from_secs(3)).await;

    let clicks = h.injector.clicks().len();
    let calls = h.classifier.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.injector.clicks().len(), clicks);
    assert_eq!(h.classifier.calls(), calls);
    assert_eq!(h.orch.phase().await, GamePhase::Paused);

    assert_eq!(h.orch.toggle_pause().await, Some(false));
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(h.injector.clicks().len() > clicks);

    let state = h.orch.stop().await.unwrap();
    assert!(!state.paused);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.states().iter().any(|s| s.paused));
}

#[tokio::test(start_paused = true)]
async fn test_hung_capture_skips_round_and_stops_cleanly() {
    let rois = make_rois();
    let frames = Arc::new(StuckFrames::default());
    let h = Harness::with_frames(&rois, ScriptedClassifier::always("5:1"), frames.clone());

    // Bet clicks take about 1 s; the detection deadline is 5 min after that.
    let state = h.run(StrategyConfig::default(), rois.clone(), 310).await;

    let logs = h.logs();
    assert!(has_log(&logs, "No result (timed out), skipping round"));
    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(state.total_rounds, 0);
    assert_eq!(state.balance, 0);
    // One hung capture in the first round, one in the round after the skip.
    assert_eq!(frames.captures(), 2);
    assert_eq!(h.stop_reasons(), vec!["Stopped by operator".to_string()]);

    assert_eq!(h.orch.phase().await, GamePhase::Idle);
    h.orch.start(StrategyConfig::default(), rois).await.unwrap();
    h.orch.stop().await.expect("worker should stop in time");
}
