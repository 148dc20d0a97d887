//! DICEBOT: dice-betting automation agent
//!
//! Entry point. Loads configuration and the operator's settings record,
//! initialises structured logging, wires the classifier and desktop adapters
//! into the round orchestrator, and runs until Ctrl-C, a `q` on stdin, or
//! the game stopping on its own.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use dicebot::config;
use dicebot::dashboard;
use dicebot::desktop::command::{CommandFrameSource, CommandInputInjector};
use dicebot::desktop::{DryRunInjector, FrameSource, InputInjector};
use dicebot::engine::orchestrator::RoundOrchestrator;
use dicebot::engine::{GameEvent, LoopTimings};
use dicebot::storage;
use dicebot::types::GameState;
use dicebot::vision::openrouter::{self, OpenRouterClassifier};

const BANNER: &str = r#"
 ____ ___ ____ _____ ____   ___ _____
|  _ \_ _/ ___| ____| __ ) / _ \_   _|
| | | | | |   |  _| |  _ \| | | || |
| |_| | | |___| |___| |_) | |_| || |
|____/___\____|_____|____/ \___/ |_|

  Vision-driven dice betting agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(agent_name = %cfg.agent.name, dry_run = cfg.input.dry_run, "DICEBOT starting up");

    let settings = storage::load_settings(cfg.agent.settings_path.as_deref())?;
    let proxy = settings.proxy.enabled.then_some(&settings.proxy);
    if let Some(p) = proxy {
        p.validate().context("Proxy settings are invalid")?;
    }

    let classifier = OpenRouterClassifier::new(
        cfg.api_key(&settings)?,
        cfg.model(&settings),
        proxy,
    )?;

    if std::env::args().nth(1).as_deref() == Some("check") {
        return run_checks(&classifier, &settings.proxy).await;
    }

    if cfg.vision.provider != "openrouter" {
        warn!(provider = %cfg.vision.provider, "Unknown vision provider, using OpenRouter");
    }

    // -- Collaborators ---------------------------------------------------

    let frames: Arc<dyn FrameSource> = Arc::new(CommandFrameSource::new(&cfg.capture.command));
    let input: Arc<dyn InputInjector> = if cfg.input.dry_run {
        info!("Test mode: clicks are logged, not performed");
        Arc::new(DryRunInjector::new())
    } else {
        Arc::new(CommandInputInjector::new(&cfg.input.command))
    };

    let orchestrator = RoundOrchestrator::new(
        frames,
        input,
        Arc::new(classifier),
        LoopTimings::default(),
    )?
    .with_max_tokens(cfg.vision.max_tokens);

    // -- Dashboard -------------------------------------------------------

    if cfg.dashboard.enabled {
        let state = dashboard::new_state(GameState::new(&settings.strategy_config()));
        dashboard::spawn_event_pump(state.clone(), orchestrator.subscribe());
        if let Err(e) = dashboard::spawn_dashboard(state, cfg.dashboard.port).await {
            error!(error = %e, "Dashboard unavailable");
        }
    }

    // -- Game ------------------------------------------------------------

    let rois = settings.roi_set()?;
    let mut events = orchestrator.subscribe();
    orchestrator
        .start(settings.strategy_config(), rois)
        .await
        .context("Game could not start")?;

    info!("Commands: p = pause/resume, q = stop");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) => match cmd.trim() {
                    "p" | "pause" => {
                        if let Some(paused) = orchestrator.toggle_pause().await {
                            info!(paused, "Pause toggled");
                        }
                    }
                    "q" | "quit" | "stop" => break,
                    "" => {}
                    other => warn!(command = other, "Unknown command"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(GameEvent::Stopped { reason }) => {
                    warn!(%reason, "Game stopped");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    // -- Shutdown --------------------------------------------------------

    if let Some(final_state) = orchestrator.stop().await {
        info!(
            rounds = final_state.total_rounds,
            balance = final_state.balance,
            win_rate = final_state.win_rate(),
            "Final state"
        );
        if let Err(e) = storage::save_state(&final_state, cfg.agent.state_path.as_deref()) {
            error!(error = %e, "Failed to save final state");
        }
    }

    info!("DICEBOT shut down cleanly");
    Ok(())
}

/// Connectivity checks for the API key and, when enabled, the proxy.
async fn run_checks(
    classifier: &OpenRouterClassifier,
    proxy: &openrouter::ProxySettings,
) -> Result<()> {
    classifier.test_api_key().await?;
    println!("API key: OK");

    if proxy.enabled {
        let ip = openrouter::test_proxy(proxy).await?;
        println!("Proxy: OK (public IP {ip})");
    } else {
        println!("Proxy: disabled");
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dicebot=info"));

    if std::env::var("DICEBOT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
