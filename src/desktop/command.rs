//! Capture and input through external commands.
//!
//! Both adapters expand a shell command template and run it with `sh -c`.
//! Capture templates get `{x} {y} {width} {height}` and must write the image
//! to stdout; input templates get `{cx} {cy}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{FrameSource, InputInjector};
use crate::types::Rect;

/// Fill a capture template with the rectangle geometry.
pub fn expand_capture(template: &str, rect: Rect) -> String {
    template
        .replace("{x}", &rect.x.to_string())
        .replace("{y}", &rect.y.to_string())
        .replace("{width}", &rect.width.to_string())
        .replace("{height}", &rect.height.to_string())
}

/// Fill an input template with the rectangle's center point.
pub fn expand_click(template: &str, rect: Rect) -> String {
    let (cx, cy) = rect.center();
    template
        .replace("{cx}", &cx.to_string())
        .replace("{cy}", &cy.to_string())
}

/// Longest a single capture or click command may run.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

async fn run_shell(command_line: &str, limit: Duration) -> Result<Vec<u8>> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(limit, child)
        .await
        .map_err(|_| anyhow::anyhow!("Command timed out after {limit:?}: {command_line}"))?
        .with_context(|| format!("Failed to execute command: {command_line}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Command exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }
    Ok(output.stdout)
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

pub struct CommandFrameSource {
    template: String,
    timeout: Duration,
}

impl CommandFrameSource {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn capture_region(&self, rect: Rect) -> Option<Vec<u8>> {
        let command_line = expand_capture(&self.template, rect);
        match run_shell(&command_line, self.timeout).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                debug!(region = %rect, "Capture produced no bytes");
                None
            }
            Err(e) => {
                warn!(region = %rect, error = %e, "Capture failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

pub struct CommandInputInjector {
    template: String,
    timeout: Duration,
}

impl CommandInputInjector {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl InputInjector for CommandInputInjector {
    async fn click_region_center(&self, rect: Rect, post_delay: Duration) -> Result<()> {
        let command_line = expand_click(&self.template, rect);
        let result = run_shell(&command_line, self.timeout).await.map(|_| ());
        // Delay applies even when the click failed.
        tokio::time::sleep(post_delay).await;
        result.with_context(|| format!("Click at {rect} failed"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
