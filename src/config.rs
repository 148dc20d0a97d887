//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. The
//! operator's game settings (regions, strategy, API key) live in the
//! settings record managed by `storage`; this file only wires the agent to
//! its environment.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::storage::SettingsRecord;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub vision: VisionConfig,
    pub capture: CaptureConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub settings_path: Option<String>,
    #[serde(default)]
    pub state_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    pub provider: String,
    /// Overrides the model stored in the settings record.
    #[serde(default)]
    pub model: Option<String>,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    crate::vision::DICE_MAX_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Shell command writing the region image to stdout.
    /// Placeholders: `{x} {y} {width} {height}`.
    pub command: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Shell command clicking a point. Placeholders: `{cx} {cy}`.
    pub command: String,
    /// Log clicks instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// API key from the settings record, falling back to the configured
    /// environment variable.
    pub fn api_key(&self, settings: &SettingsRecord) -> Result<SecretString> {
        if let Some(key) = settings.api_key() {
            return Ok(SecretString::new(key.to_string()));
        }
        Self::resolve_env(&self.vision.api_key_env)
            .map(SecretString::new)
            .context("No API key in settings and none in the environment")
    }

    /// Model to classify with: config override, then settings record.
    pub fn model(&self, settings: &SettingsRecord) -> Option<String> {
        self.vision
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| Some(settings.recognition_model.clone()))
    }
}
