//! OpenRouter vision integration.
//!
//! Sends the stabilised dice image as a base64 data URL through OpenRouter's
//! OpenAI-compatible chat completions API. Failures are sorted into
//! transient and terminal here so the round loop never inspects strings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ClassifierError, DiceClassifier};
use crate::types::DicebotError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Endpoint echoing the caller's public IP, used to verify the proxy.
const IP_ECHO_URL: &str = "https://api.ipify.org?format=json";

pub const DEFAULT_MODEL: &str = "openai/gpt-5-chat";

/// Per-request timeout for classification calls.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the API-key and proxy connectivity checks.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply fragments that mean the upstream provider is briefly unavailable.
const TRANSIENT_MARKERS: [&str; 2] = ["upstream connect error", "Provider returned error"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyKind {
    #[default]
    Http,
    Socks5,
}

impl ProxyKind {
    fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }
}

/// Outbound proxy for the vision API, as stored in the settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ProxySettings {
    pub fn validate(&self) -> Result<(), DicebotError> {
        if !self.enabled {
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(DicebotError::InvalidConfig("proxy host is empty".into()));
        }
        if self.port == 0 {
            return Err(DicebotError::InvalidConfig(
                "proxy port must be between 1 and 65535".into(),
            ));
        }
        Ok(())
    }

    /// Proxy URL with percent-encoded credentials, when configured.
    pub fn url(&self) -> String {
        let auth = if self.username.is_empty() {
            String::new()
        } else {
            format!(
                "{}:{}@",
                urlencoding::encode(&self.username),
                urlencoding::encode(&self.password)
            )
        };
        format!(
            "{}://{}{}:{}",
            self.kind.scheme(),
            auth,
            self.host.trim(),
            self.port
        )
    }

    fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        reqwest::Proxy::all(self.url())
            .with_context(|| format!("Invalid proxy {}:{}", self.host, self.port))
    }
}

/// HTTP client honouring the proxy settings, if enabled.
fn build_http(proxy: Option<&ProxySettings>, timeout: Duration) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(proxy) = proxy.filter(|p| p.enabled) {
        proxy.validate()?;
        builder = builder.proxy(proxy.to_reqwest()?);
    }
    builder.build().context("Failed to build OpenRouter HTTP client")
}

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

/// `image/jpeg` when the JPEG signature is present, otherwise `image/png`.
fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn data_url(image: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        sniff_mime(image),
        base64::engine::general_purpose::STANDARD.encode(image)
    )
}

/// Map an HTTP status and body to a classifier error.
fn error_for_status(status: u16, body: &str) -> ClassifierError {
    let message = format!("HTTP {status}: {body}");
    if matches!(status, 502..=504) || is_transient_text(body) {
        ClassifierError::transient(message)
    } else {
        ClassifierError::terminal(message)
    }
}

fn is_transient_text(text: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Timeouts are terminal; failing to reach the provider at all is not.
fn error_for_transport(e: &reqwest::Error) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::terminal(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ClassifierError::transient(format!("Connection failed: {e}"))
    } else {
        ClassifierError::terminal(format!("Request error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClassifier {
    http: Client,
    api_key: SecretString,
    model: String,
}

impl OpenRouterClassifier {
    /// Create a new classifier.
    ///
    /// - `api_key`: OpenRouter API key.
    /// - `model`: Vision model ID, defaults to [`DEFAULT_MODEL`].
    /// - `proxy`: Optional outbound proxy; ignored unless enabled.
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        proxy: Option<&ProxySettings>,
    ) -> Result<Self> {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            http: build_http(proxy, CLASSIFY_TIMEOUT)?,
            api_key,
            model,
        })
    }

    fn request(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        self.http
            .post(OPENROUTER_API_URL)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/dicebot/dicebot")
            .header("X-Title", "DICEBOT")
            .json(body)
    }

    /// Send a tiny text prompt to confirm the key is accepted.
    pub async fn test_api_key(&self) -> Result<()> {
        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: 50,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![ContentPart::Text {
                    text: "Hello".to_string(),
                }],
            }],
        };

        let response = self
            .request(&body)
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .context("OpenRouter key check failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter rejected the API key ({status}): {text}");
        }
        info!(model = %self.model, "OpenRouter API key accepted");
        Ok(())
    }
}

/// Fetch the public IP seen through the proxy.
pub async fn test_proxy(proxy: &ProxySettings) -> Result<String> {
    let http = build_http(Some(proxy), CHECK_TIMEOUT)?;
    let echo: IpEcho = http
        .get(IP_ECHO_URL)
        .send()
        .await
        .context("Proxy check request failed")?
        .error_for_status()
        .context("Proxy check returned an error status")?
        .json()
        .await
        .context("Failed to parse IP echo response")?;
    info!(ip = %echo.ip, host = %proxy.host, "Proxy reachable");
    Ok(echo.ip)
}

// ---------------------------------------------------------------------------
// DiceClassifier implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl DiceClassifier for OpenRouterClassifier {
    async fn classify(
        &self,
        image: &[u8],
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ClassifierError> {
        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(image),
                        },
                    },
                ],
            }],
        };

        debug!(model = %self.model, bytes = image.len(), "Requesting dice classification");

        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = error_for_status(status.as_u16(), &text);
            warn!(status = %status, kind = %err.kind, "OpenRouter classification failed");
            return Err(err);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::terminal(format!("Unparseable response: {e}")))?;

        // Provider failures can arrive inside a 200 body.
        if let Some(api_error) = parsed.error {
            let code = api_error
                .code
                .as_ref()
                .and_then(|c| c.as_u64().or_else(|| c.as_str()?.parse().ok()))
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(200);
            return Err(error_for_status(code, &api_error.message));
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        debug!(reply = %text.trim(), "Classifier replied");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
