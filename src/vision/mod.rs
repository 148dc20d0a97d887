//! Dice recognition through a remote vision model.
//!
//! Defines the `DiceClassifier` trait, the structured error the round loop
//! uses to decide on retries, and the parser for the model's reply.

pub mod openrouter;

use async_trait::async_trait;
use regex::Regex;
use std::fmt;

use crate::types::DiceRoll;

/// Prompt sent with every dice image. Left die is blue, right die is red.
pub const DICE_PROMPT: &str = "The image shows two dice. The left die is blue and the right die \
is red. Reply with the number of pips on each die in the format left:right, for example 3:5. \
Reply with nothing else.";

/// Completion budget for a classification reply.
pub const DICE_MAX_TOKENS: u32 = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierErrorKind {
    /// Provider temporarily unavailable; worth retrying after a pause.
    Transient,
    /// Retrying will not help (auth, quota, bad request, timeout).
    Terminal,
}

impl fmt::Display for ClassifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierErrorKind::Transient => write!(f, "transient"),
            ClassifierErrorKind::Terminal => write!(f, "terminal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} classifier error: {message}")]
pub struct ClassifierError {
    pub kind: ClassifierErrorKind,
    pub message: String,
}

impl ClassifierError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ClassifierErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ClassifierErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ClassifierErrorKind::Transient
    }
}

// ---------------------------------------------------------------------------
// Classifier trait
// ---------------------------------------------------------------------------

/// Abstraction over vision models that read dice faces.
///
/// Implementors return the raw reply text; interpretation is left to
/// [`DiceParser`] so a reply that fails to parse can be retried by the
/// round loop.
#[async_trait]
pub trait DiceClassifier: Send + Sync {
    async fn classify(
        &self,
        image: &[u8],
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ClassifierError>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Extracts `left:right` die values from a model reply.
#[derive(Debug, Clone)]
pub struct DiceParser {
    pattern: Regex,
}

impl DiceParser {
    pub fn new() -> anyhow::Result<Self> {
        let pattern = Regex::new(r"(\d)\s*:\s*(\d)")
            .map_err(|e| anyhow::anyhow!("Invalid dice pattern: {e}"))?;
        Ok(Self { pattern })
    }

    /// First `d:d` pair in the text with both faces in 1..=6.
    pub fn parse(&self, text: &str) -> Option<DiceRoll> {
        let caps = self.pattern.captures(text.trim())?;
        let blue = caps.get(1)?.as_str().parse::<u8>().ok()?;
        let red = caps.get(2)?.as_str().parse::<u8>().ok()?;
        DiceRoll::new(blue, red).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_reply() {
        let parser = DiceParser::new().unwrap();
        let roll = parser.parse("3:5").unwrap();
        assert_eq!(roll.blue, 3);
        assert_eq!(roll.red, 5);
    }

    #[test]
    fn test_parse_with_surrounding_text() {
        let parser = DiceParser::new().unwrap();
        assert_eq!(
            parser.parse("  Result: 6 : 1\n"),
            Some(DiceRoll::new(6, 1).unwrap())
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let parser = DiceParser::new().unwrap();
        assert!(parser.parse("0:4").is_none());
        assert!(parser.parse("7:2").is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let parser = DiceParser::new().unwrap();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("I cannot see any dice").is_none());
        assert!(parser.parse("3-5").is_none());
    }

    #[test]
    fn test_error_kinds() {
        let t = ClassifierError::transient("503");
        assert!(t.is_transient());
        assert_eq!(t.to_string(), "transient classifier error: 503");
        assert!(!ClassifierError::terminal("401").is_transient());
    }
}
