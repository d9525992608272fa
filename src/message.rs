use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a message accompanying a pipeline stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLevel::Info => write!(f, "info"),
            MessageLevel::Warning => write!(f, "warning"),
            MessageLevel::Error => write!(f, "error"),
        }
    }
}

/// A level-tagged message collected by a pipeline stage.
///
/// Stages never fail across their boundaries; they record what went wrong
/// here and degrade their output instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Error, text)
    }

    /// Join messages into the single string carried on an analysis section.
    /// Returns `None` when there is nothing to report.
    pub fn join(messages: &[Message]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }
        Some(
            messages
                .iter()
                .map(|m| format!("{}: {}", m.level, m.text))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
