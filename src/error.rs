//! Error types for the evaluation pipeline.
//!
//! Most failures are contained where they happen (a rule, a color
//! comparison, a chunk) and only logged. The variants here cover the
//! failures that do reach callers: option validation, queue item failures
//! and transport exhaustion, plus the per-rule errors the engine records.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("Unparseable color '{0}'")]
    UnparseableColor(String),

    #[error("Unknown rule '{0}'")]
    UnknownRule(String),

    #[error("Duplicate rule '{0}'")]
    DuplicateRule(String),

    #[error("Duplicate plugin '{0}'")]
    DuplicatePlugin(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Rule '{rule_id}' failed: {message}")]
    Rule { rule_id: String, message: String },

    #[error("Rule '{0}' panicked")]
    RulePanicked(String),

    #[error("Queue item failed: {0}")]
    QueueItem(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport gave up after {attempts} attempts")]
    TransportExhausted { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SweepError {
    /// Shorthand used by rules to report a failure tied to their id.
    pub fn rule(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        SweepError::Rule {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }

    /// Whether a transport retry could succeed after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SweepError::Transport(_) | SweepError::Http(_) | SweepError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_error_display() {
        let err = SweepError::rule("color-contrast", "no foreground");
        assert_eq!(
            err.to_string(),
            "Rule 'color-contrast' failed: no foreground"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(SweepError::Transport("503".to_string()).is_transient());
        assert!(!SweepError::InvalidOptions("chunk".to_string()).is_transient());
        assert!(!SweepError::TransportExhausted { attempts: 8 }.is_transient());
    }
}
