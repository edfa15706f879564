//! Error types for the generation cycle and the remote service client.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EMPTY_RESPONSE_MESSAGE: &str = "No poem was generated. Please try again.";
pub const TRANSPORT_MESSAGE: &str =
    "Failed to generate poem. Please check your connection and try again.";

/// A request rejected before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a prompt.")]
    EmptyPrompt,

    #[error("{name} must be between {min} and {max}.")]
    OutOfRange {
        name: &'static str,
        min: String,
        max: String,
    },
}

impl ValidationError {
    pub fn out_of_range(name: &'static str, min: impl Display, max: impl Display) -> Self {
        Self::OutOfRange {
            name,
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Failure reaching the remote inference service.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

/// The user-visible outcome categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    EmptyResponse,
    Transport,
    Busy,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{}", EMPTY_RESPONSE_MESSAGE)]
    EmptyResponse,

    #[error("{}", TRANSPORT_MESSAGE)]
    Transport(#[source] GeneratorError),

    #[error("A poem is already being generated.")]
    Busy,

    #[error("Generation was cancelled.")]
    Cancelled,
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::EmptyResponse => ErrorKind::EmptyResponse,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Busy => ErrorKind::Busy,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(GeneratorError::Timeout(_)))
    }
}

impl From<GeneratorError> for CycleError {
    fn from(err: GeneratorError) -> Self {
        Self::Transport(err)
    }
}

pub type Result<T> = std::result::Result<T, CycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_hides_the_cause_from_the_message() {
        let err = CycleError::from(GeneratorError::Status {
            status: 503,
            body: "sleeping".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.to_string(), TRANSPORT_MESSAGE);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Unexpected status 503: sleeping"));
    }

    #[test]
    fn timeout_is_a_transport_failure() {
        let err = CycleError::from(GeneratorError::Timeout(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_timeout());
    }

    #[test]
    fn validation_keeps_its_own_message() {
        let err = CycleError::from(ValidationError::EmptyPrompt);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Please enter a prompt.");
    }
}
