//! Error taxonomy for the ContextFlow bridge.
//!
//! Ordered from most to least recoverable:
//! - [`ValidationError`]: rejected locally, before any worker is spawned
//! - [`TransportFailure`]: the worker could not be reached or answered garbage
//! - [`BridgeError::Protocol`]: the worker understood the call but reported a structural error
//! - [`BridgeError::Application`]: the operation ran and its business logic failed

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input rejected before any process or transport interaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("doc_category must be one of: architecture, prd, brd, chat, other (got '{0}')")]
    InvalidCategory(String),

    #[error("unsupported file type '{0}' (expected pdf, md or txt)")]
    UnsupportedFileType(String),

    #[error("file '{name}' is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("principle source must be 'generic' or 'user_derived' (got '{0}')")]
    InvalidPrincipleSource(String),
}

/// Which transport layer step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportKind {
    /// Worker program missing or not startable.
    SpawnError,
    /// Deadline elapsed; the worker was killed.
    Timeout,
    /// Worker exited nonzero without a parseable answer.
    ProcessExit,
    /// No protocol line on stdout.
    NoResponse,
    /// Protocol line was not a valid envelope.
    Malformed,
    /// Envelope text was not a valid application payload.
    MalformedPayload,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::SpawnError => "SPAWN_ERROR",
            TransportKind::Timeout => "TIMEOUT",
            TransportKind::ProcessExit => "PROCESS_EXIT",
            TransportKind::NoResponse => "NO_RESPONSE",
            TransportKind::Malformed => "MALFORMED",
            TransportKind::MalformedPayload => "MALFORMED_PAYLOAD",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure below the protocol: process, framing or parsing.
///
/// `message` may carry an excerpt of the worker's stderr. It is meant for
/// operators and must not be shown verbatim to end users.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Any failure surfaced by the bridge, with the original message kept intact.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportFailure),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Application(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Internal(err.to_string())
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("config value {field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_display_includes_kind() {
        let err = TransportFailure::new(TransportKind::Timeout, "deadline of 1s elapsed");
        assert_eq!(err.to_string(), "TIMEOUT: deadline of 1s elapsed");
    }

    #[test]
    fn test_transport_kind_serde_uses_wire_names() {
        let json = serde_json::to_string(&TransportKind::MalformedPayload).unwrap();
        assert_eq!(json, "\"MALFORMED_PAYLOAD\"");
    }

    #[test]
    fn test_application_error_message_is_verbatim() {
        let err = BridgeError::Application("No documents to analyze".to_string());
        assert_eq!(err.to_string(), "No documents to analyze");
    }

    #[test]
    fn test_validation_error_converts_into_bridge_error() {
        let err: BridgeError = ValidationError::InvalidCategory("invalid_cat".to_string()).into();
        assert!(err.to_string().contains("invalid_cat"));
        assert!(matches!(err, BridgeError::Validation(_)));
    }
}
