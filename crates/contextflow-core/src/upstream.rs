//! Normalization of decoded results for request-handling layers.
//!
//! A caller such as an HTTP route gets either the unwrapped `data` or one
//! user-facing message with a status class. Transport diagnostics (which may
//! hold worker stderr) stay in [`UpstreamResponse::detail`] for operators.

use serde::Serialize;
use serde_json::Value;

use crate::envelope::Decoded;
use crate::error::ValidationError;

/// Status class of a normalized response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamStatus {
    Ok,
    /// Input rejected locally.
    BadInput,
    /// The worker could not be reached or did not answer usably.
    UpstreamUnavailable,
    /// The worker answered with an error.
    UpstreamError,
    /// Local failure unrelated to the worker.
    Internal,
}

impl UpstreamStatus {
    /// HTTP-style status code.
    pub fn code(&self) -> u16 {
        match self {
            UpstreamStatus::Ok => 200,
            UpstreamStatus::BadInput => 400,
            UpstreamStatus::UpstreamUnavailable => 503,
            UpstreamStatus::UpstreamError => 502,
            UpstreamStatus::Internal => 500,
        }
    }
}

/// What a request handler sends back to its own client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamResponse {
    pub status: UpstreamStatus,

    /// Unwrapped `data` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// User-facing error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Operator-only diagnostics; never serialized to clients.
    #[serde(skip)]
    pub detail: Option<String>,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == UpstreamStatus::Ok
    }

    fn failure(status: UpstreamStatus, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            status,
            data: None,
            message: Some(message.into()),
            detail,
        }
    }

    /// A request rejected before dispatch.
    pub fn bad_input(err: &ValidationError) -> Self {
        Self::failure(UpstreamStatus::BadInput, err.to_string(), None)
    }

    /// A local failure, such as an unreadable upload.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::failure(
            UpstreamStatus::Internal,
            "internal error",
            Some(detail.into()),
        )
    }
}

/// Map a decoded worker result onto a response.
pub fn normalize(decoded: Decoded) -> UpstreamResponse {
    match decoded {
        Decoded::Success(data) => UpstreamResponse {
            status: UpstreamStatus::Ok,
            data: Some(data),
            message: None,
            detail: None,
        },
        Decoded::ApplicationFailure(message) => {
            UpstreamResponse::failure(UpstreamStatus::UpstreamError, message, None)
        }
        Decoded::ProtocolFailure(message) => UpstreamResponse::failure(
            UpstreamStatus::UpstreamError,
            "the analysis service returned an error",
            Some(message),
        ),
        Decoded::TransportFailure(failure) => UpstreamResponse::failure(
            UpstreamStatus::UpstreamUnavailable,
            "the analysis service is unavailable",
            Some(failure.to_string()),
        ),
    }
}

/// Normalize a dispatcher outcome, local rejections included.
pub fn normalize_outcome(outcome: Result<Decoded, ValidationError>) -> UpstreamResponse {
    match outcome {
        Ok(decoded) => normalize(decoded),
        Err(err) => UpstreamResponse::bad_input(&err),
    }
}
