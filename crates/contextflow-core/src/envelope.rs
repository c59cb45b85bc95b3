//! Envelope codec: turns raw worker output into a typed [`Decoded`] result.
//!
//! The worker answers with a JSON-RPC envelope whose text content is itself a
//! serialized application payload. Decoding runs as an ordered pipeline and
//! each step fails with its own tag:
//!
//! 1. line extraction (stdout is shared with log noise)
//! 2. outer parse of `{error?, result?}`
//! 3. content extraction of `result.content[0].text`
//! 4. inner parse of `{success, data?, error?}`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::RawResult;
use crate::error::{BridgeError, TransportFailure, TransportKind};

/// Structural marker that starts a protocol line.
pub const PROTOCOL_MARKER: char = '{';

/// Which protocol line to pick when stdout carries more than one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineSelection {
    /// First marked line; the worker answers once per call.
    #[default]
    First,
    /// Last marked line, for transports that emit progress lines first.
    Last,
}

/// Outcome of one worker call. Exactly one tier is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The operation succeeded; carries the payload's `data`.
    Success(Value),
    /// The operation ran but its business logic failed.
    ApplicationFailure(String),
    /// The worker reported a structural error in its envelope.
    ProtocolFailure(String),
    /// Process, framing or parsing failure below the protocol.
    TransportFailure(TransportFailure),
}

impl Decoded {
    pub fn is_success(&self) -> bool {
        matches!(self, Decoded::Success(_))
    }

    /// Short tier label for logs.
    pub fn tier(&self) -> &'static str {
        match self {
            Decoded::Success(_) => "success",
            Decoded::ApplicationFailure(_) => "application_failure",
            Decoded::ProtocolFailure(_) => "protocol_failure",
            Decoded::TransportFailure(_) => "transport_failure",
        }
    }

    pub fn into_result(self) -> Result<Value, BridgeError> {
        match self {
            Decoded::Success(data) => Ok(data),
            Decoded::ApplicationFailure(message) => Err(BridgeError::Application(message)),
            Decoded::ProtocolFailure(message) => Err(BridgeError::Protocol(message)),
            Decoded::TransportFailure(failure) => Err(BridgeError::Transport(failure)),
        }
    }
}

/// Envelope decoder with its framing and excerpt settings.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    pub selection: LineSelection,
    pub stderr_excerpt_chars: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            selection: LineSelection::First,
            stderr_excerpt_chars: 500,
        }
    }
}

impl EnvelopeCodec {
    pub fn new(selection: LineSelection, stderr_excerpt_chars: usize) -> Self {
        Self {
            selection,
            stderr_excerpt_chars,
        }
    }

    /// Decode a raw channel result.
    pub fn decode(&self, raw: RawResult) -> Decoded {
        if let Some(failure) = raw.process_error {
            return Decoded::TransportFailure(failure);
        }

        // A signal-terminated worker has no exit code; treat it as a failed exit.
        let failed_exit = raw.exit_status.map_or(true, |code| code != 0);
        let stdout = String::from_utf8_lossy(&raw.stdout);

        let outer = select_protocol_line(&stdout, self.selection)
            .ok_or_else(|| {
                TransportFailure::new(
                    TransportKind::NoResponse,
                    "no protocol line in worker output",
                )
            })
            .and_then(parse_outer);

        match outer {
            Ok(envelope) => decode_envelope(envelope),
            Err(_) if failed_exit => {
                Decoded::TransportFailure(self.process_exit(raw.exit_status, &raw.stderr))
            }
            Err(failure) => Decoded::TransportFailure(failure),
        }
    }

    fn process_exit(&self, exit_status: Option<i32>, stderr: &[u8]) -> TransportFailure {
        let stderr = String::from_utf8_lossy(stderr);
        let stderr = stderr.trim();
        let status = exit_status.map_or_else(|| "signal".to_string(), |c| c.to_string());
        let message = if stderr.is_empty() {
            format!("worker exited with status {status} without output")
        } else {
            excerpt(stderr, self.stderr_excerpt_chars)
        };
        TransportFailure::new(TransportKind::ProcessExit, message)
    }
}

/// Decode stdout alone, as if the worker had exited cleanly.
pub fn decode_output(stdout: &str, selection: LineSelection) -> Decoded {
    match select_protocol_line(stdout, selection) {
        Some(line) => match parse_outer(line) {
            Ok(envelope) => decode_envelope(envelope),
            Err(failure) => Decoded::TransportFailure(failure),
        },
        None => Decoded::TransportFailure(TransportFailure::new(
            TransportKind::NoResponse,
            "no protocol line in worker output",
        )),
    }
}

/// Pick the protocol line out of noisy output. The marker must open the
/// line; indented log text is never a candidate.
pub fn select_protocol_line(stdout: &str, selection: LineSelection) -> Option<&str> {
    let mut candidates = stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| line.starts_with(PROTOCOL_MARKER));
    match selection {
        LineSelection::First => candidates.next(),
        LineSelection::Last => candidates.last(),
    }
}

fn parse_outer(line: &str) -> Result<Value, TransportFailure> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        TransportFailure::new(
            TransportKind::Malformed,
            format!("invalid envelope ({e}): {}", excerpt(line, 200)),
        )
    })?;
    if !value.is_object() {
        return Err(TransportFailure::new(
            TransportKind::Malformed,
            format!("envelope is not an object: {}", excerpt(line, 200)),
        ));
    }
    Ok(value)
}

fn decode_envelope(envelope: Value) -> Decoded {
    match envelope.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => {}
        Some(Value::String(message)) if message.is_empty() => {}
        Some(error) => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| error.as_str().map(str::to_string))
                .unwrap_or_else(|| "RPC error".to_string());
            return Decoded::ProtocolFailure(message);
        }
    }

    let text = envelope
        .pointer("/result/content/0/text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty());
    let Some(text) = text else {
        return Decoded::ProtocolFailure("empty result".to_string());
    };

    decode_payload(text)
}

fn decode_payload(text: &str) -> Decoded {
    let payload: Value = match serde_json::from_str(text) {
        Ok(payload) => payload,
        Err(e) => {
            return Decoded::TransportFailure(TransportFailure::new(
                TransportKind::MalformedPayload,
                format!("invalid payload ({e}): {}", excerpt(text, 200)),
            ))
        }
    };

    let Some(success) = payload.get("success").and_then(Value::as_bool) else {
        return Decoded::TransportFailure(TransportFailure::new(
            TransportKind::MalformedPayload,
            format!("payload has no boolean 'success': {}", excerpt(text, 200)),
        ));
    };

    if !success {
        let message = match payload.get("error") {
            Some(Value::String(message)) => message.clone(),
            None | Some(Value::Null) => "operation failed".to_string(),
            Some(other) => other.to_string(),
        };
        return Decoded::ApplicationFailure(message);
    }

    match payload.get("data") {
        None | Some(Value::Null) => Decoded::Success(json!({})),
        Some(data) => Decoded::Success(data.clone()),
    }
}

/// Wrap an application payload in a worker response line.
pub fn encode_response(payload: &Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "content": [{ "type": "text", "text": payload.to_string() }],
        },
    })
    .to_string()
}

/// Build a worker error response line.
pub fn encode_error(code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message },
    })
    .to_string()
}

/// Truncate to `max_chars`, marking the cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
