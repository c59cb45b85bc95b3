//! ContextFlow Core Library
//!
//! Bridge from async Rust callers to the ContextFlow analysis worker: a
//! per-call process channel speaking line-delimited JSON-RPC, a layered
//! envelope decoder, and a dispatcher for the worker's operations.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod fakes;
pub mod request;
pub mod telemetry;
pub mod upstream;

pub use channel::{Channel, ProcessChannel, RawResult, STAGING_DIR_ENV};
pub use config::{ContextflowConfig, Deadlines, TransportConfig, UploadConfig, WorkerConfig, TEN_MIB};
pub use dispatcher::{Dispatcher, PrincipleFilter};
pub use envelope::{Decoded, EnvelopeCodec, LineSelection};
pub use error::{
    BridgeError, ConfigError, Result, TransportFailure, TransportKind, ValidationError,
};
pub use request::{DocCategory, FileType, Operation, PrincipleSource, Request};
pub use upstream::{normalize, normalize_outcome, UpstreamResponse, UpstreamStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
