//! Upload pipeline errors.

use contextflow_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

use crate::entry::FileState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: FileState, to: FileState },

    #[error("no entry with id {0}")]
    EntryNotFound(Uuid),

    #[error("entry {id} is {state} and cannot be changed")]
    EntryBusy { id: Uuid, state: FileState },

    #[error("content acquisition failed: {0}")]
    Acquisition(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
