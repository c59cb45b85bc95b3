//! Per-file upload state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use contextflow_core::{DocCategory, FileType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Lifecycle of one file in a batch.
///
/// ```text
/// Waiting -> AcquiringContent -> Submitting -> Done
///                  |                 |
///                  +----> Failed <---+
///                           |
///                           +--> AcquiringContent (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Waiting,
    AcquiringContent,
    Submitting,
    Done,
    Failed,
}

impl FileState {
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Waiting, AcquiringContent)
                | (AcquiringContent, Submitting)
                | (AcquiringContent, Failed)
                | (Submitting, Done)
                | (Submitting, Failed)
                | (Failed, AcquiringContent)
        )
    }

    /// Whether a batch pass should drive an entry in this state.
    pub fn is_eligible(self) -> bool {
        matches!(self, FileState::Waiting | FileState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileState::Waiting => "waiting",
            FileState::AcquiringContent => "acquiring_content",
            FileState::Submitting => "submitting",
            FileState::Done => "done",
            FileState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the worker reported for an indexed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub document_id: Option<String>,
    pub chunk_count: u64,
    pub char_count: Option<u64>,
}

impl UploadReceipt {
    /// Read the receipt out of an upload result's `data`. Missing fields default.
    pub fn from_data(data: &Value) -> Self {
        Self {
            document_id: data
                .get("document_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            chunk_count: data.get("chunk_count").and_then(Value::as_u64).unwrap_or(0),
            char_count: data.get("char_count").and_then(Value::as_u64),
        }
    }
}

/// One file in an upload batch.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    id: Uuid,
    name: String,
    path: PathBuf,
    size: u64,
    file_type: FileType,
    category: DocCategory,
    state: FileState,
    error: Option<String>,
    receipt: Option<UploadReceipt>,
    attempts: u32,
    updated_at: DateTime<Utc>,
}

impl FileEntry {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
        file_type: FileType,
        category: DocCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            size,
            file_type,
            category,
            state: FileState::Waiting,
            error: None,
            receipt: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn category(&self) -> DocCategory {
        self.category
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Last failure message, cleared when a retry starts.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn receipt(&self) -> Option<&UploadReceipt> {
        self.receipt.as_ref()
    }

    /// Number of times acquisition was started for this entry.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn set_category(&mut self, category: DocCategory) {
        self.category = category;
        self.updated_at = Utc::now();
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: FileState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == FileState::AcquiringContent {
            self.attempts += 1;
            self.error = None;
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure and move to `Failed`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(FileState::Failed)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// Record the worker's receipt and move to `Done`.
    pub fn complete(&mut self, receipt: UploadReceipt) -> Result<()> {
        self.transition(FileState::Done)?;
        self.receipt = Some(receipt);
        Ok(())
    }
}
