//! Batch outcome summary.

use serde::Serialize;

use crate::entry::{FileEntry, FileState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every entry is done.
    Success,
    /// Some entries are done, some failed.
    Partial,
    /// No entry is done.
    Failed,
    /// The batch had no entries.
    Empty,
}

/// Result of one pipeline pass. Counts cover the whole batch, not just the
/// entries this pass attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub done: usize,
    pub failed: usize,
    pub status: BatchStatus,
}

impl BatchReport {
    pub fn from_entries(attempted: usize, entries: &[FileEntry]) -> Self {
        let done = entries.iter().filter(|e| e.state() == FileState::Done).count();
        let failed = entries.iter().filter(|e| e.state() == FileState::Failed).count();

        let status = if entries.is_empty() {
            BatchStatus::Empty
        } else if done == entries.len() {
            BatchStatus::Success
        } else if done == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };

        Self {
            attempted,
            done,
            failed,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }
}
