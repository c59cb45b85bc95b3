//! Upload pipeline: drives batch entries through acquisition and submission.

use std::sync::Arc;
use std::time::Instant;

use contextflow_core::Dispatcher;
use futures::stream::{self, StreamExt};
use tracing::{info, info_span, warn, Instrument};

use crate::batch::UploadBatch;
use crate::entry::{FileEntry, FileState, UploadReceipt};
use crate::error::Result;
use crate::extract::{acquire_text, TextExtractor};
use crate::report::BatchReport;

/// Uploads batch entries through a [`Dispatcher`].
pub struct UploadPipeline {
    dispatcher: Dispatcher,
    extractor: Arc<dyn TextExtractor>,
    concurrency: usize,
}

impl UploadPipeline {
    pub fn new(dispatcher: Dispatcher, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            dispatcher,
            extractor,
            concurrency: 1,
        }
    }

    /// Drive up to `n` entries at once (values below 1 mean sequential).
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run one pass over the batch.
    ///
    /// Only `Waiting` and `Failed` entries are driven; `Done` entries are left
    /// alone, so calling this again retries exactly the failures. A failing
    /// entry is recorded on the entry and never stops the pass.
    pub async fn run(&self, batch: &mut UploadBatch) -> BatchReport {
        let started = Instant::now();
        let project_id = batch.project_id().to_string();
        info!(
            project_id = %project_id,
            pending = batch.pending(),
            concurrency = self.concurrency,
            "Starting upload pass"
        );

        let eligible = batch
            .entries_mut()
            .iter_mut()
            .filter(|entry| entry.state().is_eligible());
        let attempted = stream::iter(eligible)
            .map(|entry| self.drive(&project_id, entry))
            .buffer_unordered(self.concurrency)
            .count()
            .await;

        let report = BatchReport::from_entries(attempted, batch.entries());
        info!(
            project_id = %project_id,
            attempted = report.attempted,
            done = report.done,
            failed = report.failed,
            status = ?report.status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Upload pass finished"
        );
        report
    }

    async fn drive(&self, project_id: &str, entry: &mut FileEntry) {
        let span = info_span!("upload_entry", file = %entry.name(), entry_id = %entry.id());
        async {
            match self.process(project_id, entry).await {
                Ok(()) if entry.state() == FileState::Done => info!(
                    chunks = entry.receipt().map(|r| r.chunk_count).unwrap_or(0),
                    "Uploaded"
                ),
                Ok(()) => warn!(error = entry.error().unwrap_or_default(), "Upload rejected"),
                Err(e) => {
                    warn!(state = %entry.state(), error = %e, "Upload failed");
                    if let Err(transition) = entry.fail(e.to_string()) {
                        warn!(error = %transition, "Could not mark entry failed");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, project_id: &str, entry: &mut FileEntry) -> Result<()> {
        entry.transition(FileState::AcquiringContent)?;
        let content = acquire_text(
            self.extractor.as_ref(),
            entry.path(),
            entry.name(),
            entry.file_type(),
        )
        .await?;

        entry.transition(FileState::Submitting)?;
        let decoded = self
            .dispatcher
            .upload(
                project_id,
                entry.name(),
                entry.file_type().as_str(),
                entry.category().as_str(),
                &content,
            )
            .await?;

        match decoded.into_result() {
            Ok(data) => entry.complete(UploadReceipt::from_data(&data)),
            Err(e) => entry.fail(e.to_string()),
        }
    }
}
