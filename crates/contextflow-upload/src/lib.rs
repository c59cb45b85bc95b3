//! Multi-file upload pipeline for ContextFlow.
//!
//! An [`UploadBatch`] holds admitted files for one project. An
//! [`UploadPipeline`] pass moves each pending entry through content
//! acquisition and submission, isolating failures per entry.

pub mod batch;
pub mod category;
pub mod entry;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod report;

pub use batch::UploadBatch;
pub use category::detect_category;
pub use entry::{FileEntry, FileState, UploadReceipt};
pub use error::{PipelineError, Result};
pub use extract::{
    acquire_text, extractor_from_config, CommandExtractor, PlaceholderExtractor, TextExtractor,
};
pub use pipeline::UploadPipeline;
pub use report::{BatchReport, BatchStatus};
