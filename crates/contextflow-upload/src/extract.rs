//! Content acquisition for upload entries.
//!
//! Plain-text formats are read straight from disk. Binary formats (PDF) go
//! through a [`TextExtractor`].

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contextflow_core::{FileType, UploadConfig};
use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Argument placeholder replaced by the file path in extractor commands.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Turns a binary document into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, name: &str) -> Result<String>;
}

/// Defers extraction to the worker by sending a marker text.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderExtractor;

#[async_trait]
impl TextExtractor for PlaceholderExtractor {
    async fn extract(&self, _path: &Path, name: &str) -> Result<String> {
        Ok(format!(
            "[PDF content from {name} - will be extracted during analysis]"
        ))
    }
}

/// Runs an external converter (for example `pdftotext {path} -`) and takes
/// its stdout as the document text.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self> {
        if command.is_empty() {
            return Err(PipelineError::Acquisition(
                "extractor command is empty".to_string(),
            ));
        }
        Ok(Self { command, timeout })
    }

    fn args_for(&self, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        let mut args: Vec<String> = self.command[1..]
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &path))
            .collect();
        if !self.command[1..].iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
            args.push(path.into_owned());
        }
        args
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract(&self, path: &Path, name: &str) -> Result<String> {
        let program = &self.command[0];
        let args = self.args_for(path);
        debug!(program = %program, file = %name, "Running text extractor");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Acquisition(format!("failed to start extractor '{program}': {e}"))
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::Acquisition(format!(
                    "extractor timed out after {} seconds on {name}",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| PipelineError::Acquisition(format!("extractor failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Acquisition(format!(
                "extractor exited with {} on {name}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            return Err(PipelineError::Acquisition(format!(
                "no text extracted from {name}"
            )));
        }
        Ok(text)
    }
}

/// Extractor selected by configuration: the command when set, else the placeholder.
pub fn extractor_from_config(config: &UploadConfig) -> Result<Arc<dyn TextExtractor>> {
    match &config.extractor_command {
        Some(command) => Ok(Arc::new(CommandExtractor::new(
            command.clone(),
            Duration::from_secs(config.extractor_timeout_secs),
        )?)),
        None => Ok(Arc::new(PlaceholderExtractor)),
    }
}

/// Get the text to upload for a file.
pub async fn acquire_text(
    extractor: &dyn TextExtractor,
    path: &Path,
    name: &str,
    file_type: FileType,
) -> Result<String> {
    if file_type.needs_extraction() {
        return extractor.extract(path, name).await;
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Acquisition(format!("failed to read {name}: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_placeholder_text() {
        let text = PlaceholderExtractor
            .extract(Path::new("/tmp/roadmap.pdf"), "roadmap.pdf")
            .await
            .unwrap();
        assert_eq!(
            text,
            "[PDF content from roadmap.pdf - will be extracted during analysis]"
        );
    }

    #[test]
    fn test_path_placeholder_substitution() {
        let extractor = CommandExtractor::new(
            vec!["pdftotext".into(), "{path}".into(), "-".into()],
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            extractor.args_for(&PathBuf::from("/data/a.pdf")),
            vec!["/data/a.pdf".to_string(), "-".to_string()]
        );
    }

    #[test]
    fn test_path_appended_without_placeholder() {
        let extractor =
            CommandExtractor::new(vec!["cat".into()], Duration::from_secs(5)).unwrap();
        assert_eq!(
            extractor.args_for(&PathBuf::from("/data/a.pdf")),
            vec!["/data/a.pdf".to_string()]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandExtractor::new(vec![], Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_command_extractor_reads_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, "extracted words").unwrap();

        let extractor = CommandExtractor::new(vec!["cat".into()], Duration::from_secs(5)).unwrap();
        let text = extractor.extract(&path, "doc.pdf").await.unwrap();
        assert_eq!(text, "extracted words");
    }

    #[tokio::test]
    async fn test_command_extractor_failure() {
        let extractor = CommandExtractor::new(
            vec!["sh".into(), "-c".into(), "echo broken >&2; exit 2".into()],
            Duration::from_secs(5),
        )
        .unwrap();
        let err = extractor
            .extract(Path::new("/tmp/x.pdf"), "x.pdf")
            .await
            .unwrap_err();
        match err {
            PipelineError::Acquisition(message) => assert!(message.contains("broken")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_extractor_timeout() {
        let extractor = CommandExtractor::new(
            vec!["sh".into(), "-c".into(), "exec sleep 30".into()],
            Duration::from_millis(200),
        )
        .unwrap();
        let err = extractor
            .extract(Path::new("/tmp/x.pdf"), "x.pdf")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_plain_text_read_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"caf\xe9 notes").unwrap();

        let text = acquire_text(&PlaceholderExtractor, &path, "notes.txt", FileType::Txt)
            .await
            .unwrap();
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" notes"));
    }

    #[tokio::test]
    async fn test_missing_file_is_acquisition_error() {
        let err = acquire_text(
            &PlaceholderExtractor,
            Path::new("/nonexistent/notes.md"),
            "notes.md",
            FileType::Md,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Acquisition(_)));
    }
}
