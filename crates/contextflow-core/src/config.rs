//! Bridge configuration.
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `CONTEXTFLOW_*` environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::LineSelection;
use crate::error::ConfigError;
use crate::request::{DocCategory, Operation};

/// Size ceiling shared by the upload admission check and the output cap.
pub const TEN_MIB: u64 = 10 * 1024 * 1024;

/// How to start the worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Working directory for the worker (inherited when `None`).
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the worker.
    pub env: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "mcp_server.server".to_string()],
            working_dir: Some(PathBuf::from("../backend")),
            env: HashMap::new(),
        }
    }
}

/// Per-operation deadline table, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Deadlines {
    /// Batch analysis; the longest budget.
    pub analyze_secs: u64,
    /// Document ingestion and indexing.
    pub upload_secs: u64,
    /// Interactive queries; the shortest budget.
    pub query_secs: u64,
    /// Project listing and principle lookup.
    pub catalog_secs: u64,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            analyze_secs: 300,
            upload_secs: 120,
            query_secs: 60,
            catalog_secs: 60,
        }
    }
}

impl Deadlines {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        let secs = match operation {
            Operation::Analyze => self.analyze_secs,
            Operation::Upload => self.upload_secs,
            Operation::Query => self.query_secs,
            Operation::ListProjects | Operation::GetPrinciples => self.catalog_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Output handling for the worker's streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Cap on captured bytes per stream.
    pub max_output_bytes: usize,

    /// Characters of stderr attached to failure messages.
    pub stderr_excerpt_chars: usize,

    /// Which protocol line wins when several are present.
    pub line_selection: LineSelection,

    /// How long to wait for output readers after the worker exits.
    pub drain_grace_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: TEN_MIB as usize,
            stderr_excerpt_chars: 500,
            line_selection: LineSelection::First,
            drain_grace_ms: 500,
        }
    }
}

/// Upload pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Per-file admission ceiling.
    pub max_file_bytes: u64,

    /// Entries driven at once (1 = sequential).
    pub concurrency: usize,

    /// Category used when no filename keyword matches.
    pub default_category: DocCategory,

    /// External PDF-to-text command; `{path}` is replaced with the file path.
    /// When unset, PDFs get a placeholder text and are extracted worker-side.
    pub extractor_command: Option<Vec<String>>,

    /// Deadline for one extractor run.
    pub extractor_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: TEN_MIB,
            concurrency: 1,
            default_category: DocCategory::Other,
            extractor_command: None,
            extractor_timeout_secs: 60,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextflowConfig {
    pub worker: WorkerConfig,
    pub deadlines: Deadlines,
    pub transport: TransportConfig,
    pub upload: UploadConfig,
}

impl ContextflowConfig {
    /// Load defaults, then the TOML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, "<inline>")
    }

    fn parse(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Every deadline, cap and concurrency setting must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 8] = [
            ("deadlines.analyze_secs", self.deadlines.analyze_secs),
            ("deadlines.upload_secs", self.deadlines.upload_secs),
            ("deadlines.query_secs", self.deadlines.query_secs),
            ("deadlines.catalog_secs", self.deadlines.catalog_secs),
            ("transport.max_output_bytes", self.transport.max_output_bytes as u64),
            ("upload.max_file_bytes", self.upload.max_file_bytes),
            ("upload.concurrency", self.upload.concurrency as u64),
            ("upload.extractor_timeout_secs", self.upload.extractor_timeout_secs),
        ];
        match checks.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field }),
            None => Ok(()),
        }
    }

    /// Apply `CONTEXTFLOW_*` overrides using `lookup` as the variable source.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup("CONTEXTFLOW_WORKER_PROGRAM") {
            self.worker.program = program;
        }
        if let Some(dir) = lookup("CONTEXTFLOW_WORKER_DIR") {
            self.worker.working_dir = Some(PathBuf::from(dir));
        }

        let secs = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or(ConfigError::InvalidEnv { var, value })
                })
                .transpose()
        };

        if let Some(v) = secs("CONTEXTFLOW_ANALYZE_TIMEOUT_SECS")? {
            self.deadlines.analyze_secs = v;
        }
        if let Some(v) = secs("CONTEXTFLOW_QUERY_TIMEOUT_SECS")? {
            self.deadlines.query_secs = v;
        }
        if let Some(v) = secs("CONTEXTFLOW_UPLOAD_TIMEOUT_SECS")? {
            self.deadlines.upload_secs = v;
        }
        if let Some(v) = secs("CONTEXTFLOW_UPLOAD_CONCURRENCY")? {
            self.upload.concurrency = v as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deadlines_are_ordered() {
        let d = Deadlines::default();
        let analyze = d.for_operation(Operation::Analyze);
        let upload = d.for_operation(Operation::Upload);
        let query = d.for_operation(Operation::Query);
        assert!(analyze > upload);
        assert!(upload > query);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [worker]
            program = "/opt/contextflow/bin/worker"

            [deadlines]
            query_secs = 15
        "#;
        let config = ContextflowConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.worker.program, "/opt/contextflow/bin/worker");
        assert_eq!(config.worker.args, WorkerConfig::default().args);
        assert_eq!(config.deadlines.query_secs, 15);
        assert_eq!(config.deadlines.analyze_secs, 300);
        assert_eq!(config.upload.max_file_bytes, TEN_MIB);
    }

    #[test]
    fn test_toml_line_selection_and_category() {
        let raw = r#"
            [transport]
            line_selection = "last"

            [upload]
            default_category = "chat"
            extractor_command = ["pdftotext", "{path}", "-"]
        "#;
        let config = ContextflowConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.transport.line_selection, LineSelection::Last);
        assert_eq!(config.upload.default_category, DocCategory::Chat);
        assert_eq!(config.upload.extractor_command.unwrap().len(), 3);
    }

    #[test]
    fn test_zero_values_in_toml_rejected() {
        for (raw, field) in [
            ("[deadlines]\nanalyze_secs = 0", "deadlines.analyze_secs"),
            ("[deadlines]\nquery_secs = 0", "deadlines.query_secs"),
            ("[deadlines]\ncatalog_secs = 0", "deadlines.catalog_secs"),
            ("[upload]\nconcurrency = 0", "upload.concurrency"),
            ("[upload]\nextractor_timeout_secs = 0", "upload.extractor_timeout_secs"),
        ] {
            match ContextflowConfig::from_toml_str(raw) {
                Err(ConfigError::Zero { field: got }) => assert_eq!(got, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_zero_deadline_in_config_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contextflow.toml");
        std::fs::write(&path, "[deadlines]\nupload_secs = 0\n").unwrap();

        let err = ContextflowConfig::load(Some(path.as_path())).unwrap_err();
        assert!(err.to_string().contains("deadlines.upload_secs"));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = ContextflowConfig::from_toml_str("[deadlines\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CONTEXTFLOW_WORKER_PROGRAM", "worker-bin"),
            ("CONTEXTFLOW_ANALYZE_TIMEOUT_SECS", "900"),
            ("CONTEXTFLOW_UPLOAD_CONCURRENCY", "4"),
        ]
        .into_iter()
        .collect();

        let mut config = ContextflowConfig::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.worker.program, "worker-bin");
        assert_eq!(config.deadlines.analyze_secs, 900);
        assert_eq!(config.upload.concurrency, 4);
        assert_eq!(config.deadlines.query_secs, 60);
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        let mut config = ContextflowConfig::default();
        let err = config
            .apply_env(|var| (var == "CONTEXTFLOW_QUERY_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CONTEXTFLOW_QUERY_TIMEOUT_SECS"));

        let err = config
            .apply_env(|var| (var == "CONTEXTFLOW_UPLOAD_TIMEOUT_SECS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
