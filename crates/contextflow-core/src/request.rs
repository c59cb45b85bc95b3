//! Request shapes sent to the worker.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

/// JSON-RPC method used for every worker call.
pub const RPC_METHOD: &str = "tools/call";

/// Remote operations exposed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Run the learning engine over a project's unprocessed documents.
    Analyze,
    /// Retrieve context and principles for a free-text question.
    Query,
    /// Ingest and index one document.
    Upload,
    /// List known projects.
    ListProjects,
    /// Fetch stored engineering principles.
    GetPrinciples,
}

impl Operation {
    /// Tool name the worker registers this operation under.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Operation::Analyze => "contextflow_analyze_project",
            Operation::Query => "contextflow_query",
            Operation::Upload => "contextflow_upload_document",
            Operation::ListProjects => "contextflow_list_projects",
            Operation::GetPrinciples => "contextflow_get_principles",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Analyze => "analyze",
            Operation::Query => "query",
            Operation::Upload => "upload",
            Operation::ListProjects => "list_projects",
            Operation::GetPrinciples => "get_principles",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Document category accepted by the upload tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocCategory {
    Architecture,
    Prd,
    Brd,
    Chat,
    #[default]
    Other,
}

impl DocCategory {
    pub const ALL: [DocCategory; 5] = [
        DocCategory::Architecture,
        DocCategory::Prd,
        DocCategory::Brd,
        DocCategory::Chat,
        DocCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocCategory::Architecture => "architecture",
            DocCategory::Prd => "prd",
            DocCategory::Brd => "brd",
            DocCategory::Chat => "chat",
            DocCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for DocCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidCategory(s.to_string()))
    }
}

/// Accepted document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Md,
    Txt,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Md => "md",
            FileType::Txt => "txt",
        }
    }

    /// Resolve a file type from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Result<Self, ValidationError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        ext.parse()
    }

    /// Binary formats need an extraction step before their text can be sent.
    pub fn needs_extraction(&self) -> bool {
        matches!(self, FileType::Pdf)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "md" => Ok(FileType::Md),
            "txt" => Ok(FileType::Txt),
            other => Err(ValidationError::UnsupportedFileType(other.to_string())),
        }
    }
}

/// Provenance filter for stored principles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipleSource {
    Generic,
    UserDerived,
}

impl PrincipleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipleSource::Generic => "generic",
            PrincipleSource::UserDerived => "user_derived",
        }
    }
}

impl FromStr for PrincipleSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(PrincipleSource::Generic),
            "user_derived" => Ok(PrincipleSource::UserDerived),
            other => Err(ValidationError::InvalidPrincipleSource(other.to_string())),
        }
    }
}

/// One call to the worker. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    operation: Operation,
    arguments: Map<String, Value>,
    deadline: Duration,
}

impl Request {
    pub fn new(operation: Operation, arguments: Map<String, Value>, deadline: Duration) -> Self {
        Self {
            operation,
            arguments,
            deadline,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// The JSON-RPC message for this request.
    pub fn to_rpc_message(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": RPC_METHOD,
            "params": {
                "name": self.operation.tool_name(),
                "arguments": Value::Object(self.arguments.clone()),
            },
        })
    }

    /// Newline-terminated wire form written to the worker's stdin.
    pub fn to_rpc_line(&self) -> String {
        format!("{}\n", self.to_rpc_message())
    }
}
