//! Operation dispatcher.
//!
//! Turns typed operations into [`Request`]s, sends them over the shared
//! [`Channel`] and decodes the result. Input is validated before anything is
//! spawned; once a request reaches the channel every outcome comes back as a
//! [`Decoded`] value.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ProcessChannel};
use crate::config::{ContextflowConfig, Deadlines};
use crate::envelope::{Decoded, EnvelopeCodec};
use crate::error::ValidationError;
use crate::request::{DocCategory, FileType, Operation, PrincipleSource, Request};

/// Optional filters for a principles lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrincipleFilter {
    pub category: Option<String>,
    pub source: Option<String>,
    pub limit: Option<u32>,
}

/// Entry point for every remote operation.
#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    codec: EnvelopeCodec,
    deadlines: Deadlines,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn Channel>, codec: EnvelopeCodec, deadlines: Deadlines) -> Self {
        Self {
            channel,
            codec,
            deadlines,
        }
    }

    /// Build a dispatcher backed by a [`ProcessChannel`].
    pub fn from_config(config: &ContextflowConfig) -> Self {
        let channel = Arc::new(ProcessChannel::from_config(config));
        let codec = EnvelopeCodec::new(
            config.transport.line_selection,
            config.transport.stderr_excerpt_chars,
        );
        Self::new(channel, codec, config.deadlines.clone())
    }

    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    /// Analyze a project's unprocessed documents.
    pub async fn analyze(&self, project_id: &str) -> Result<Decoded, ValidationError> {
        let project_id = required("project_id", project_id)?;

        let mut args = Map::new();
        args.insert("project_id".to_string(), json!(project_id));
        Ok(self.dispatch(Operation::Analyze, args).await)
    }

    /// Ask a free-text question, optionally scoped to one project.
    pub async fn query(
        &self,
        text: &str,
        project_id: Option<&str>,
    ) -> Result<Decoded, ValidationError> {
        let text = required("query", text)?;
        // A blank project scope means no scope.
        let project_id = project_id.map(str::trim).filter(|p| !p.is_empty());

        let mut args = Map::new();
        args.insert("query".to_string(), json!(text));
        args.insert("project_id".to_string(), json!(project_id));
        Ok(self.dispatch(Operation::Query, args).await)
    }

    /// Upload one document's text for indexing.
    pub async fn upload(
        &self,
        project_id: &str,
        filename: &str,
        file_type: &str,
        category: &str,
        content: &str,
    ) -> Result<Decoded, ValidationError> {
        let project_id = required("project_id", project_id)?;
        let filename = required("filename", filename)?;
        let file_type: FileType = file_type.parse()?;
        let category: DocCategory = category.parse()?;
        if content.trim().is_empty() {
            return Err(ValidationError::MissingField("content"));
        }

        let mut args = Map::new();
        args.insert("project_id".to_string(), json!(project_id));
        args.insert("filename".to_string(), json!(filename));
        args.insert("file_type".to_string(), json!(file_type.as_str()));
        args.insert("doc_category".to_string(), json!(category.as_str()));
        args.insert("content".to_string(), json!(content));
        Ok(self.dispatch(Operation::Upload, args).await)
    }

    /// List known projects.
    pub async fn list_projects(&self) -> Result<Decoded, ValidationError> {
        Ok(self.dispatch(Operation::ListProjects, Map::new()).await)
    }

    /// Fetch stored principles, optionally filtered.
    pub async fn principles(&self, filter: &PrincipleFilter) -> Result<Decoded, ValidationError> {
        let mut args = Map::new();
        if let Some(category) = filter.category.as_deref().map(str::trim) {
            if !category.is_empty() {
                args.insert("category".to_string(), json!(category));
            }
        }
        if let Some(source) = filter.source.as_deref() {
            let source: PrincipleSource = source.trim().parse()?;
            args.insert("source".to_string(), json!(source.as_str()));
        }
        if let Some(limit) = filter.limit {
            args.insert("limit".to_string(), json!(limit));
        }
        Ok(self.dispatch(Operation::GetPrinciples, args).await)
    }

    async fn dispatch(&self, operation: Operation, args: Map<String, Value>) -> Decoded {
        let deadline = self.deadlines.for_operation(operation);
        let request = Request::new(operation, args, deadline);
        debug!(
            operation = %operation,
            deadline_ms = deadline.as_millis() as u64,
            "Dispatching request"
        );

        let raw = self.channel.call(&request).await;
        let decoded = self.codec.decode(raw);

        match &decoded {
            Decoded::Success(_) => info!(operation = %operation, "Operation succeeded"),
            Decoded::ApplicationFailure(message) => {
                info!(operation = %operation, error = %message, "Operation reported failure")
            }
            Decoded::ProtocolFailure(message) => {
                warn!(operation = %operation, error = %message, "Worker protocol error")
            }
            Decoded::TransportFailure(failure) => {
                warn!(operation = %operation, kind = %failure.kind, error = %failure.message, "Worker transport failure")
            }
        }
        decoded
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeChannel;

    fn dispatcher(fake: &Arc<FakeChannel>) -> Dispatcher {
        Dispatcher::new(fake.clone(), EnvelopeCodec::default(), Deadlines::default())
    }

    #[tokio::test]
    async fn test_blank_project_id_is_missing_field() {
        let fake = Arc::new(FakeChannel::succeeding(json!({})));
        let err = dispatcher(&fake).analyze("   ").await.unwrap_err();
        assert_eq!(err, ValidationError::MissingField("project_id"));
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_query_without_project_sends_null() {
        let fake = Arc::new(FakeChannel::succeeding(json!({"principles": []})));
        let decoded = dispatcher(&fake).query("how do we version APIs?", None).await.unwrap();
        assert!(decoded.is_success());

        let sent = fake.requests();
        assert_eq!(sent[0].arguments()["project_id"], Value::Null);
        assert_eq!(sent[0].arguments()["query"], "how do we version APIs?");
    }

    #[tokio::test]
    async fn test_principles_rejects_unknown_source() {
        let fake = Arc::new(FakeChannel::succeeding(json!({})));
        let filter = PrincipleFilter {
            source: Some("vendor".to_string()),
            ..Default::default()
        };
        let err = dispatcher(&fake).principles(&filter).await.unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPrincipleSource(_)));
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_principles_omits_unset_filters() {
        let fake = Arc::new(FakeChannel::succeeding(json!({"principles": []})));
        let filter = PrincipleFilter {
            source: Some("user_derived".to_string()),
            limit: Some(5),
            ..Default::default()
        };
        dispatcher(&fake).principles(&filter).await.unwrap();

        let args = fake.requests()[0].arguments().clone();
        assert_eq!(args.len(), 2);
        assert_eq!(args["source"], "user_derived");
        assert_eq!(args["limit"], 5);
    }
}
