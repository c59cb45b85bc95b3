//! Dispatcher behavior over the in-memory channel fake.

use std::sync::Arc;
use std::time::Duration;

use contextflow_core::fakes::{worker_reply, FakeChannel};
use contextflow_core::{
    Decoded, Deadlines, Dispatcher, EnvelopeCodec, Operation, PrincipleFilter, RawResult,
    TransportFailure, TransportKind, ValidationError,
};
use serde_json::{json, Value};

fn dispatcher(fake: &Arc<FakeChannel>) -> Dispatcher {
    Dispatcher::new(fake.clone(), EnvelopeCodec::default(), Deadlines::default())
}

#[tokio::test]
async fn invalid_category_never_reaches_channel() {
    let fake = Arc::new(FakeChannel::succeeding(json!({})));
    let err = dispatcher(&fake)
        .upload("p-1", "notes.md", "md", "invalid_cat", "# Notes")
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::InvalidCategory("invalid_cat".to_string()));
    assert_eq!(fake.call_count(), 0);
}

#[tokio::test]
async fn invalid_file_type_never_reaches_channel() {
    let fake = Arc::new(FakeChannel::succeeding(json!({})));
    let err = dispatcher(&fake)
        .upload("p-1", "diagram.png", "png", "architecture", "bytes")
        .await
        .unwrap_err();

    assert!(matches!(err, ValidationError::UnsupportedFileType(_)));
    assert_eq!(fake.call_count(), 0);
}

#[tokio::test]
async fn missing_fields_are_rejected_locally() {
    let fake = Arc::new(FakeChannel::succeeding(json!({})));
    let d = dispatcher(&fake);

    assert_eq!(
        d.query("  ", Some("p-1")).await.unwrap_err(),
        ValidationError::MissingField("query")
    );
    assert_eq!(
        d.upload("p-1", "", "md", "prd", "text").await.unwrap_err(),
        ValidationError::MissingField("filename")
    );
    assert_eq!(
        d.upload("p-1", "a.md", "md", "prd", "\n").await.unwrap_err(),
        ValidationError::MissingField("content")
    );
    assert_eq!(fake.call_count(), 0);
}

#[tokio::test]
async fn each_operation_gets_its_configured_deadline() {
    let fake = Arc::new(FakeChannel::succeeding(json!({})));
    let deadlines = Deadlines {
        analyze_secs: 900,
        upload_secs: 90,
        query_secs: 20,
        catalog_secs: 10,
    };
    let d = Dispatcher::new(fake.clone(), EnvelopeCodec::default(), deadlines);

    d.analyze("p-1").await.unwrap();
    d.upload("p-1", "prd.md", "md", "prd", "# PRD").await.unwrap();
    d.query("why?", None).await.unwrap();
    d.list_projects().await.unwrap();

    let seen: Vec<(Operation, Duration)> = fake
        .requests()
        .iter()
        .map(|r| (r.operation(), r.deadline()))
        .collect();
    assert_eq!(
        seen,
        vec![
            (Operation::Analyze, Duration::from_secs(900)),
            (Operation::Upload, Duration::from_secs(90)),
            (Operation::Query, Duration::from_secs(20)),
            (Operation::ListProjects, Duration::from_secs(10)),
        ]
    );
}

#[tokio::test]
async fn upload_sends_worker_argument_names() {
    let fake = Arc::new(FakeChannel::succeeding(json!({"chunk_count": 3})));
    let decoded = dispatcher(&fake)
        .upload("p-1", "team-chat.txt", "txt", "chat", "alice: hi\nbob: hello")
        .await
        .unwrap();
    assert_eq!(decoded, Decoded::Success(json!({"chunk_count": 3})));

    let request = &fake.requests()[0];
    assert_eq!(request.operation().tool_name(), "contextflow_upload_document");
    let args = request.arguments();
    assert_eq!(args["project_id"], "p-1");
    assert_eq!(args["filename"], "team-chat.txt");
    assert_eq!(args["file_type"], "txt");
    assert_eq!(args["doc_category"], "chat");
    assert_eq!(args["content"], "alice: hi\nbob: hello");
}

#[tokio::test]
async fn application_failure_message_is_verbatim() {
    let fake = Arc::new(FakeChannel::failing("No documents to analyze"));
    let decoded = dispatcher(&fake).analyze("p-1").await.unwrap();
    assert_eq!(
        decoded,
        Decoded::ApplicationFailure("No documents to analyze".to_string())
    );
}

#[tokio::test]
async fn transport_failures_come_back_decoded() {
    let fake = Arc::new(FakeChannel::new(|_| {
        RawResult::failed(TransportFailure::new(TransportKind::Timeout, "deadline elapsed"))
    }));
    let decoded = dispatcher(&fake).analyze("p-1").await.unwrap();
    match decoded {
        Decoded::TransportFailure(failure) => assert_eq!(failure.kind, TransportKind::Timeout),
        other => panic!("expected TIMEOUT, got {other:?}"),
    }
}

#[tokio::test]
async fn scripted_responder_sees_each_request() {
    let fake = Arc::new(FakeChannel::new(|request| {
        let project = request.arguments()["project_id"].clone();
        worker_reply(&json!({"success": true, "data": {"project_id": project}}))
    }));
    let d = dispatcher(&fake);

    let a = d.analyze("alpha").await.unwrap().into_result().unwrap();
    let b = d.analyze("beta").await.unwrap().into_result().unwrap();
    assert_eq!(a["project_id"], "alpha");
    assert_eq!(b["project_id"], "beta");
}

// No cross-call deduplication: two concurrent analyze calls for the same
// project both reach the worker.
#[tokio::test]
async fn concurrent_analyze_calls_are_not_deduplicated() {
    let fake = Arc::new(
        FakeChannel::succeeding(json!({"principles_extracted": 2}))
            .with_delay(Duration::from_millis(100)),
    );
    let d = dispatcher(&fake);

    let (first, second) = tokio::join!(d.analyze("p-1"), d.analyze("p-1"));
    assert!(first.unwrap().is_success());
    assert!(second.unwrap().is_success());

    assert_eq!(fake.call_count(), 2);
    assert_eq!(fake.max_in_flight(), 2);
    for request in fake.requests() {
        assert_eq!(request.arguments()["project_id"], Value::from("p-1"));
    }
}

#[tokio::test]
async fn principles_filter_is_forwarded() {
    let fake = Arc::new(FakeChannel::succeeding(json!({"principles": []})));
    let filter = PrincipleFilter {
        category: Some("api_design".to_string()),
        source: Some("generic".to_string()),
        limit: Some(10),
    };
    dispatcher(&fake).principles(&filter).await.unwrap();

    let request = &fake.requests()[0];
    assert_eq!(request.operation(), Operation::GetPrinciples);
    assert_eq!(
        Value::Object(request.arguments().clone()),
        json!({"category": "api_design", "source": "generic", "limit": 10})
    );
}
