//! In-memory channel fake (testing only)
//!
//! [`FakeChannel`] records every request it receives and answers from a
//! scripted responder, so dispatcher and pipeline behavior can be checked
//! without spawning a worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::channel::{Channel, RawResult};
use crate::envelope::encode_response;
use crate::request::Request;

type Responder = Box<dyn Fn(&Request) -> RawResult + Send + Sync>;

/// Scripted [`Channel`] that records calls.
pub struct FakeChannel {
    responder: Responder,
    delay: Option<Duration>,
    requests: Mutex<Vec<Request>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeChannel {
    /// Answer every call with `responder(request)`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Request) -> RawResult + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every call with `{success: true, data}`.
    pub fn succeeding(data: Value) -> Self {
        Self::new(move |_| worker_reply(&json!({"success": true, "data": data})))
    }

    /// Answer every call with `{success: false, error}`.
    pub fn failing(error: &str) -> Self {
        let payload = json!({"success": false, "error": error});
        Self::new(move |_| worker_reply(&payload))
    }

    /// Hold each call open for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Highest number of calls observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn call(&self, request: &Request) -> RawResult {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let raw = (self.responder)(request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        raw
    }
}

/// A clean worker exit whose stdout carries `payload` in a full envelope.
pub fn worker_reply(payload: &Value) -> RawResult {
    RawResult::exited(0, encode_response(payload))
}
