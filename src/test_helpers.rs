//! Shared test utilities: a scripted speech engine, a recording notifier,
//! and a local stub of the chat-completion endpoint.
//!
//! Available only under `#[cfg(test)]`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::notifier::{Notice, Notify};
use crate::speech::engine::{Completion, SpeechEngine, Utterance};
use crate::speech::voice::Voice;

// ============================================================================
// FakeEngine
// ============================================================================

#[derive(Default)]
struct FakeState {
    started: Vec<Utterance>,
    pending: Option<oneshot::Sender<Result<(), String>>>,
    active_text: Option<String>,
    cancels: usize,
    fail_next: Option<String>,
}

/// Speech engine whose utterances only finish when the test says so.
#[derive(Default)]
pub struct FakeEngine {
    voices: Vec<Voice>,
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voices(voices: Vec<Voice>) -> Self {
        Self {
            voices,
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<Utterance> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn active_text(&self) -> Option<String> {
        self.state.lock().unwrap().active_text.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    pub fn fail_next_start(&self, reason: &str) {
        self.state.lock().unwrap().fail_next = Some(reason.to_string());
    }

    /// Settle the active utterance.
    pub fn finish(&self, result: Result<(), String>) {
        let mut state = self.state.lock().unwrap();
        state.active_text = None;
        if let Some(tx) = state.pending.take() {
            let _ = tx.send(result);
        }
    }

    /// Wait until `n` utterances have been started (2s cap).
    pub async fn wait_for_starts(&self, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let count = self.state.lock().unwrap().started.len();
                if count >= n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {n} utterance(s)");
    }
}

impl SpeechEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn start(&self, utterance: Utterance) -> Result<Completion, String> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_next.take() {
            return Err(reason);
        }
        let (tx, rx) = oneshot::channel();
        state.active_text = Some(utterance.text.clone());
        state.started.push(utterance);
        state.pending = Some(tx);
        Ok(rx)
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancels += 1;
        state.active_text = None;
        if let Some(tx) = state.pending.take() {
            let _ = tx.send(Err("interrupted".into()));
        }
    }

    fn is_speaking(&self) -> bool {
        self.state.lock().unwrap().pending.is_some()
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

impl Notify for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

// ============================================================================
// Completion endpoint stub
// ============================================================================

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub authorization: Option<String>,
    pub body: Value,
}

pub struct CompletionStub {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl CompletionStub {
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: Arc<Value>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

async fn stub_handler(
    State(state): State<StubState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().unwrap().push(CapturedRequest {
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    (state.status, Json(state.body.as_ref().clone()))
}

/// Serve `body` with `status` on a loopback port and record every request.
pub async fn spawn_completion_stub(status: u16, body: Value) -> CompletionStub {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        status: StatusCode::from_u16(status).unwrap(),
        body: Arc::new(body),
        requests: requests.clone(),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(stub_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    CompletionStub {
        url: format!("http://{addr}/v1/chat/completions"),
        requests,
    }
}
