//! Local HTTP API for the chat session.
//!
//! Same pipeline as the terminal chat, for browser or script front ends.
//! Runs on 127.0.0.1 (port 8768 by default) using axum.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conversation::{Message, MessageId};
use crate::ingest::UploadedFile;
use crate::session::{ChatSession, SessionError, UploadOutcome};

/// Uploads are not size-checked against the 10MB guidance; this only keeps
/// a single request bounded.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<ChatSession>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SubmitRequest {
    text: String,
}

#[derive(Deserialize)]
struct CredentialRequest {
    api_key: String,
}

#[derive(Serialize)]
struct StatusResponse {
    processing: bool,
    speaking: bool,
    speech_engine: String,
    speech_available: bool,
    api_key_configured: bool,
    message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    playing: Option<MessageId>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            message_id: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message_id: None,
            error: Some(message.into()),
        }
    }
}

type Reply = (StatusCode, Json<SimpleResponse>);

fn session_error(e: SessionError) -> Reply {
    let code = match e {
        SessionError::Busy => StatusCode::CONFLICT,
        SessionError::UnknownMessage(_) => StatusCode::NOT_FOUND,
        SessionError::Speech(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(SimpleResponse::err(e.to_string())))
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/messages", get(handle_messages))
        .route("/submit", post(handle_submit))
        .route("/upload", post(handle_upload))
        .route("/messages/{id}/play", post(handle_play))
        .route("/stop", post(handle_stop))
        .route("/credential", put(handle_set_credential).delete(handle_clear_credential))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(state: ApiState, port: u16) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");
    axum::serve(listener, router(state)).await
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let speech = state.session.speech();
    Json(StatusResponse {
        processing: state.session.is_processing(),
        speaking: speech.is_active(),
        speech_engine: speech.engine().name().to_string(),
        speech_available: speech.engine().is_available(),
        api_key_configured: state.session.has_api_key(),
        message_count: state.session.message_count(),
        playing: state.session.playing(),
    })
}

async fn handle_messages(State(state): State<ApiState>) -> Json<Vec<Message>> {
    Json(state.session.messages())
}

async fn handle_submit(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> Reply {
    if req.text.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err("empty text")));
    }

    match state.session.submit_text(&req.text).await {
        Ok(id) => (
            StatusCode::OK,
            Json(SimpleResponse {
                message_id: id,
                ..SimpleResponse::ok("summarized")
            }),
        ),
        Err(e) => session_error(e),
    }
}

async fn handle_upload(State(state): State<ApiState>, mut multipart: Multipart) -> Reply {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload: {e}");
                return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err(e.to_string())));
            }
        };
        let Some(filename) = field.file_name().map(String::from) else {
            continue;
        };
        let content_type = field.content_type().map(String::from);
        match field.bytes().await {
            Ok(bytes) => files.push(UploadedFile {
                filename,
                content_type,
                bytes: bytes.to_vec(),
            }),
            Err(e) => {
                warn!("Failed to read upload {filename}: {e}");
                return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err(e.to_string())));
            }
        }
    }
    debug!("Upload with {} file(s)", files.len());

    match state.session.submit_files(&files).await {
        Ok(UploadOutcome::Submitted(id)) => (
            StatusCode::OK,
            Json(SimpleResponse {
                message_id: Some(id),
                ..SimpleResponse::ok("summarized")
            }),
        ),
        Ok(UploadOutcome::ComingSoon) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(SimpleResponse {
                error: Some("PDF support is coming soon".into()),
                ..SimpleResponse::ok("coming_soon")
            }),
        ),
        Ok(UploadOutcome::Rejected(reason)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SimpleResponse::err(reason)),
        ),
        Ok(UploadOutcome::NoFile) => (
            StatusCode::BAD_REQUEST,
            Json(SimpleResponse::err("no file in upload")),
        ),
        Err(e) => session_error(e),
    }
}

async fn handle_play(State(state): State<ApiState>, Path(id): Path<String>) -> Reply {
    let id = MessageId::from(id.as_str());
    if state.session.message(&id).is_none() {
        return session_error(SessionError::UnknownMessage(id));
    }

    // Fire-and-forget: playback outcome is reported as a notice.
    let session = state.session.clone();
    tokio::spawn(async move {
        if let Err(e) = session.play(&id).await {
            debug!("Playback ended: {e}");
        }
    });

    (StatusCode::OK, Json(SimpleResponse::ok("playing")))
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.session.stop_audio();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_set_credential(
    State(state): State<ApiState>,
    Json(req): Json<CredentialRequest>,
) -> Reply {
    if req.api_key.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err("empty api_key")));
    }
    match state.session.save_api_key(&req.api_key) {
        Ok(()) => (StatusCode::OK, Json(SimpleResponse::ok("saved"))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SimpleResponse::err(e.to_string())),
        ),
    }
}

async fn handle_clear_credential(State(state): State<ApiState>) -> Reply {
    match state.session.remove_api_key() {
        Ok(()) => (StatusCode::OK, Json(SimpleResponse::ok("removed"))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SimpleResponse::err(e.to_string())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, SessionConfig, SpeechConfig};
    use crate::credentials::MemorySecretStore;
    use crate::speech::SpeechController;
    use crate::summarizer::Summarizer;
    use crate::test_helpers::{FakeEngine, RecordingNotifier};
    use serde_json::Value;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        engine: Arc<FakeEngine>,
    }

    async fn start() -> TestServer {
        let summarizer =
            Summarizer::new(&ApiConfig::default(), Arc::new(MemorySecretStore::new())).unwrap();
        let engine = Arc::new(FakeEngine::new());
        let speech = Arc::new(SpeechController::new(engine.clone(), &SpeechConfig::default()));
        let session = ChatSession::new(
            summarizer,
            speech,
            Arc::new(RecordingNotifier::default()),
            SessionConfig {
                autoplay: false,
                autoplay_delay_ms: 0,
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ApiState { session })).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            engine,
        }
    }

    #[tokio::test]
    async fn status_reports_session_state() {
        let s = start().await;
        let body: Value = s
            .client
            .get(format!("{}/status", s.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["processing"], false);
        assert_eq!(body["speech_engine"], "fake");
        assert_eq!(body["api_key_configured"], false);
        assert_eq!(body["message_count"], 1);
    }

    #[tokio::test]
    async fn submit_appends_two_messages() {
        let s = start().await;
        let resp = s
            .client
            .post(format!("{}/submit", s.base))
            .json(&serde_json::json!({"text": "Hello world"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "summarized");

        let messages: Value = s
            .client
            .get(format!("{}/messages", s.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Hello world");
        assert_eq!(messages[2]["id"], body["message_id"]);
    }

    #[tokio::test]
    async fn blank_submit_is_rejected() {
        let s = start().await;
        let resp = s
            .client
            .post(format!("{}/submit", s.base))
            .json(&serde_json::json!({"text": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pdf_upload_is_coming_soon() {
        let s = start().await;
        let part = reqwest::multipart::Part::bytes(b"%PDF-1.4".to_vec())
            .file_name("paper.pdf")
            .mime_str("application/pdf")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = s
            .client
            .post(format!("{}/upload", s.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "coming_soon");
    }

    #[tokio::test]
    async fn text_upload_uses_first_file_only() {
        let s = start().await;
        let first = reqwest::multipart::Part::bytes(b"First file body".to_vec())
            .file_name("first.txt")
            .mime_str("text/plain")
            .unwrap();
        let second = reqwest::multipart::Part::bytes(b"ignored".to_vec())
            .file_name("second.txt")
            .mime_str("text/plain")
            .unwrap();
        let form = reqwest::multipart::Form::new()
            .part("file", first)
            .part("file", second);

        let resp = s
            .client
            .post(format!("{}/upload", s.base))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let messages: Value = s
            .client
            .get(format!("{}/messages", s.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"], "📄 **first.txt**\n\nFirst file body");
    }

    #[tokio::test]
    async fn play_and_stop() {
        let s = start().await;
        let resp = s
            .client
            .post(format!("{}/messages/missing/play", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let messages: Value = s
            .client
            .get(format!("{}/messages", s.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = messages[0]["id"].as_str().unwrap().to_string();

        let resp = s
            .client
            .post(format!("{}/messages/{id}/play", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        s.engine.wait_for_starts(1).await;

        let resp = s
            .client
            .post(format!("{}/stop", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(s.engine.cancel_count(), 1);
    }

    #[tokio::test]
    async fn credential_can_be_set_and_cleared() {
        let s = start().await;
        let resp = s
            .client
            .put(format!("{}/credential", s.base))
            .json(&serde_json::json!({"api_key": "sk-live"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let status: Value = s
            .client
            .get(format!("{}/status", s.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["api_key_configured"], true);

        let resp = s
            .client
            .delete(format!("{}/credential", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
