//! DeepSeek chat-completion summarization.
//!
//! Without an API key the summarizer runs in a degraded mode and returns a
//! local preview of the input instead of calling the API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::credentials::{CredentialError, SecretStore, API_KEY_NAME};

const SYSTEM_PROMPT: &str = "You are an expert at creating accessible, clear summaries. Summarize the following text in a way that is easy to understand when read aloud. Focus on key points, main ideas, and important details. Structure your response with clear sections if the content is long. Make it conversational and accessible.";

const USER_PREFIX: &str = "Please summarize this text: ";

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1000;

const PREVIEW_CHARS: usize = 200;

pub const NO_SUMMARY: &str = "Unable to generate summary.";

/// Marker phrase of the degraded-mode message.
pub const MISSING_KEY_PHRASE: &str = "I need your DeepSeek API key";

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("Failed to generate summary. Please check your API key and try again. ({reason})")]
    Failed { reason: String },
}

impl SummarizeError {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct Summarizer {
    endpoint: String,
    model: String,
    client: Client,
    store: Arc<dyn SecretStore>,
}

impl Summarizer {
    pub fn new(config: &ApiConfig, store: Arc<dyn SecretStore>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            client,
            store,
        })
    }

    pub fn save_api_key(&self, key: &str) -> Result<(), CredentialError> {
        self.store.set(API_KEY_NAME, key.trim())
    }

    pub fn api_key(&self) -> Result<Option<String>, CredentialError> {
        self.store.get(API_KEY_NAME)
    }

    pub fn remove_api_key(&self) -> Result<(), CredentialError> {
        self.store.clear(API_KEY_NAME)
    }

    /// Usable key, or `None` when absent, empty, or the store is unreadable.
    /// Any other stored value is sent as-is.
    fn usable_key(&self) -> Option<String> {
        match self.api_key() {
            Ok(key) => key.filter(|k| !k.is_empty()),
            Err(e) => {
                warn!("Could not read API key: {e}");
                None
            }
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.usable_key().is_some()
    }

    pub async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        let Some(key) = self.usable_key() else {
            info!("No API key configured, returning preview");
            return Ok(degraded_summary(text));
        };

        let t_start = Instant::now();
        let user_content = format!("{USER_PREFIX}{text}");
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_content,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!("Sending {} chars to {}", text.len(), self.endpoint);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    warn!("Cannot connect to {}", self.endpoint);
                } else if e.is_timeout() {
                    warn!("Summarization request timed out");
                } else {
                    warn!("Summarization request failed: {e}");
                }
                SummarizeError::failed(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!("Summarization API returned status {status}");
            return Err(SummarizeError::failed(format!("API request failed: {status}")));
        }

        let data: ChatResponse = resp.json().await.map_err(|e| {
            warn!("Failed to parse summarization response: {e}");
            SummarizeError::failed(e.to_string())
        })?;

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        let summary = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty());

        match summary {
            Some(summary) => {
                info!(
                    "Summarized {} chars → {} chars ({latency_ms:.0}ms)",
                    text.len(),
                    summary.len()
                );
                Ok(summary)
            }
            None => {
                warn!("Summarization response had no content ({latency_ms:.0}ms)");
                Ok(NO_SUMMARY.to_string())
            }
        }
    }
}

/// First 200 characters of `text`, with an ellipsis when it was longer.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Locally composed stand-in used when no API key is configured.
pub fn degraded_summary(text: &str) -> String {
    format!(
        "📝 **Summary Preview**

I'd love to help summarize your content, but {MISSING_KEY_PHRASE} to connect to the AI service.

**Your content preview:**
{}

**What I'll do once connected:**
• Create a concise, accessible summary
• Highlight key points and main ideas
• Structure the content for easy listening
• Maintain important context and details

Please add your DeepSeek API key in the settings to enable AI summarization.",
        preview(text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemorySecretStore;
    use crate::test_helpers::spawn_completion_stub;

    fn summarizer(endpoint: &str, key: Option<&str>) -> Summarizer {
        let store: Arc<dyn SecretStore> = match key {
            Some(k) => Arc::new(MemorySecretStore::with(API_KEY_NAME, k)),
            None => Arc::new(MemorySecretStore::new()),
        };
        let config = ApiConfig {
            endpoint: endpoint.to_string(),
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        Summarizer::new(&config, store).unwrap()
    }

    #[test]
    fn preview_keeps_short_text_verbatim() {
        assert_eq!(preview("Hello world"), "Hello world");
        let exact: String = "x".repeat(200);
        assert_eq!(preview(&exact), exact);
    }

    #[test]
    fn preview_truncates_on_characters() {
        let long: String = "é".repeat(250);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.trim_end_matches("...").chars().count(), 200);
    }

    #[tokio::test]
    async fn degraded_mode_is_deterministic() {
        // Endpoint is never contacted without a key.
        let s = summarizer("http://127.0.0.1:9/unused", None);
        let text = "a".repeat(300);

        let first = s.summarize(&text).await.unwrap();
        let second = s.summarize(&text).await.unwrap();

        assert_eq!(first, second);
        assert!(first.contains(MISSING_KEY_PHRASE));
        assert!(first.contains(&format!("{}...", "a".repeat(200))));
        assert!(!first.contains(&"a".repeat(201)));
    }

    #[tokio::test]
    async fn empty_key_counts_as_missing() {
        let s = summarizer("http://127.0.0.1:9/unused", Some(""));
        assert!(!s.has_api_key());
        let out = s.summarize("Hello world").await.unwrap();
        assert!(out.contains("Hello world"));
        assert!(out.contains(MISSING_KEY_PHRASE));
    }

    #[tokio::test]
    async fn whitespace_key_is_still_sent() {
        let stub = spawn_completion_stub(401, serde_json::json!({"error": "bad key"})).await;
        let s = summarizer(&stub.url, Some("  "));
        assert!(s.has_api_key());

        let err = s.summarize("Hello world").await.unwrap_err();
        assert!(matches!(err, SummarizeError::Failed { .. }));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn sends_fixed_request_shape() {
        let stub = spawn_completion_stub(
            200,
            serde_json::json!({"choices": [{"message": {"content": "Short summary."}}]}),
        )
        .await;
        let s = summarizer(&stub.url, Some("sk-test"));

        let out = s.summarize("Long article text").await.unwrap();
        assert_eq!(out, "Short summary.");

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.authorization.as_deref(), Some("Bearer sk-test"));
        assert_eq!(req.body["model"], "deepseek-chat");
        assert_eq!(req.body["max_tokens"], 1000);
        assert!((req.body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(req.body["messages"][1]["role"], "user");
        assert_eq!(
            req.body["messages"][1]["content"],
            "Please summarize this text: Long article text"
        );
    }

    #[tokio::test]
    async fn missing_content_falls_back_to_literal() {
        for body in [
            serde_json::json!({"choices": []}),
            serde_json::json!({"choices": [{"message": {}}]}),
            serde_json::json!({"choices": [{"message": {"content": ""}}]}),
            serde_json::json!({}),
        ] {
            let stub = spawn_completion_stub(200, body).await;
            let s = summarizer(&stub.url, Some("sk-test"));
            assert_eq!(s.summarize("text").await.unwrap(), NO_SUMMARY);
        }
    }

    #[tokio::test]
    async fn error_status_is_a_failure_without_retry() {
        let stub = spawn_completion_stub(401, serde_json::json!({"error": "bad key"})).await;
        let s = summarizer(&stub.url, Some("sk-bad"));

        let err = s.summarize("text").await.unwrap_err();
        assert!(matches!(err, SummarizeError::Failed { .. }));
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_a_failure() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let s = summarizer(&format!("http://{addr}/v1/chat/completions"), Some("sk-test"));
        assert!(matches!(
            s.summarize("text").await.unwrap_err(),
            SummarizeError::Failed { .. }
        ));
    }

    #[test]
    fn key_passthroughs_use_fixed_name() {
        let store = Arc::new(MemorySecretStore::new());
        let s = Summarizer::new(&ApiConfig::default(), store.clone()).unwrap();

        s.save_api_key(" sk-123 ").unwrap();
        assert_eq!(store.get(API_KEY_NAME).unwrap().as_deref(), Some("sk-123"));
        assert!(s.has_api_key());

        s.remove_api_key().unwrap();
        assert_eq!(s.api_key().unwrap(), None);
        assert!(!s.has_api_key());
    }
}
