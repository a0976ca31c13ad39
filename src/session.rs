//! Chat session orchestration.
//!
//! IDLE → PROCESSING → IDLE per submission: input is appended as a user
//! message, summarized, the summary appended as an assistant message, and
//! then read aloud. Every failure ends as a notice (and, for summarization,
//! a canned assistant reply); the session stays usable.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::conversation::{Conversation, Message, MessageId, Role};
use crate::credentials::CredentialError;
use crate::ingest::{ingest_first, IngestError, UploadedFile};
use crate::notifier::{Notice, Notify};
use crate::speech::{SpeechController, SpeechError};
use crate::summarizer::Summarizer;

pub const GREETING: &str = "Hi! I'm VoiceAble, your AI-powered screen reader. You can paste text, upload files, or type directly. I'll summarize content and read it aloud for you. How can I help make content more accessible today?";

pub const APOLOGY: &str = "I apologize, but I'm having trouble processing your content right now. This might be because the AI service needs to be configured with your API key. Please try again later.";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Still processing the previous request")]
    Busy,

    #[error("No message with id {0}")]
    UnknownMessage(MessageId),

    #[error(transparent)]
    Speech(#[from] SpeechError),
}

/// What became of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Ingested and summarized; carries the assistant reply id.
    Submitted(MessageId),
    /// PDF: recognised, not yet supported.
    ComingSoon,
    /// Empty, unreadable, or an unsupported type.
    Rejected(String),
    NoFile,
}

/// Clears the processing flag when dropped.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn upload_error() -> Notice {
    Notice::error("Upload Error", "Unable to process the file. Please try again.")
}

pub struct ChatSession {
    conversation: Mutex<Conversation>,
    summarizer: Summarizer,
    speech: Arc<SpeechController>,
    notifier: Arc<dyn Notify>,
    processing: AtomicBool,
    config: SessionConfig,
}

impl ChatSession {
    pub fn new(
        summarizer: Summarizer,
        speech: Arc<SpeechController>,
        notifier: Arc<dyn Notify>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let mut conversation = Conversation::new();
        conversation.append(Role::Assistant, GREETING);

        Arc::new(Self {
            conversation: Mutex::new(conversation),
            summarizer,
            speech,
            notifier,
            processing: AtomicBool::new(false),
            config,
        })
    }

    fn begin_processing(&self) -> Result<ProcessingGuard<'_>, SessionError> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::Busy)?;
        Ok(ProcessingGuard(&self.processing))
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.lock().unwrap().messages().to_vec()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.conversation.lock().unwrap().get(id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.conversation.lock().unwrap().count()
    }

    /// Id of the message being read aloud, if any.
    pub fn playing(&self) -> Option<MessageId> {
        self.conversation
            .lock()
            .unwrap()
            .playing()
            .map(|m| m.id.clone())
    }

    pub fn speech(&self) -> &SpeechController {
        &self.speech
    }

    /// Submit typed or pasted text. Blank input is ignored.
    ///
    /// Returns the id of the assistant reply (summary or apology).
    pub async fn submit_text(self: &Arc<Self>, text: &str) -> Result<Option<MessageId>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let _guard = self.begin_processing()?;
        self.conversation
            .lock()
            .unwrap()
            .append(Role::User, text);
        info!("State: IDLE → PROCESSING ({} chars)", text.len());

        let reply = match self.summarizer.summarize(text).await {
            Ok(summary) => {
                let id = self
                    .conversation
                    .lock()
                    .unwrap()
                    .append(Role::Assistant, summary);
                self.notifier.notify(&Notice::info(
                    "Content Summarized",
                    "Your content has been processed and summarized successfully.",
                ));
                if self.config.autoplay {
                    self.schedule_autoplay(id.clone());
                }
                id
            }
            Err(e) => {
                warn!("Summarization failed: {e}");
                self.notifier.notify(&Notice::error(
                    "Processing Error",
                    "Unable to summarize content. Please check your API configuration.",
                ));
                let id = self
                    .conversation
                    .lock()
                    .unwrap()
                    .append(Role::Assistant, APOLOGY);
                id
            }
        };

        info!("State: PROCESSING → IDLE");
        Ok(Some(reply))
    }

    /// Submit an upload. Only the first file is used; ingestion problems
    /// become notices and leave the conversation untouched.
    pub async fn submit_files(
        self: &Arc<Self>,
        files: &[UploadedFile],
    ) -> Result<UploadOutcome, SessionError> {
        if self.is_processing() {
            return Err(SessionError::Busy);
        }

        let Some(result) = ingest_first(files) else {
            return Ok(UploadOutcome::NoFile);
        };

        match result {
            Ok(file) => {
                self.notifier.notify(&Notice::info(
                    "File Uploaded",
                    format!("Successfully uploaded {}", file.filename),
                ));
                let message = format!("📄 **{}**\n\n{}", file.filename, file.content);
                // Ingested content is never blank, so a reply always exists.
                Ok(match self.submit_text(&message).await? {
                    Some(id) => UploadOutcome::Submitted(id),
                    None => UploadOutcome::NoFile,
                })
            }
            Err(IngestError::PdfNotSupported) => {
                info!("PDF upload declined");
                self.notifier.notify(&Notice::error(
                    "PDF Support Coming Soon",
                    IngestError::PdfNotSupported.to_string(),
                ));
                Ok(UploadOutcome::ComingSoon)
            }
            Err(e) => {
                warn!("Upload rejected: {e}");
                self.notifier.notify(&upload_error());
                Ok(UploadOutcome::Rejected(e.to_string()))
            }
        }
    }

    /// Upload a file from disk. A file that cannot be read is rejected
    /// like any other unusable upload.
    pub async fn submit_path(self: &Arc<Self>, path: &Path) -> Result<UploadOutcome, SessionError> {
        match UploadedFile::from_path(path).await {
            Ok(file) => self.submit_files(std::slice::from_ref(&file)).await,
            Err(e) => {
                if self.is_processing() {
                    return Err(SessionError::Busy);
                }
                warn!("Upload rejected: {e}");
                self.notifier.notify(&upload_error());
                Ok(UploadOutcome::Rejected(e.to_string()))
            }
        }
    }

    fn schedule_autoplay(self: &Arc<Self>, id: MessageId) {
        let session = Arc::clone(self);
        let delay = Duration::from_millis(self.config.autoplay_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Errors were already surfaced as notices.
            if let Err(e) = session.play(&id).await {
                debug!("Autoplay of {id} ended: {e}");
            }
        });
    }

    /// Read a message aloud, marking it as the playing one meanwhile.
    pub async fn play(&self, id: &MessageId) -> Result<(), SessionError> {
        let content = {
            let mut conversation = self.conversation.lock().unwrap();
            let content = conversation
                .get(id)
                .map(|m| m.content.clone())
                .ok_or_else(|| SessionError::UnknownMessage(id.clone()))?;
            conversation.set_playing(id);
            content
        };

        let result = self.speech.speak(&content).await;

        match &result {
            // Whoever preempted this utterance (stop or a newer play) owns
            // the playing flag now.
            Err(SpeechError::Cancelled) => {}
            Ok(()) => self.conversation.lock().unwrap().clear_playing(Some(id)),
            Err(e) => {
                self.conversation.lock().unwrap().clear_playing(Some(id));
                warn!("Playback of {id} failed: {e}");
                self.notifier.notify(&Notice::error(
                    "Audio Error",
                    "Unable to play audio. Please check your speech settings.",
                ));
            }
        }
        result.map_err(SessionError::from)
    }

    pub fn stop_audio(&self) {
        self.speech.stop();
        self.conversation.lock().unwrap().clear_playing(None);
    }

    pub fn save_api_key(&self, key: &str) -> Result<(), CredentialError> {
        self.summarizer.save_api_key(key)
    }

    pub fn remove_api_key(&self) -> Result<(), CredentialError> {
        self.summarizer.remove_api_key()
    }

    pub fn has_api_key(&self) -> bool {
        self.summarizer.has_api_key()
    }
}
