//! Playback controller: at most one utterance at a time.
//!
//! Starting a new utterance always preempts the previous one. A preempted
//! or stopped `speak` settles with `SpeechError::Cancelled`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::engine::{SpeechEngine, Utterance};
use super::sanitize::sanitize;
use super::voice::select_voice;
use crate::config::SpeechConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Speech synthesis not supported")]
    Unsupported,

    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("Speech cancelled")]
    Cancelled,
}

struct ActiveUtterance {
    id: u64,
    cancel: oneshot::Sender<()>,
}

pub struct SpeechController {
    engine: Arc<dyn SpeechEngine>,
    locale: String,
    rate: f32,
    pitch: f32,
    volume: f32,
    active: Mutex<Option<ActiveUtterance>>,
    next_id: AtomicU64,
}

impl SpeechController {
    pub fn new(engine: Arc<dyn SpeechEngine>, config: &SpeechConfig) -> Self {
        Self {
            engine,
            locale: config.locale.clone(),
            rate: config.rate,
            pitch: config.pitch,
            volume: config.volume,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn engine(&self) -> &dyn SpeechEngine {
        self.engine.as_ref()
    }

    /// Speak `text` after stripping markdown. Resolves when the engine
    /// finishes, fails, or the utterance is preempted.
    pub async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        if !self.engine.is_available() {
            return Err(SpeechError::Unsupported);
        }

        let clean = sanitize(text);
        let voices = self.engine.voices();
        let voice = select_voice(&voices, &self.locale);
        let utterance = Utterance {
            text: clean,
            voice: voice.map(|v| v.id.clone()),
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // Stop and start under one lock so two racing speaks cannot both
        // end up active.
        let done = {
            let mut active = self.active.lock().unwrap();
            self.stop_locked(&mut active);

            debug!(
                "Utterance {id}: {} chars, voice {:?}",
                utterance.text.len(),
                utterance.voice
            );
            let done = self
                .engine
                .start(utterance)
                .map_err(SpeechError::Synthesis)?;
            *active = Some(ActiveUtterance {
                id,
                cancel: cancel_tx,
            });
            done
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel_rx => Err(SpeechError::Cancelled),
            result = done => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SpeechError::Synthesis(e)),
                Err(_) => Err(SpeechError::Synthesis("engine dropped the utterance".into())),
            },
        };

        {
            let mut active = self.active.lock().unwrap();
            if active.as_ref().is_some_and(|a| a.id == id) {
                *active = None;
            }
        }

        match &outcome {
            Ok(()) => debug!("Utterance {id} finished"),
            Err(SpeechError::Cancelled) => debug!("Utterance {id} cancelled"),
            Err(e) => warn!("Utterance {id} failed: {e}"),
        }
        outcome
    }

    /// Stop the current utterance, if any. Its `speak` settles as cancelled.
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap();
        self.stop_locked(&mut active);
    }

    fn stop_locked(&self, active: &mut Option<ActiveUtterance>) {
        if let Some(prev) = active.take() {
            let _ = prev.cancel.send(());
            info!("Speech stopped (utterance {})", prev.id);
        }
        if self.engine.is_speaking() {
            self.engine.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_speaking()
    }
}
