//! Speech output: text cleanup, voice choice, and the playback controller.
//!
//! Components:
//! - `sanitize`: markdown → plain prose for the synthesizer
//! - `voice`: voice descriptors and the selection policy
//! - `engine`: host speech engines (espeak-ng / say) behind `SpeechEngine`
//! - `controller`: one-utterance-at-a-time playback with cancellation

pub mod controller;
pub mod engine;
pub mod sanitize;
pub mod voice;

pub use controller::{SpeechController, SpeechError};
pub use engine::detect_engine;
