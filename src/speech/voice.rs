//! Voice descriptors and the preferred-voice policy.

use serde::Serialize;

/// Name fragments that mark a higher-quality voice.
const QUALITY_TAGS: &[&str] = &["Natural", "Enhanced"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voice {
    /// What the engine is given to select this voice.
    pub id: String,
    pub name: String,
    /// BCP 47 style tag, e.g. `en-US`
    pub lang: String,
    /// Synthesized on this machine rather than by a network service.
    pub local_service: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>, local_service: bool) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            lang: lang.into(),
            local_service,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn matches_locale(&self, prefix: &str) -> bool {
        self.lang.starts_with(prefix)
    }

    fn sounds_better(&self) -> bool {
        self.local_service || QUALITY_TAGS.iter().any(|tag| self.name.contains(tag))
    }
}

/// Pick a voice for `locale_prefix` (e.g. `en`).
///
/// Preference: a matching voice that is tagged Natural/Enhanced or local,
/// then any matching voice, then the first voice. `None` leaves the engine
/// on its default.
pub fn select_voice<'a>(voices: &'a [Voice], locale_prefix: &str) -> Option<&'a Voice> {
    voices
        .iter()
        .find(|v| v.matches_locale(locale_prefix) && v.sounds_better())
        .or_else(|| voices.iter().find(|v| v.matches_locale(locale_prefix)))
        .or_else(|| voices.first())
}
