//! User-facing notices, shown as desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
    pub level: NoticeLevel,
}

impl Notice {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            level: NoticeLevel::Info,
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            level: NoticeLevel::Error,
        }
    }
}

pub trait Notify: Send + Sync {
    fn notify(&self, notice: &Notice);
}

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Notify for Notifier {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => debug!("Notice: {} - {}", notice.title, notice.body),
            NoticeLevel::Error => warn!("Notice: {} - {}", notice.title, notice.body),
        }

        if !self.enabled {
            return;
        }

        if let Err(e) = Notification::new()
            .summary(&notice.title)
            .body(&notice.body)
            .icon("audio-speakers")
            .timeout(3000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
