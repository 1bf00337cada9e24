//! Observer-facing playback status and notifications.

use serde::Serialize;

use crate::error::{ErrorCategory, ErrorCode, PlayerError};

/// User-facing description of a failed session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaybackFailure {
    /// Machine-readable code; never shown directly.
    pub code: ErrorCode,
    /// Wording class derived from `code`.
    pub category: ErrorCategory,
    /// Non-empty text for the category.
    pub message: String,
    /// Diagnostic detail for logs.
    pub detail: String,
}

impl From<&PlayerError> for PlaybackFailure {
    fn from(err: &PlayerError) -> Self {
        let category = err.category();
        Self {
            code: err.code(),
            category,
            message: category.message().to_string(),
            detail: err.detail().to_string(),
        }
    }
}

/// The only lifecycle state observers see.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Connecting,
    Playing,
    Error(PlaybackFailure),
}

impl PlaybackStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackStatus::Connecting | PlaybackStatus::Playing)
    }
}

/// Notification pushed to every subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEvent {
    StatusChanged(PlaybackStatus),
    NowPlayingChanged(String),
}
