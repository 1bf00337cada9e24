//! Now-playing metadata: cleaning raw in-band titles and suppressing repeats.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;

/// Normalize a raw in-band title.
///
/// Some stations send JSON objects instead of plain text; `{"artist":..,"name":..}` and
/// `{"artist":..,"title":..}` become `"artist - name"`. Anything else is trimmed and
/// returned as-is.
pub fn clean_track_metadata(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with('{') && raw.ends_with('}') {
        if let Some(title) = title_from_json(raw) {
            return title;
        }
    }
    raw.to_string()
}

fn title_from_json(raw: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ArtistName {
        artist: String,
        name: String,
    }

    #[derive(Deserialize)]
    struct ArtistTitle {
        artist: String,
        title: String,
    }

    if let Ok(v) = serde_json::from_str::<ArtistName>(raw) {
        return Some(format!("{} - {}", v.artist, v.name));
    }
    if let Ok(v) = serde_json::from_str::<ArtistTitle>(raw) {
        return Some(format!("{} - {}", v.artist, v.title));
    }
    None
}

/// Last published title for one session.
#[derive(Debug, Default)]
pub struct NowPlaying {
    last: Option<String>,
}

impl NowPlaying {
    /// Feed a raw tag value. Returns the cleaned title when it differs from the previous
    /// one, `None` for a repeat.
    pub fn update(&mut self, raw: &str) -> Option<String> {
        let title = clean_track_metadata(raw);
        if self.last.as_deref() == Some(title.as_str()) {
            return None;
        }
        self.last = Some(title.clone());
        Some(title)
    }

    pub fn current(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

/// Single-value mailbox for titles found by the network layer.
///
/// The fetch thread publishes; the decode step takes the newest value between packets.
#[derive(Clone, Debug, Default)]
pub struct TitleSlot {
    inner: Arc<Mutex<Option<String>>>,
}

impl TitleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, title: String) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(title);
    }

    pub fn take(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
