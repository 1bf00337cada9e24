//! Player configuration.
//!
//! Defaults match the reference tuning (50 output buffers of 8 KiB, 10 read timeouts,
//! 15 s playlist fetch). A TOML file may override any subset of fields.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tuning shared by resolver, network feed, decode and output stages.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerConfig {
    /// Size of one output buffer in bytes; also the decode target per refill.
    pub buffer_bytes: usize,
    /// Number of output buffers in the pool.
    pub buffer_count: usize,
    /// How long a single network read may wait before reporting a timeout.
    pub read_timeout: Duration,
    /// Consecutive read timeouts tolerated before the stream is declared dead.
    pub max_read_timeouts: u32,
    /// Consecutive corrupt packets tolerated before decoding fails.
    pub max_decode_errors: u32,
    /// Total timeout for downloading a playlist document.
    pub playlist_timeout: Duration,
    /// User-Agent sent with every HTTP request.
    pub user_agent: String,
    /// Bytes per chunk handed from the fetch thread to the decoder.
    pub feed_chunk_bytes: usize,
    /// Chunks buffered between the fetch thread and the decoder.
    pub feed_capacity: usize,
    /// Initial volume (0.0..=1.0).
    pub volume: f32,
    pub muted: bool,
    /// Output device id or name substring; `None` selects the default device.
    pub device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 8192,
            buffer_count: 50,
            read_timeout: Duration::from_secs(5),
            max_read_timeouts: 10,
            max_decode_errors: 10,
            playlist_timeout: Duration::from_secs(15),
            user_agent: "Mozilla/5.0".to_string(),
            feed_chunk_bytes: 16 * 1024,
            feed_capacity: 64,
            volume: 1.0,
            muted: false,
            device: None,
        }
    }
}

/// On-disk form; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlayerConfigFile {
    buffer_bytes: Option<usize>,
    buffer_count: Option<usize>,
    read_timeout_ms: Option<u64>,
    max_read_timeouts: Option<u32>,
    max_decode_errors: Option<u32>,
    playlist_timeout_ms: Option<u64>,
    user_agent: Option<String>,
    feed_chunk_bytes: Option<usize>,
    feed_capacity: Option<usize>,
    volume: Option<f32>,
    muted: Option<bool>,
    device: Option<String>,
}

impl PlayerConfig {
    /// Load configuration from a TOML file, filling gaps with defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file = toml::from_str::<PlayerConfigFile>(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: PlayerConfigFile) -> Self {
        let d = Self::default();
        Self {
            buffer_bytes: align_buffer_bytes(file.buffer_bytes.unwrap_or(d.buffer_bytes)),
            buffer_count: file.buffer_count.unwrap_or(d.buffer_count).max(2),
            read_timeout: file
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.read_timeout),
            max_read_timeouts: file.max_read_timeouts.unwrap_or(d.max_read_timeouts).max(1),
            max_decode_errors: file.max_decode_errors.unwrap_or(d.max_decode_errors),
            playlist_timeout: file
                .playlist_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.playlist_timeout),
            user_agent: file.user_agent.unwrap_or(d.user_agent),
            feed_chunk_bytes: file.feed_chunk_bytes.unwrap_or(d.feed_chunk_bytes).max(512),
            feed_capacity: file.feed_capacity.unwrap_or(d.feed_capacity).max(1),
            volume: clamp_volume(file.volume.unwrap_or(d.volume)),
            muted: file.muted.unwrap_or(d.muted),
            device: file.device.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Clamp a user volume into 0.0..=1.0 (NaN becomes silence).
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Round the buffer size to whole stereo 32-bit frames, with a small floor.
fn align_buffer_bytes(bytes: usize) -> usize {
    let frame = 8;
    (bytes.max(1024) / frame) * frame
}
