//! Error taxonomy for the playback core.
//!
//! Every failure carries a machine-readable [`ErrorCode`]. The UI never shows codes; it
//! picks wording from the code's [`ErrorCategory`].

use serde::Serialize;
use thiserror::Error;

use crate::interrupt;

/// Machine-readable failure code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Decoder could not be created for a supported codec.
    DecoderInit,
    /// Resampler could not be created.
    ResamplerInit,
    /// The source could not be opened or probed.
    OpenInput,
    /// The container has no decodable audio track.
    NoAudioStream,
    /// No decoder is available for the audio track's codec.
    NoCodec,
    /// The demuxer reported a malformed stream.
    DemuxFailed,
    /// Too many consecutive corrupt packets or a fatal decoder error.
    DecodeFailed,
    /// Sample conversion failed.
    ResampleFailed,
    /// Output stream could not be built.
    SinkCreate,
    SinkStart,
    SinkStop,
    SinkVolume,
    /// Output device could not be found or configured.
    SinkDevice,
    /// Reads kept timing out past the retry ceiling.
    NetworkTimeout,
    /// Transport failed while streaming.
    StreamIo,
    PlaylistDownload,
    PlaylistEmptyResponse,
    PlaylistInvalidData,
    /// The URL could not be parsed.
    InvalidUrl,
    /// The caller stopped playback; never surfaced as a user-visible error.
    Aborted,
}

/// Wording class shown to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Internal,
    InvalidSource,
    NetworkUnstable,
}

impl ErrorCategory {
    /// Non-empty user-facing text for the category.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCategory::Internal => "Internal error. Playback could not continue.",
            ErrorCategory::InvalidSource => {
                "The station is unavailable or its address is invalid. Check the station URL."
            }
            ErrorCategory::NetworkUnstable => {
                "The network connection is unstable. Try again later."
            }
        }
    }
}

impl ErrorCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::DecoderInit
            | ErrorCode::ResamplerInit
            | ErrorCode::ResampleFailed
            | ErrorCode::SinkCreate
            | ErrorCode::SinkStart
            | ErrorCode::SinkStop
            | ErrorCode::SinkVolume
            | ErrorCode::SinkDevice
            | ErrorCode::Aborted => ErrorCategory::Internal,
            ErrorCode::OpenInput
            | ErrorCode::NoAudioStream
            | ErrorCode::NoCodec
            | ErrorCode::DemuxFailed
            | ErrorCode::DecodeFailed
            | ErrorCode::PlaylistDownload
            | ErrorCode::PlaylistEmptyResponse
            | ErrorCode::PlaylistInvalidData
            | ErrorCode::InvalidUrl => ErrorCategory::InvalidSource,
            ErrorCode::NetworkTimeout | ErrorCode::StreamIo => ErrorCategory::NetworkUnstable,
        }
    }
}

/// Failure raised anywhere below the playback state machine.
#[derive(Debug, Error)]
#[error("{code:?}: {detail}")]
pub struct PlayerError {
    code: ErrorCode,
    detail: String,
}

impl PlayerError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorCode::Aborted, "aborted by caller")
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Debug detail (not shown to users verbatim).
    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_aborted(&self) -> bool {
        self.code == ErrorCode::Aborted
    }

    /// Map an I/O error from the byte source, keeping aborts and timeouts distinct.
    pub fn from_io(err: &std::io::Error, context: &str) -> Self {
        if interrupt::is_aborted(err) {
            Self::aborted()
        } else if err.kind() == std::io::ErrorKind::TimedOut {
            Self::new(ErrorCode::NetworkTimeout, format!("{context}: {err}"))
        } else {
            Self::new(ErrorCode::StreamIo, format!("{context}: {err}"))
        }
    }
}

/// Playlist resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unable to download playlist: {0}")]
    Network(String),
    /// The download produced no body at all. An empty body is parsed like any other.
    #[error("unable to download playlist: empty response")]
    EmptyResponse,
    #[error("unable to parse playlist: invalid data")]
    InvalidFormat,
}

impl From<ResolveError> for PlayerError {
    fn from(err: ResolveError) -> Self {
        let code = match &err {
            ResolveError::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            ResolveError::Network(_) => ErrorCode::PlaylistDownload,
            ResolveError::EmptyResponse => ErrorCode::PlaylistEmptyResponse,
            ResolveError::InvalidFormat => ErrorCode::PlaylistInvalidData,
        };
        PlayerError::new(code, err.to_string())
    }
}
