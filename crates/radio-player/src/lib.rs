//! Streaming radio playback core.
//!
//! Resolves station URLs, decodes HTTP/HLS/local audio with Symphonia and plays it
//! through cpal. [`Player`] is the entry point.

pub mod backend;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod interrupt;
pub mod metadata;
pub mod net;
pub mod pipeline;
pub mod player;
pub mod resample;
pub mod resolve;
pub mod ring;
pub mod sink;
pub mod status;

#[cfg(test)]
mod test_support;

pub use config::PlayerConfig;
pub use error::{ErrorCategory, ErrorCode, PlayerError, ResolveError};
pub use player::Player;
pub use resolve::Resolver;
pub use status::{PlaybackFailure, PlaybackStatus, PlayerEvent};
