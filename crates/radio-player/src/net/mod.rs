//! Byte sources for the decode pipeline: local files, progressive HTTP and HLS.

mod feed;
mod hls;
mod http;
mod icy;

pub use feed::{ByteFeed, FeedErrorSlot};

use std::fs::File;

use symphonia::core::io::MediaSource;
use url::Url;

use crate::config::PlayerConfig;
use crate::error::{ErrorCode, PlayerError};
use crate::interrupt::InterruptFlag;
use crate::metadata::TitleSlot;
use crate::resolve::{PlaylistFormat, url_extension};

/// An opened byte source plus a container format hint.
pub struct OpenedSource {
    pub source: Box<dyn MediaSource>,
    /// File extension to hint the container format, when the URL has one.
    pub extension: Option<String>,
    /// Network failures behind the reads of `source`, if it is a network feed.
    pub transport_errors: Option<FeedErrorSlot>,
}

/// Open the transport for `url`.
///
/// Network sources return immediately; connection failures surface on the first read.
pub fn open_source(
    url: &Url,
    config: &PlayerConfig,
    interrupt: &InterruptFlag,
    titles: &TitleSlot,
) -> Result<OpenedSource, PlayerError> {
    let open_err = |e: std::io::Error| PlayerError::new(ErrorCode::OpenInput, format!("{url}: {e}"));
    match url.scheme() {
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                PlayerError::new(ErrorCode::OpenInput, format!("not a local path: {url}"))
            })?;
            let file = File::open(&path).map_err(open_err)?;
            tracing::info!(path = %path.display(), "opened local file");
            Ok(OpenedSource {
                source: Box::new(file),
                extension: url_extension(url),
                transport_errors: None,
            })
        }
        "http" | "https" => {
            if PlaylistFormat::from_url(url) == Some(PlaylistFormat::Hls) {
                let feed = hls::open_hls(url, config, interrupt).map_err(open_err)?;
                Ok(OpenedSource {
                    transport_errors: Some(feed.error_slot()),
                    source: Box::new(feed),
                    extension: None,
                })
            } else {
                let feed = http::open_http(url, config, interrupt, titles).map_err(open_err)?;
                Ok(OpenedSource {
                    transport_errors: Some(feed.error_slot()),
                    source: Box::new(feed),
                    extension: url_extension(url),
                })
            }
        }
        other => Err(PlayerError::new(
            ErrorCode::OpenInput,
            format!("unsupported scheme {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme() {
        let url = Url::parse("ftp://host/a.mp3").unwrap();
        let err = open_source(&url, &PlayerConfig::default(), &InterruptFlag::new(), &TitleSlot::new())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::OpenInput);
    }

    #[test]
    fn missing_local_file_is_open_input_error() {
        let url = Url::from_file_path(std::env::temp_dir().join("radio-player-missing.mp3")).unwrap();
        let err = open_source(&url, &PlayerConfig::default(), &InterruptFlag::new(), &TitleSlot::new())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::OpenInput);
    }
}
