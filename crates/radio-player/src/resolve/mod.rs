//! Stream resolver: expands playlist URLs into candidate media URLs.
//!
//! Whether a URL is a playlist is decided by its path extension only. Non-playlist URLs
//! are returned unchanged without touching the network.

mod parse;

use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::config::PlayerConfig;
use crate::error::ResolveError;

/// Playlist document formats recognized by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistFormat {
    /// HLS manifest; handed to the decode pipeline as-is.
    Hls,
    M3u,
    Pls,
    Asx,
    Xspf,
}

impl PlaylistFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "m3u8" => Some(Self::Hls),
            "m3u" => Some(Self::M3u),
            "pls" => Some(Self::Pls),
            "asx" => Some(Self::Asx),
            "xspf" => Some(Self::Xspf),
            _ => None,
        }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        url_extension(url).and_then(|ext| Self::from_extension(&ext))
    }
}

/// Lowercased extension of the last path segment, if any.
pub fn url_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Parse user input into a URL. Absolute filesystem paths become `file://` URLs.
pub fn parse_url(raw: &str) -> Result<Url, ResolveError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) if Path::new(raw).is_absolute() => {
            Url::from_file_path(raw).map_err(|_| ResolveError::InvalidUrl {
                url: raw.to_string(),
                reason: "not an absolute path".to_string(),
            })
        }
        Err(e) => Err(ResolveError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Blocking playlist resolver.
#[derive(Clone, Debug)]
pub struct Resolver {
    timeout: Duration,
    user_agent: String,
}

impl Resolver {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            timeout: config.playlist_timeout,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Resolve `raw` into an ordered, never empty list of candidate media URLs.
    pub fn resolve(&self, raw: &str) -> Result<Vec<Url>, ResolveError> {
        let url = parse_url(raw)?;
        let Some(format) = PlaylistFormat::from_url(&url) else {
            return Ok(vec![url]);
        };

        tracing::debug!(url = %url, format = ?format, "downloading playlist");
        let body = self.fetch(&url)?;
        let content = String::from_utf8(body).map_err(|_| ResolveError::InvalidFormat)?;
        let content = content.trim_start_matches('\u{feff}');

        let urls = expand(format, &url, content);
        tracing::info!(url = %url, candidates = urls.len(), "playlist resolved");
        Ok(urls)
    }

    fn fetch(&self, url: &Url) -> Result<Vec<u8>, ResolveError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| ResolveError::Network(format!("bad file url {url}")))?;
            return std::fs::read(&path)
                .map_err(|e| ResolveError::Network(format!("read {}: {e}", path.display())));
        }

        let mut resp = ureq::get(url.as_str())
            .config()
            .timeout_global(Some(self.timeout))
            .build()
            .header("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| ResolveError::Network(e.to_string()))?;
        resp.body_mut()
            .read_to_vec()
            .map_err(|e| ResolveError::Network(e.to_string()))
    }
}

/// Dispatch to the format parser; falls back to `[base]` when nothing was found.
pub fn expand(format: PlaylistFormat, base: &Url, content: &str) -> Vec<Url> {
    let urls = match format {
        PlaylistFormat::Hls => Vec::new(),
        PlaylistFormat::M3u => parse::parse_m3u(base, content),
        PlaylistFormat::Pls => parse::parse_pls(base, content),
        PlaylistFormat::Asx => parse::parse_asx(base, content),
        PlaylistFormat::Xspf => parse::parse_xspf(base, content),
    };
    if urls.is_empty() {
        vec![base.clone()]
    } else {
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FixtureServer, Route};

    fn resolver() -> Resolver {
        Resolver::new(&PlayerConfig::default())
    }

    fn strings(urls: Vec<Url>) -> Vec<String> {
        urls.into_iter().map(String::from).collect()
    }

    #[test]
    fn format_detection_uses_extension_only() {
        let u = |s| Url::parse(s).unwrap();
        assert_eq!(PlaylistFormat::from_url(&u("http://a/b/list.M3U")), Some(PlaylistFormat::M3u));
        assert_eq!(PlaylistFormat::from_url(&u("http://a/live.m3u8?t=1")), Some(PlaylistFormat::Hls));
        assert_eq!(PlaylistFormat::from_url(&u("http://a/s.pls")), Some(PlaylistFormat::Pls));
        assert_eq!(PlaylistFormat::from_url(&u("http://a/s.asx")), Some(PlaylistFormat::Asx));
        assert_eq!(PlaylistFormat::from_url(&u("http://a/s.xspf")), Some(PlaylistFormat::Xspf));
        assert_eq!(PlaylistFormat::from_url(&u("http://a/stream.mp3")), None);
        assert_eq!(PlaylistFormat::from_url(&u("http://a/pls")), None);
        assert_eq!(PlaylistFormat::from_url(&u("http://a/")), None);
    }

    #[test]
    fn non_playlist_url_is_returned_unchanged() {
        // Port 9 is never served here: any network access would fail the test.
        for raw in ["http://127.0.0.1:9/stream.mp3", "https://127.0.0.1:9/live", "http://127.0.0.1:9/a.aac?x=1"] {
            let urls = resolver().resolve(raw).unwrap();
            assert_eq!(strings(urls), vec![Url::parse(raw).unwrap().to_string()]);
        }
    }

    #[test]
    fn parse_url_accepts_absolute_paths() {
        let url = parse_url("/tmp/song.flac").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(parse_url("not a url").is_err());
    }

    #[test]
    fn expand_falls_back_to_playlist_url_for_every_format() {
        let base = Url::parse("http://host/dir/list.x").unwrap();
        for format in [
            PlaylistFormat::M3u,
            PlaylistFormat::Pls,
            PlaylistFormat::Asx,
            PlaylistFormat::Xspf,
        ] {
            assert_eq!(expand(format, &base, "#nothing here\n"), vec![base.clone()]);
            assert_eq!(expand(format, &base, ""), vec![base.clone()]);
        }
    }

    #[test]
    fn resolves_m3u_fixture() {
        let server = FixtureServer::start(vec![(
            "/list.m3u",
            Route::body("#EXTM3U\nhttp://host/stream.mp3\n"),
        )]);
        let urls = resolver().resolve(&server.url("/list.m3u")).unwrap();
        assert_eq!(strings(urls), vec!["http://host/stream.mp3"]);
    }

    #[test]
    fn resolves_pls_relative_to_playlist() {
        let server = FixtureServer::start(vec![(
            "/dir/list.pls",
            Route::body("[playlist]\nFile1=relative.mp3\n"),
        )]);
        let urls = resolver().resolve(&server.url("/dir/list.pls")).unwrap();
        assert_eq!(strings(urls), vec![server.url("/dir/relative.mp3")]);
    }

    #[test]
    fn resolves_asx_and_xspf_relative_entries() {
        let server = FixtureServer::start(vec![
            (
                "/p/list.asx",
                Route::body(r#"<asx version="3.0"><entry><ref href="a.mp3"/></entry></asx>"#),
            ),
            (
                "/p/list.xspf",
                Route::body(
                    r#"<playlist xmlns="http://xspf.org/ns/0/"><trackList><track><location>b.ogg</location></track></trackList></playlist>"#,
                ),
            ),
        ]);
        let asx = resolver().resolve(&server.url("/p/list.asx")).unwrap();
        assert_eq!(strings(asx), vec![server.url("/p/a.mp3")]);
        let xspf = resolver().resolve(&server.url("/p/list.xspf")).unwrap();
        assert_eq!(strings(xspf), vec![server.url("/p/b.ogg")]);
    }

    #[test]
    fn empty_playlists_fall_back_to_original_url() {
        let server = FixtureServer::start(vec![
            ("/e.m3u", Route::body("#EXTM3U\n")),
            ("/e.pls", Route::body("[playlist]\nNumberOfEntries=0\n")),
            ("/e.asx", Route::body("<asx></asx>")),
            ("/e.xspf", Route::body("<playlist><trackList/></playlist>")),
        ]);
        for path in ["/e.m3u", "/e.pls", "/e.asx", "/e.xspf"] {
            let url = server.url(path);
            assert_eq!(strings(resolver().resolve(&url).unwrap()), vec![url.clone()]);
        }
    }

    #[test]
    fn hls_manifest_is_passed_through() {
        let server = FixtureServer::start(vec![(
            "/live.m3u8",
            Route::body("#EXTM3U\n#EXT-X-TARGETDURATION:6\nseg1.aac\n"),
        )]);
        let url = server.url("/live.m3u8");
        assert_eq!(strings(resolver().resolve(&url).unwrap()), vec![url.clone()]);
    }

    #[test]
    fn empty_body_falls_back_to_original_url() {
        let server = FixtureServer::start(vec![
            ("/empty.m3u", Route::body("")),
            ("/empty.xspf", Route::body("")),
        ]);
        for path in ["/empty.m3u", "/empty.xspf"] {
            let url = server.url(path);
            assert_eq!(strings(resolver().resolve(&url).unwrap()), vec![url.clone()]);
        }
    }

    #[test]
    fn bad_utf8_is_invalid_format() {
        let server = FixtureServer::start(vec![(
            "/bin.pls",
            Route::bytes(vec![0xff, 0xfe, 0x00, 0xc3]),
        )]);
        assert!(matches!(
            resolver().resolve(&server.url("/bin.pls")),
            Err(ResolveError::InvalidFormat)
        ));
    }

    #[test]
    fn download_failure_is_a_network_error() {
        let server = FixtureServer::start(vec![]);
        assert!(matches!(
            resolver().resolve(&server.url("/missing.m3u")),
            Err(ResolveError::Network(_))
        ));
    }
}
