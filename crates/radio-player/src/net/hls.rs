//! HLS source for packed-audio streams.
//!
//! Follows the first variant of a master playlist, then downloads media segments in
//! order and concatenates their bytes into one [`ByteFeed`]. Live playlists are
//! re-polled every target duration; `#EXT-X-ENDLIST` ends the stream.

use std::io;
use std::thread;
use std::time::Duration;

use url::Url;

use super::feed::{ByteFeed, FeedSender, FeedWatch, byte_feed};
use super::http::{request_error, stream_agent};
use crate::config::PlayerConfig;
use crate::interrupt::InterruptFlag;

/// Parsed media playlist.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct MediaPlaylist {
    pub(crate) target_duration: Duration,
    pub(crate) media_sequence: u64,
    pub(crate) segments: Vec<Url>,
    pub(crate) ended: bool,
    pub(crate) encrypted: bool,
}

/// URI of the first `#EXT-X-STREAM-INF` variant, if `text` is a master playlist.
pub(crate) fn first_variant(base: &Url, text: &str) -> Option<Url> {
    let mut lines = text.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line.starts_with("#EXT-X-STREAM-INF") {
            let uri = lines.find(|l| !l.is_empty() && !l.starts_with('#'))?;
            return base.join(uri).ok();
        }
    }
    None
}

pub(crate) fn parse_media_playlist(base: &Url, text: &str) -> MediaPlaylist {
    let mut playlist = MediaPlaylist {
        target_duration: Duration::from_secs(6),
        ..MediaPlaylist::default()
    };
    for line in text.lines().map(str::trim) {
        if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            if let Ok(secs) = v.trim().parse::<f64>() {
                if secs > 0.0 {
                    playlist.target_duration = Duration::from_secs_f64(secs);
                }
            }
        } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = v.trim().parse().unwrap_or(0);
        } else if line.starts_with("#EXT-X-ENDLIST") {
            playlist.ended = true;
        } else if let Some(v) = line.strip_prefix("#EXT-X-KEY:") {
            playlist.encrypted |= !v.contains("METHOD=NONE");
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Ok(url) = base.join(line) {
                playlist.segments.push(url);
            }
        }
    }
    playlist
}

/// Length of a leading ID3v2 tag (packed-audio segments carry one with a timestamp).
fn id3_len(bytes: &[u8]) -> usize {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return 0;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b as usize & 0x7f));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    (10 + size + footer).min(bytes.len())
}

pub(crate) fn open_hls(
    url: &Url,
    config: &PlayerConfig,
    interrupt: &InterruptFlag,
) -> io::Result<ByteFeed> {
    let (tx, feed) = byte_feed(
        config.feed_capacity,
        interrupt.clone(),
        config.read_timeout,
        config.max_read_timeouts,
    );
    let url = url.clone();
    let config = config.clone();
    thread::Builder::new()
        .name("radio-hls".into())
        .spawn(move || match run(&url, &config, &tx) {
            Ok(()) => tx.finish(),
            Err(err) if tx.is_closed() => {
                tracing::debug!(url = %url, error = %err, "hls fetch ended after stop");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "hls fetch failed");
                tx.fail(err);
            }
        })?;
    Ok(feed)
}

fn run(url: &Url, config: &PlayerConfig, tx: &FeedSender) -> io::Result<()> {
    let agent = stream_agent(config, tx.watch());
    let mut playlist_url = url.clone();
    let text = fetch_text(&agent, &playlist_url, config)?;
    let mut playlist = match first_variant(&playlist_url, &text) {
        Some(variant) => {
            tracing::info!(variant = %variant, "hls variant selected");
            playlist_url = variant;
            parse_media_playlist(&playlist_url, &fetch_text(&agent, &playlist_url, config)?)
        }
        None => parse_media_playlist(&playlist_url, &text),
    };

    // Sequence number of the next segment to fetch.
    let mut next_seq: Option<u64> = None;
    loop {
        if playlist.encrypted {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "encrypted hls segments are not supported",
            ));
        }
        let first = playlist.media_sequence;
        let start = next_seq.unwrap_or(first);
        if start < first {
            tracing::warn!(skipped = first - start, "hls fell behind the live window");
        }
        for (i, segment) in playlist.segments.iter().enumerate() {
            let seq = first + i as u64;
            if seq < start {
                continue;
            }
            if tx.is_closed() {
                return Ok(());
            }
            let bytes = fetch_bytes(&agent, segment, config)?;
            let skip = id3_len(&bytes);
            tracing::debug!(seq, bytes = bytes.len(), "hls segment");
            if !tx.send(bytes[skip..].to_vec()) {
                return Ok(());
            }
            next_seq = Some(seq + 1);
        }
        if playlist.ended {
            return Ok(());
        }
        if next_seq.is_none() {
            next_seq = Some(first + playlist.segments.len() as u64);
        }
        if !sleep_until_closed(playlist.target_duration, &tx.watch()) {
            return Ok(());
        }
        playlist = parse_media_playlist(&playlist_url, &fetch_text(&agent, &playlist_url, config)?);
    }
}

/// Sleep for `total`; false when the feed closed first.
fn sleep_until_closed(total: Duration, watch: &FeedWatch) -> bool {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < total {
        if watch.is_closed() {
            return false;
        }
        let nap = step.min(total - slept);
        thread::sleep(nap);
        slept += nap;
    }
    !watch.is_closed()
}

fn fetch_bytes(agent: &ureq::Agent, url: &Url, config: &PlayerConfig) -> io::Result<Vec<u8>> {
    let mut resp = agent
        .get(url.as_str())
        .config()
        .timeout_global(Some(config.read_timeout * config.max_read_timeouts))
        .build()
        .header("User-Agent", &config.user_agent)
        .call()
        .map_err(request_error)?;
    resp.body_mut()
        .with_config()
        .limit(64 * 1024 * 1024)
        .read_to_vec()
        .map_err(request_error)
}

fn fetch_text(agent: &ureq::Agent, url: &Url, config: &PlayerConfig) -> io::Result<String> {
    let bytes = fetch_bytes(agent, url, config)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "hls playlist is not utf-8"))
}
