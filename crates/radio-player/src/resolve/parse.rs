//! Playlist body parsers.
//!
//! Every parser resolves entries relative to the playlist's own URL and silently skips
//! entries that do not form a valid URL. An empty result is handled by the caller.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

/// M3U: every trimmed line that is neither blank nor a `#` comment.
pub(crate) fn parse_m3u(base: &Url, content: &str) -> Vec<Url> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| join(base, line))
        .collect()
}

/// PLS: values of `File<N>=value` lines.
pub(crate) fn parse_pls(base: &Url, content: &str) -> Vec<Url> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            let index = key.get(..4).filter(|p| p.eq_ignore_ascii_case("file")).map(|_| &key[4..])?;
            if !index.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            join(base, value.trim())
        })
        .collect()
}

/// ASX: `href` of every `ref` element. Names are matched case-insensitively.
pub(crate) fn parse_asx(base: &Url, content: &str) -> Vec<Url> {
    let mut reader = xml_reader(content);
    let mut out = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref().eq_ignore_ascii_case(b"ref") {
                    if let Some(href) = attribute_ci(&e, b"href") {
                        out.extend(join(base, href.trim()));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "asx parse stopped");
                break;
            }
            _ => {}
        }
    }
    out
}

/// XSPF: text of `location` elements nested in a `track`.
pub(crate) fn parse_xspf(base: &Url, content: &str) -> Vec<Url> {
    let mut reader = xml_reader(content);
    let mut out = Vec::new();
    let mut track_depth = 0usize;
    let mut location: Option<String> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"track" => track_depth += 1,
                b"location" if track_depth > 0 => location = Some(String::new()),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"track" => track_depth = track_depth.saturating_sub(1),
                b"location" => {
                    if let Some(text) = location.take() {
                        out.extend(join(base, text.trim()));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(buf) = location.as_mut() {
                    match t.unescape() {
                        Ok(text) => buf.push_str(&text),
                        Err(_) => buf.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(buf) = location.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "xspf parse stopped");
                break;
            }
            _ => {}
        }
    }
    out
}

fn xml_reader(content: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(content);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    reader
}

/// Attribute value by case-insensitive local name. Values with stray `&` are kept raw.
fn attribute_ci(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if !attr.key.local_name().as_ref().eq_ignore_ascii_case(name) {
            return None;
        }
        Some(
            attr.unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned()),
        )
    })
}

fn join(base: &Url, entry: &str) -> Option<Url> {
    if entry.is_empty() {
        return None;
    }
    base.join(entry).ok()
}
