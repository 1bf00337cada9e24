//! SHOUTcast/Icecast in-band metadata.
//!
//! With `Icy-MetaData: 1` the server interleaves a metadata block after every
//! `icy-metaint` audio bytes: one length byte (in units of 16 bytes) followed by
//! `StreamTitle='...';` style text padded with NULs.

/// Splits an ICY stream into audio bytes and metadata titles.
#[derive(Debug)]
pub(crate) struct IcyDemuxer {
    metaint: usize,
    state: State,
}

#[derive(Debug)]
enum State {
    Audio { left: usize },
    Length,
    Meta { left: usize, buf: Vec<u8> },
}

impl IcyDemuxer {
    pub(crate) fn new(metaint: usize) -> Self {
        Self {
            metaint,
            state: State::Audio { left: metaint },
        }
    }

    /// Consume `input`, appending audio to `audio` and returning any complete titles.
    pub(crate) fn push(&mut self, mut input: &[u8], audio: &mut Vec<u8>) -> Vec<String> {
        let mut titles = Vec::new();
        while !input.is_empty() {
            match &mut self.state {
                State::Audio { left } => {
                    let n = (*left).min(input.len());
                    audio.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    *left -= n;
                    if *left == 0 {
                        self.state = State::Length;
                    }
                }
                State::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.state = if len == 0 {
                        State::Audio { left: self.metaint }
                    } else {
                        State::Meta {
                            left: len,
                            buf: Vec::with_capacity(len),
                        }
                    };
                }
                State::Meta { left, buf } => {
                    let n = (*left).min(input.len());
                    buf.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    *left -= n;
                    if *left == 0 {
                        let text = String::from_utf8_lossy(buf).into_owned();
                        titles.extend(parse_stream_title(&text));
                        self.state = State::Audio { left: self.metaint };
                    }
                }
            }
        }
        titles
    }
}

/// Extract `StreamTitle` from a metadata block; empty titles are ignored.
pub(crate) fn parse_stream_title(block: &str) -> Option<String> {
    let block = block.trim_end_matches('\0');
    let start = block.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &block[start..];
    let end = rest.find("';").unwrap_or_else(|| rest.trim_end_matches(';').trim_end_matches('\'').len());
    let title = rest[..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
