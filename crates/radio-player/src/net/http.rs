//! Progressive HTTP stream source (Icecast/SHOUTcast and plain files over HTTP).
//!
//! A fetch thread performs the request, strips ICY metadata when the server interleaves
//! it, and pushes audio bytes into a [`ByteFeed`].
//!
//! Stream requests go through [`stream_agent`], whose socket waits are cut into short
//! slices so a fetch thread blocked on a silent server exits soon after the feed closes.

use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, DefaultConnector, NextTimeout, Transport,
};
use url::Url;

use super::feed::{ByteFeed, FeedSender, FeedWatch, byte_feed};
use super::icy::IcyDemuxer;
use crate::config::PlayerConfig;
use crate::interrupt::{self, InterruptFlag};
use crate::metadata::TitleSlot;

const SOCKET_POLL: Duration = Duration::from_millis(100);

/// Start streaming `url` on a background thread.
pub(crate) fn open_http(
    url: &Url,
    config: &PlayerConfig,
    interrupt: &InterruptFlag,
    titles: &TitleSlot,
) -> io::Result<ByteFeed> {
    let (tx, feed) = byte_feed(
        config.feed_capacity,
        interrupt.clone(),
        config.read_timeout,
        config.max_read_timeouts,
    );
    let url = url.clone();
    let config = config.clone();
    let titles = titles.clone();
    thread::Builder::new()
        .name("radio-http".into())
        .spawn(move || {
            if let Err(err) = fetch(&url, &config, &tx, &titles) {
                if tx.is_closed() {
                    tracing::debug!(url = %url, error = %err, "http fetch ended after stop");
                } else {
                    tracing::warn!(url = %url, error = %err, "http fetch failed");
                    tx.fail(err);
                }
                return;
            }
            tx.finish();
        })?;
    Ok(feed)
}

fn fetch(url: &Url, config: &PlayerConfig, tx: &FeedSender, titles: &TitleSlot) -> io::Result<()> {
    let started = Instant::now();
    let resp = stream_agent(config, tx.watch())
        .get(url.as_str())
        .header("User-Agent", &config.user_agent)
        .header("Icy-MetaData", "1")
        .call()
        .map_err(request_error)?;

    let metaint = resp
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0);
    let content_type = resp
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    tracing::info!(
        url = %url,
        status = resp.status().as_u16(),
        content_type = content_type.as_str(),
        metaint = metaint.unwrap_or(0),
        took_ms = started.elapsed().as_millis() as u64,
        "stream connected"
    );

    let (_, body) = resp.into_parts();
    let mut reader = body.into_reader();
    let mut icy = metaint.map(IcyDemuxer::new);
    let mut buf = vec![0u8; config.feed_chunk_bytes];
    loop {
        if tx.is_closed() {
            return Ok(());
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let audio = match icy.as_mut() {
            Some(demux) => {
                let mut audio = Vec::with_capacity(n);
                for title in demux.push(&buf[..n], &mut audio) {
                    tracing::debug!(title = title.as_str(), "icy title");
                    titles.publish(title);
                }
                audio
            }
            None => buf[..n].to_vec(),
        };
        if !tx.send(audio) {
            return Ok(());
        }
    }
}

/// HTTP agent for stream traffic. Every socket wait gives up once `watch` closes.
pub(crate) fn stream_agent(config: &PlayerConfig, watch: FeedWatch) -> ureq::Agent {
    let agent_config = ureq::Agent::config_builder()
        .timeout_connect(Some(config.read_timeout))
        .timeout_recv_response(Some(config.read_timeout * config.max_read_timeouts))
        .build();
    let connector = DefaultConnector::new().chain(WatchedConnector { watch });
    ureq::Agent::with_parts(agent_config, connector, DefaultResolver::default())
}

/// Wraps every connection in a [`WatchedTransport`].
#[derive(Debug)]
struct WatchedConnector {
    watch: FeedWatch,
}

impl Connector<Box<dyn Transport>> for WatchedConnector {
    type Out = WatchedTransport;

    fn connect(
        &self,
        _details: &ConnectionDetails,
        chained: Option<Box<dyn Transport>>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        Ok(chained.map(|inner| WatchedTransport {
            inner,
            watch: self.watch.clone(),
        }))
    }
}

/// Transport whose input waits run in [`SOCKET_POLL`] slices, checking the watch between
/// slices. The caller's overall timeout still applies.
#[derive(Debug)]
struct WatchedTransport {
    inner: Box<dyn Transport>,
    watch: FeedWatch,
}

impl Transport for WatchedTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.inner.transmit_output(amount, timeout)
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let started = Instant::now();
        let total: Duration = *timeout.after;
        loop {
            if self.watch.is_closed() {
                return Err(ureq::Error::Io(interrupt::aborted_error()));
            }
            let slice = if timeout.after.is_not_happening() {
                SOCKET_POLL
            } else {
                let left = total.saturating_sub(started.elapsed());
                if left.is_zero() {
                    return Err(ureq::Error::Timeout(timeout.reason));
                }
                left.min(SOCKET_POLL)
            };
            let next = NextTimeout {
                after: slice.into(),
                reason: timeout.reason,
            };
            match self.inner.await_input(next) {
                Err(err) if is_wait_timeout(&err) => continue,
                other => return other,
            }
        }
    }

    fn is_open(&mut self) -> bool {
        self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

fn is_wait_timeout(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Timeout(_) => true,
        ureq::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ),
        _ => false,
    }
}

pub(crate) fn request_error(err: ureq::Error) -> io::Error {
    match err {
        ureq::Error::Timeout(t) => {
            io::Error::new(io::ErrorKind::TimedOut, format!("http request timed out: {t}"))
        }
        ureq::Error::Io(e) => e,
        other => io::Error::other(format!("http request failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FixtureServer, Route};
    use std::time::Duration;

    fn config() -> PlayerConfig {
        PlayerConfig {
            read_timeout: Duration::from_millis(300),
            max_read_timeouts: 2,
            ..PlayerConfig::default()
        }
    }

    #[test]
    fn streams_plain_body() {
        let server = FixtureServer::start(vec![("/s.mp3", Route::bytes(vec![7u8; 5000]))]);
        let url = Url::parse(&server.url("/s.mp3")).unwrap();
        let mut feed = open_http(&url, &config(), &InterruptFlag::new(), &TitleSlot::new()).unwrap();
        let mut all = Vec::new();
        feed.read_to_end(&mut all).unwrap();
        assert_eq!(all, vec![7u8; 5000]);
    }

    #[test]
    fn strips_icy_metadata_and_publishes_title() {
        let mut body = vec![1u8; 16];
        let meta = b"StreamTitle='Band - Tune';";
        let blocks = meta.len().div_ceil(16);
        body.push(blocks as u8);
        body.extend_from_slice(meta);
        body.resize(16 + 1 + blocks * 16, 0);
        body.extend_from_slice(&[2u8; 10]);

        let server = FixtureServer::start(vec![(
            "/live",
            Route::bytes(body).header("icy-metaint", "16"),
        )]);
        let url = Url::parse(&server.url("/live")).unwrap();
        let titles = TitleSlot::new();
        let mut feed = open_http(&url, &config(), &InterruptFlag::new(), &titles).unwrap();
        let mut all = Vec::new();
        feed.read_to_end(&mut all).unwrap();

        let mut expected = vec![1u8; 16];
        expected.extend_from_slice(&[2u8; 10]);
        assert_eq!(all, expected);
        assert_eq!(titles.take().as_deref(), Some("Band - Tune"));
    }

    #[test]
    fn stalled_server_times_out() {
        let server = FixtureServer::start(vec![("/stall", Route::stall())]);
        let url = Url::parse(&server.url("/stall")).unwrap();
        let mut feed = open_http(&url, &config(), &InterruptFlag::new(), &TitleSlot::new()).unwrap();
        let err = feed.read(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn closing_the_feed_unblocks_a_stalled_request() {
        let server = FixtureServer::start(vec![("/stall", Route::stall())]);
        let url = server.url("/stall");
        let config = PlayerConfig {
            read_timeout: Duration::from_secs(30),
            max_read_timeouts: 2,
            ..PlayerConfig::default()
        };
        let (tx, feed) = byte_feed(4, InterruptFlag::new(), config.read_timeout, 2);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let watch = tx.watch();
        thread::spawn(move || {
            let result = stream_agent(&config, watch)
                .get(url.as_str())
                .call()
                .map_err(request_error)
                .and_then(|resp| {
                    let mut sink = Vec::new();
                    resp.into_body().into_reader().read_to_end(&mut sink)
                });
            let _ = done_tx.send(result.map(|_| ()));
        });

        thread::sleep(Duration::from_millis(200));
        drop(feed);
        let result = done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("stalled request should return once the feed closes");
        assert!(result.is_err());
        drop(tx);
    }

    #[test]
    fn missing_resource_fails_the_feed() {
        let server = FixtureServer::start(vec![]);
        let url = Url::parse(&server.url("/gone.mp3")).unwrap();
        let mut feed = open_http(&url, &config(), &InterruptFlag::new(), &TitleSlot::new()).unwrap();
        let err = feed.read(&mut [0u8; 16]).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::TimedOut);
    }
}
