//! Byte feed between a network fetch thread and the demuxer.
//!
//! Blocking transport reads cannot be interrupted, so the transport runs on its own
//! thread and hands chunks over a bounded channel. The demuxer side waits on the channel
//! in short polls, checking the interrupt flag between polls. A read that sees no bytes
//! for `read_timeout` is retried; after `max_timeouts` consecutive timeouts it fails with
//! `io::ErrorKind::TimedOut` and the feed stays failed.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use symphonia::core::io::MediaSource;

use crate::interrupt::InterruptFlag;

const POLL: Duration = Duration::from_millis(50);

enum FeedMsg {
    Data(Vec<u8>),
    End,
    Failed(io::Error),
}

/// Tells a fetch thread whether anyone still wants its bytes.
#[derive(Clone, Debug)]
pub(crate) struct FeedWatch {
    interrupt: InterruptFlag,
    closed: Arc<AtomicBool>,
}

impl FeedWatch {
    /// True once playback was stopped or the consumer dropped the feed.
    pub(crate) fn is_closed(&self) -> bool {
        self.interrupt.is_raised() || self.closed.load(Ordering::SeqCst)
    }
}

/// Last transport error a [`ByteFeed`] returned.
///
/// Format detection swallows read errors, so the open path reads the cause from here.
#[derive(Clone, Debug, Default)]
pub struct FeedErrorSlot(Arc<Mutex<Option<(io::ErrorKind, String)>>>);

impl FeedErrorSlot {
    fn record(&self, err: &io::Error) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((err.kind(), err.to_string()));
    }

    pub fn get(&self) -> Option<io::Error> {
        let slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()))
    }
}

/// Producer half, owned by the fetch thread.
pub(crate) struct FeedSender {
    tx: Sender<FeedMsg>,
    watch: FeedWatch,
}

/// Consumer half; a non-seekable `MediaSource`.
pub struct ByteFeed {
    rx: Receiver<FeedMsg>,
    interrupt: InterruptFlag,
    closed: Arc<AtomicBool>,
    read_timeout: Duration,
    max_timeouts: u32,
    timeouts: u32,
    chunk: Vec<u8>,
    pos: usize,
    finished: bool,
    /// Transport failure, repeated on every later read.
    failure: Option<(io::ErrorKind, String)>,
    errors: FeedErrorSlot,
}

pub(crate) fn byte_feed(
    capacity: usize,
    interrupt: InterruptFlag,
    read_timeout: Duration,
    max_timeouts: u32,
) -> (FeedSender, ByteFeed) {
    let (tx, rx) = bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        FeedSender {
            tx,
            watch: FeedWatch {
                interrupt: interrupt.clone(),
                closed: closed.clone(),
            },
        },
        ByteFeed {
            rx,
            interrupt,
            closed,
            read_timeout,
            max_timeouts: max_timeouts.max(1),
            timeouts: 0,
            chunk: Vec::new(),
            pos: 0,
            finished: false,
            failure: None,
            errors: FeedErrorSlot::default(),
        },
    )
}

impl FeedSender {
    /// Queue a chunk. Returns `false` once the consumer is gone or playback was stopped;
    /// the fetch thread should exit then.
    pub(crate) fn send(&self, bytes: Vec<u8>) -> bool {
        if bytes.is_empty() {
            return !self.is_closed();
        }
        let mut msg = FeedMsg::Data(bytes);
        loop {
            if self.is_closed() {
                return false;
            }
            match self.tx.send_timeout(msg, POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => msg = back,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    pub(crate) fn finish(self) {
        let _ = self.tx.send_timeout(FeedMsg::End, POLL);
    }

    pub(crate) fn fail(self, err: io::Error) {
        let _ = self.tx.send_timeout(FeedMsg::Failed(err), POLL);
    }

    /// True when nobody will read further bytes.
    pub(crate) fn is_closed(&self) -> bool {
        self.watch.is_closed()
    }

    pub(crate) fn watch(&self) -> FeedWatch {
        self.watch.clone()
    }
}

impl ByteFeed {
    pub fn error_slot(&self) -> FeedErrorSlot {
        self.errors.clone()
    }

    /// Wait for the next chunk. `Ok(false)` means the stream ended.
    fn next_chunk(&mut self) -> io::Result<bool> {
        let mut deadline = Instant::now() + self.read_timeout;
        loop {
            self.interrupt.check()?;
            let wait = deadline.saturating_duration_since(Instant::now()).min(POLL);
            match self.rx.recv_timeout(wait) {
                Ok(FeedMsg::Data(bytes)) => {
                    self.timeouts = 0;
                    self.chunk = bytes;
                    self.pos = 0;
                    return Ok(true);
                }
                Ok(FeedMsg::End) | Err(RecvTimeoutError::Disconnected) => {
                    self.finished = true;
                    return Ok(false);
                }
                Ok(FeedMsg::Failed(err)) => return Err(self.fail(err)),
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() < deadline {
                        continue;
                    }
                    self.interrupt.check()?;
                    self.timeouts += 1;
                    if self.timeouts >= self.max_timeouts {
                        let err = io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "no data after {} reads of {} ms",
                                self.timeouts,
                                self.read_timeout.as_millis()
                            ),
                        );
                        return Err(self.fail(err));
                    }
                    tracing::warn!(
                        attempt = self.timeouts,
                        max = self.max_timeouts,
                        "read timed out, waiting again"
                    );
                    deadline = Instant::now() + self.read_timeout;
                }
            }
        }
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.finished = true;
        self.failure = Some((err.kind(), err.to_string()));
        self.errors.record(&err);
        err
    }
}

impl Drop for ByteFeed {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Read for ByteFeed {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            if self.finished {
                return match &self.failure {
                    Some((kind, msg)) => Err(io::Error::new(*kind, msg.clone())),
                    None => Ok(0),
                };
            }
            if !self.next_chunk()? {
                return Ok(0);
            }
        }
        let n = out.len().min(self.chunk.len() - self.pos);
        out[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for ByteFeed {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live streams are not seekable",
        ))
    }
}

impl MediaSource for ByteFeed {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
