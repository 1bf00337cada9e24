//! Seams between the playback state machine and the media stack.
//!
//! The control thread only talks to a [`MediaBackend`]; the real one opens Symphonia
//! pipelines and cpal streams, tests plug in fakes.

use std::sync::Arc;

use crossbeam_channel::Sender;
use url::Url;

use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::interrupt::InterruptFlag;
use crate::resample::OutputFormat;
use crate::ring::{PcmGuard, PcmRingBuffer};

/// Result of one decode step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// At least `target` bytes are buffered.
    Ready,
    /// The source ended; everything decoded so far has been appended.
    EndOfStream,
}

/// Pull-style producer of output-format PCM.
///
/// Runs on whichever thread drives the output (the audio callback for real devices).
pub trait PcmSource: Send {
    fn format(&self) -> OutputFormat;

    /// Ask for a different output sample rate. Called before the first decode step.
    fn set_output_rate(&mut self, rate: u32) -> Result<(), PlayerError>;

    /// Decode until `pcm` holds at least `target` bytes or the source ends.
    fn decode_next_chunk(
        &mut self,
        pcm: &mut PcmGuard<'_>,
        target: usize,
    ) -> Result<ChunkOutcome, PlayerError>;
}

/// A started output stream.
pub trait SinkHandle {
    /// Apply an effective gain in 0.0..=1.0.
    fn set_gain(&mut self, gain: f32) -> Result<(), PlayerError>;

    /// Stop output and release the stream (and with it the PCM source).
    fn stop(&mut self) -> Result<(), PlayerError>;
}

/// Opens sources and output streams for the control thread.
pub trait MediaBackend {
    fn open(&mut self, url: &Url, ctx: &SessionContext) -> Result<Box<dyn PcmSource>, PlayerError>;

    /// Prefill the buffer pool from `source` and start output on `device`.
    fn start_sink(
        &mut self,
        source: Box<dyn PcmSource>,
        ctx: &SessionContext,
        device: Option<&str>,
        gain: f32,
    ) -> Result<Box<dyn SinkHandle>, PlayerError>;
}

/// Asynchronous report from a running session to the control thread.
#[derive(Debug)]
pub enum SessionEvent {
    /// Raw in-band title; cleaned and deduplicated on the control thread.
    Title(String),
    /// Fatal error raised while streaming.
    Failed(PlayerError),
    /// The source ended and every output buffer drained.
    Finished,
}

/// Sends [`SessionEvent`]s tagged with the session they belong to.
#[derive(Clone, Debug)]
pub struct SessionReporter {
    session: u64,
    tx: Sender<(u64, SessionEvent)>,
}

impl SessionReporter {
    pub fn new(session: u64, tx: Sender<(u64, SessionEvent)>) -> Self {
        Self { session, tx }
    }

    pub fn title(&self, raw: String) {
        let _ = self.tx.send((self.session, SessionEvent::Title(raw)));
    }

    pub fn failed(&self, err: PlayerError) {
        let _ = self.tx.send((self.session, SessionEvent::Failed(err)));
    }

    pub fn finished(&self) {
        let _ = self.tx.send((self.session, SessionEvent::Finished));
    }
}

/// Everything a session's pipeline and sink share.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub interrupt: InterruptFlag,
    pub ring: Arc<PcmRingBuffer>,
    pub reporter: SessionReporter,
    pub config: PlayerConfig,
}
