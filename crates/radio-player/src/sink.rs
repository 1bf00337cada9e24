//! Audio sink driver.
//!
//! A fixed pool of output buffers is cycled through the device callback. When the
//! callback has played a buffer, the buffer is refilled from the PCM ring (running a
//! decode step inline when the ring is short) and queued again. A refill that fails
//! queues the buffer empty, which plays as silence, and reports the error.
//!
//! The callback:
//! - pulls samples from the pool in output-format order
//! - applies channel mapping (mono↔stereo)
//! - applies the current gain and converts to the device sample format

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::backend::{ChunkOutcome, PcmSource, SessionContext, SessionReporter, SinkHandle};
use crate::device;
use crate::error::{ErrorCode, PlayerError};
use crate::interrupt::InterruptFlag;
use crate::resample::{OutputFormat, SampleClass};
use crate::ring::PcmRingBuffer;

/// One output buffer: `len` valid bytes, `pos` already played.
#[derive(Debug)]
struct HwBuffer {
    data: Vec<u8>,
    len: usize,
    pos: usize,
}

impl HwBuffer {
    fn drained(&self) -> bool {
        self.pos >= self.len
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceState {
    Streaming,
    Ended,
    Failed,
}

/// The buffer pool plus the source that refills it.
pub struct BufferPool {
    source: Box<dyn PcmSource>,
    format: OutputFormat,
    ring: Arc<PcmRingBuffer>,
    interrupt: InterruptFlag,
    reporter: SessionReporter,
    /// Buffers in play order; the front one is playing.
    queue: VecDeque<HwBuffer>,
    state: SourceState,
    finished_reported: bool,
}

impl BufferPool {
    pub fn new(source: Box<dyn PcmSource>, ctx: &SessionContext) -> Self {
        let size = ctx.config.buffer_bytes;
        let queue = (0..ctx.config.buffer_count.max(1))
            .map(|_| HwBuffer {
                data: vec![0u8; size],
                len: 0,
                pos: 0,
            })
            .collect();
        Self {
            format: source.format(),
            source,
            ring: ctx.ring.clone(),
            interrupt: ctx.interrupt.clone(),
            reporter: ctx.reporter.clone(),
            queue,
            state: SourceState::Streaming,
            finished_reported: false,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Fill every buffer once before output starts. Errors are returned, not reported.
    pub fn prefill(&mut self) -> Result<(), PlayerError> {
        for _ in 0..self.queue.len() {
            let mut buf = self.queue.pop_front().ok_or_else(|| {
                PlayerError::new(ErrorCode::SinkCreate, "empty buffer pool")
            })?;
            let result = self.refill(&mut buf);
            self.queue.push_back(buf);
            result?;
        }
        let queued: usize = self.queue.iter().map(|b| b.len).sum();
        tracing::debug!(buffers = self.queue.len(), bytes = queued, "buffer pool prefilled");
        Ok(())
    }

    /// Refill one buffer from the ring, decoding inline when the ring is short.
    fn refill(&mut self, buf: &mut HwBuffer) -> Result<(), PlayerError> {
        let size = buf.data.len();
        let mut pcm = self.ring.lock();
        let mut result = Ok(());
        if pcm.len() < size && self.state == SourceState::Streaming {
            match self.source.decode_next_chunk(&mut pcm, size) {
                Ok(ChunkOutcome::Ready) => {}
                Ok(ChunkOutcome::EndOfStream) => self.state = SourceState::Ended,
                Err(err) => {
                    self.state = SourceState::Failed;
                    result = Err(err);
                }
            }
        }
        let frame = self.format.bytes_per_frame().max(1);
        let n = (size.min(pcm.len()) / frame) * frame;
        pcm.copy_front(&mut buf.data[..n]);
        pcm.remove_front(n);
        buf.len = n;
        buf.pos = 0;
        result
    }

    /// Refill from the device callback: failures become silence plus a report.
    fn refill_in_callback(&mut self, buf: &mut HwBuffer) {
        if let Err(err) = self.refill(buf) {
            if err.is_aborted() || self.interrupt.is_raised() {
                tracing::debug!("refill aborted");
            } else {
                tracing::error!(error = %err, "refill failed");
                self.reporter.failed(err);
            }
        }
    }

    /// Fill `out` with interleaved output-format samples as `f32`. Missing audio is
    /// written as silence. Returns the number of samples that carried audio.
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        let mut refilled_empty = false;
        while written < out.len() {
            let Some(front) = self.queue.front_mut() else {
                break;
            };
            if !front.drained() {
                written += copy_samples(self.format.class, front, &mut out[written..]);
                continue;
            }
            if refilled_empty {
                break;
            }
            let Some(mut buf) = self.queue.pop_front() else {
                break;
            };
            if self.state == SourceState::Streaming || !self.ring.is_empty() {
                self.refill_in_callback(&mut buf);
            } else {
                buf.len = 0;
                buf.pos = 0;
            }
            if buf.len == 0 {
                refilled_empty = true;
            }
            self.queue.push_back(buf);
        }
        out[written..].fill(0.0);
        self.check_finished();
        written
    }

    /// Report end of playback once the source ended and every buffer has drained.
    fn check_finished(&mut self) {
        if self.finished_reported || self.state != SourceState::Ended {
            return;
        }
        if self.queue.iter().all(HwBuffer::drained) && self.ring.is_empty() {
            self.finished_reported = true;
            tracing::info!("output drained");
            self.reporter.finished();
        }
    }
}

/// Copy whole samples from `buf` into `out`; returns samples written.
fn copy_samples(class: SampleClass, buf: &mut HwBuffer, out: &mut [f32]) -> usize {
    let bytes = &buf.data[buf.pos..buf.len];
    let count = out.len().min(bytes.len() / OutputFormat::BYTES_PER_SAMPLE);
    for (dst, b) in out[..count].iter_mut().zip(bytes.chunks_exact(4)) {
        let raw = [b[0], b[1], b[2], b[3]];
        *dst = match class {
            SampleClass::Float => f32::from_ne_bytes(raw),
            SampleClass::Int => (i32::from_ne_bytes(raw) as f64 / 2_147_483_648.0) as f32,
        };
    }
    buf.pos += count * OutputFormat::BYTES_PER_SAMPLE;
    if count == 0 {
        // Trailing partial sample; treat the buffer as played.
        buf.pos = buf.len;
    }
    count
}

/// Read one destination sample from a source frame.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - otherwise clamp to the available channels
fn map_channel(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let src = |ch: usize| frame.get(ch).copied().unwrap_or(0.0);
    match (frame.len(), dst_channels) {
        (2, 1) => 0.5 * (src(0) + src(1)),
        (1, _) => src(0),
        (n, _) => src(dst_ch.min(n.saturating_sub(1))),
    }
}

/// Gain shared with the callback, stored as `f32` bits.
#[derive(Clone, Debug)]
pub struct SharedGain(Arc<AtomicU32>);

impl SharedGain {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.to_bits())))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// A running cpal output stream.
pub struct CpalSink {
    stream: Option<cpal::Stream>,
    gain: SharedGain,
}

impl CpalSink {
    /// Pick the device and config, prefill the pool and start the stream.
    pub fn start(
        source: Box<dyn PcmSource>,
        ctx: &SessionContext,
        device_name: Option<&str>,
        gain: f32,
    ) -> Result<Self, PlayerError> {
        let mut source = source;
        let host = cpal::default_host();
        let device = device::pick_device(&host, device_name)
            .map_err(|e| PlayerError::new(ErrorCode::SinkDevice, format!("{e:#}")))?;
        let format = source.format();
        let supported = device::pick_output_config(&device, Some(format.sample_rate))
            .map_err(|e| PlayerError::new(ErrorCode::SinkDevice, format!("{e:#}")))?;
        let device_rate = supported.sample_rate();
        if device_rate != format.sample_rate {
            source.set_output_rate(device_rate)?;
        }
        let mut stream_config = supported.config();
        if let Some(size) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = size;
        }

        let mut pool = BufferPool::new(source, ctx);
        pool.prefill()?;

        let gain = SharedGain::new(gain);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, pool, &gain, ctx),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, pool, &gain, ctx),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, pool, &gain, ctx),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, pool, &gain, ctx),
            other => Err(PlayerError::new(
                ErrorCode::SinkCreate,
                format!("unsupported sample format {other:?}"),
            )),
        }?;
        stream
            .play()
            .map_err(|e| PlayerError::new(ErrorCode::SinkStart, e.to_string()))?;
        tracing::info!(
            device = device
                .description()
                .map(|d| d.name().to_string())
                .unwrap_or_default()
                .as_str(),
            rate = device_rate,
            channels = stream_config.channels,
            "output started"
        );
        Ok(Self {
            stream: Some(stream),
            gain,
        })
    }
}

impl SinkHandle for CpalSink {
    fn set_gain(&mut self, gain: f32) -> Result<(), PlayerError> {
        self.gain.set(gain);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlayerError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let result = stream
            .pause()
            .map_err(|e| PlayerError::new(ErrorCode::SinkStop, e.to_string()));
        // Dropping the stream joins the callback and releases the pipeline it owns.
        drop(stream);
        result
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut pool: BufferPool,
    gain: &SharedGain,
    ctx: &SessionContext,
) -> Result<cpal::Stream, PlayerError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let src_channels = pool.format().channels as usize;
    let gain = gain.clone();
    let mut scratch: Vec<f32> = Vec::new();

    let reporter = ctx.reporter.clone();
    let interrupt = ctx.interrupt.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        if !interrupt.is_raised() {
            reporter.failed(PlayerError::new(ErrorCode::SinkDevice, err.to_string()));
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let frames = data.len() / dst_channels.max(1);
                scratch.resize(frames * src_channels, 0.0);
                pool.pull(&mut scratch);
                let g = gain.get();
                for (frame, out) in data.chunks_exact_mut(dst_channels).enumerate() {
                    let src = &scratch[frame * src_channels..(frame + 1) * src_channels];
                    for (ch, sample) in out.iter_mut().enumerate() {
                        *sample = T::from_sample(map_channel(src, dst_channels, ch) * g);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::new(ErrorCode::SinkCreate, e.to_string()))
}
