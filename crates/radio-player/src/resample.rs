//! Conversion of decoded audio into the fixed output PCM format.
//!
//! Decoded buffers arrive in whatever layout and sample type the codec produces. They
//! leave as interleaved native-endian bytes: at most two channels, 32-bit float for
//! float codecs and 32-bit integer for integer codecs. The sample rate is kept unless
//! the output device needs another one, in which case Rubato converts it.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::conv::ConvertibleSample;

use crate::error::{ErrorCode, PlayerError};

/// Sample class of the output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleClass {
    Float,
    Int,
}

/// Output PCM layout. Samples are always 4 bytes wide and interleaved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub class: SampleClass,
}

impl OutputFormat {
    pub const BYTES_PER_SAMPLE: usize = 4;

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }
}

/// Frames per Rubato input chunk.
const RATE_CHUNK_FRAMES: usize = 1024;

/// Converts decoded buffers into output-format bytes.
pub struct PcmResampler {
    source_rate: u32,
    format: OutputFormat,
    rate: Option<RateStage>,
    float_buf: Option<SampleBuffer<f32>>,
    int_buf: Option<SampleBuffer<i32>>,
    mixed_f32: Vec<f32>,
    mixed_i32: Vec<i32>,
}

impl PcmResampler {
    /// Build a converter for a source with `source_channels` channels at `source_rate`.
    pub fn new(
        source_rate: u32,
        source_channels: usize,
        class: SampleClass,
    ) -> Result<Self, PlayerError> {
        if source_rate == 0 || source_channels == 0 {
            return Err(PlayerError::new(
                ErrorCode::ResamplerInit,
                format!("invalid source layout: {source_rate} Hz, {source_channels} channels"),
            ));
        }
        Ok(Self {
            source_rate,
            format: OutputFormat {
                sample_rate: source_rate,
                channels: source_channels.min(2) as u16,
                class,
            },
            rate: None,
            float_buf: None,
            int_buf: None,
            mixed_f32: Vec::new(),
            mixed_i32: Vec::new(),
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Convert to `rate` as well. A rate equal to the source rate removes the stage.
    pub fn set_output_rate(&mut self, rate: u32) -> Result<(), PlayerError> {
        if rate == self.format.sample_rate {
            return Ok(());
        }
        self.rate = if rate == self.source_rate {
            None
        } else {
            Some(RateStage::new(
                self.source_rate,
                rate,
                self.format.channels as usize,
            )?)
        };
        tracing::info!(from = self.source_rate, to = rate, "sample rate conversion");
        self.format.sample_rate = rate;
        Ok(())
    }

    /// Convert one decoded buffer, appending bytes to `out`.
    pub fn process(
        &mut self,
        decoded: AudioBufferRef<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), PlayerError> {
        let spec = *decoded.spec();
        if spec.rate != self.source_rate {
            return Err(PlayerError::new(
                ErrorCode::ResampleFailed,
                format!("sample rate changed from {} to {}", self.source_rate, spec.rate),
            ));
        }
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(());
        }
        let channels = spec.channels.count();

        if self.format.class == SampleClass::Int && self.rate.is_none() {
            let buf = ensure_capacity(&mut self.int_buf, frames, spec);
            buf.copy_interleaved_ref(decoded);
            let mut mixed = std::mem::take(&mut self.mixed_i32);
            downmix_i32(buf.samples(), channels, &mut mixed);
            write_i32(&mixed, out);
            self.mixed_i32 = mixed;
            return Ok(());
        }

        let buf = ensure_capacity(&mut self.float_buf, frames, spec);
        buf.copy_interleaved_ref(decoded);
        let mut mixed = std::mem::take(&mut self.mixed_f32);
        downmix_f32(buf.samples(), channels, &mut mixed);
        let result = self.push_f32(&mixed, out);
        self.mixed_f32 = mixed;
        result
    }

    /// Emit whatever the rate stage still holds; call once at end of stream.
    pub fn flush(&mut self, out: &mut Vec<u8>) -> Result<(), PlayerError> {
        let class = self.format.class;
        if let Some(stage) = self.rate.as_mut() {
            let converted = stage.finish()?;
            write_class(class, converted, out);
        }
        Ok(())
    }

    /// Samples already mixed down to the output channel count.
    fn push_f32(&mut self, interleaved: &[f32], out: &mut Vec<u8>) -> Result<(), PlayerError> {
        let class = self.format.class;
        match self.rate.as_mut() {
            Some(stage) => {
                let converted = stage.push(interleaved)?;
                write_class(class, converted, out);
            }
            None => write_class(class, interleaved, out),
        }
        Ok(())
    }
}

fn ensure_capacity<T: ConvertibleSample>(
    slot: &mut Option<SampleBuffer<T>>,
    frames: usize,
    spec: SignalSpec,
) -> &mut SampleBuffer<T> {
    let fits = slot
        .as_ref()
        .is_some_and(|b| b.capacity() >= frames * spec.channels.count());
    if !fits {
        *slot = Some(SampleBuffer::new(frames as u64, spec));
    }
    slot.get_or_insert_with(|| SampleBuffer::new(frames as u64, spec))
}

/// Mix `channels`-wide frames down to at most two channels: even source channels are
/// averaged into left, odd ones into right.
fn downmix_f32(input: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 2 {
        out.extend_from_slice(input);
        return;
    }
    let evens = channels.div_ceil(2) as f32;
    let odds = (channels / 2) as f32;
    for frame in input.chunks_exact(channels) {
        let (mut l, mut r) = (0.0f32, 0.0f32);
        for (i, s) in frame.iter().enumerate() {
            if i % 2 == 0 { l += s } else { r += s }
        }
        out.push(l / evens);
        out.push(r / odds);
    }
}

fn downmix_i32(input: &[i32], channels: usize, out: &mut Vec<i32>) {
    out.clear();
    if channels <= 2 {
        out.extend_from_slice(input);
        return;
    }
    let evens = channels.div_ceil(2) as i64;
    let odds = (channels / 2) as i64;
    for frame in input.chunks_exact(channels) {
        let (mut l, mut r) = (0i64, 0i64);
        for (i, s) in frame.iter().enumerate() {
            if i % 2 == 0 { l += *s as i64 } else { r += *s as i64 }
        }
        out.push((l / evens) as i32);
        out.push((r / odds) as i32);
    }
}

fn write_class(class: SampleClass, samples: &[f32], out: &mut Vec<u8>) {
    match class {
        SampleClass::Float => {
            out.reserve(samples.len() * 4);
            for s in samples {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
        SampleClass::Int => {
            out.reserve(samples.len() * 4);
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_ne_bytes());
            }
        }
    }
}

fn write_i32(samples: &[i32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&s.to_ne_bytes());
    }
}

/// Streaming Rubato sinc converter over interleaved `f32`.
struct RateStage {
    resampler: Async<f32>,
    channels: usize,
    pending: Vec<f32>,
    output: Vec<f32>,
    produced: Vec<f32>,
}

impl RateStage {
    fn new(from: u32, to: u32, channels: usize) -> Result<Self, PlayerError> {
        let ratio = to as f64 / from as f64;
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let resampler = Async::<f32>::new_sinc(
            ratio,
            1.1,
            &params,
            RATE_CHUNK_FRAMES,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| PlayerError::new(ErrorCode::ResamplerInit, e.to_string()))?;
        let out_frames = (RATE_CHUNK_FRAMES as f64 * ratio * 1.1).ceil() as usize + 64;
        Ok(Self {
            resampler,
            channels,
            pending: Vec::new(),
            output: vec![0.0; out_frames * channels],
            produced: Vec::new(),
        })
    }

    /// Queue input and convert every complete chunk.
    fn push(&mut self, interleaved: &[f32]) -> Result<&[f32], PlayerError> {
        self.pending.extend_from_slice(interleaved);
        self.produced.clear();
        let chunk = RATE_CHUNK_FRAMES * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk {
            let n = self.run(consumed, RATE_CHUNK_FRAMES, None)?;
            self.produced
                .extend_from_slice(&self.output[..n * self.channels]);
            consumed += chunk;
        }
        self.pending.drain(..consumed);
        Ok(&self.produced)
    }

    /// Convert the partial tail chunk.
    fn finish(&mut self) -> Result<&[f32], PlayerError> {
        self.produced.clear();
        let frames = self.pending.len() / self.channels;
        if frames > 0 {
            self.pending.resize(RATE_CHUNK_FRAMES * self.channels, 0.0);
            let n = self.run(0, RATE_CHUNK_FRAMES, Some(frames))?;
            self.produced
                .extend_from_slice(&self.output[..n * self.channels]);
        }
        self.pending.clear();
        Ok(&self.produced)
    }

    fn run(&mut self, offset: usize, frames: usize, partial: Option<usize>) -> Result<usize, PlayerError> {
        let fail = |e: String| PlayerError::new(ErrorCode::ResampleFailed, e);
        let input = &self.pending[offset..offset + frames * self.channels];
        let input_adapter =
            InterleavedSlice::new(input, self.channels, frames).map_err(|e| fail(e.to_string()))?;
        let out_frames = self.output.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.output, self.channels, out_frames)
                .map_err(|e| fail(e.to_string()))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_, produced) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| fail(e.to_string()))?;
        Ok(produced)
    }
}
