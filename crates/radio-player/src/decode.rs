//! Decode pipeline: demux and decode a byte source into output-format PCM.
//!
//! Uses Symphonia to:
//! - detect the container and pick the best audio track
//! - decode packets, skipping isolated corrupt ones
//! - hand decoded buffers to the [`PcmResampler`] and append the bytes to the ring
//!
//! The pipeline is pull-driven: nothing happens until the output asks for a chunk.

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use url::Url;

use crate::backend::{ChunkOutcome, PcmSource, SessionContext, SessionReporter};
use crate::error::{ErrorCode, PlayerError};
use crate::interrupt::{self, InterruptFlag};
use crate::metadata::TitleSlot;
use crate::net::{self, FeedErrorSlot};
use crate::resample::{OutputFormat, PcmResampler, SampleClass};
use crate::ring::PcmGuard;

/// An opened, primed decode pipeline.
///
/// Fields drop in declaration order: resampler, then decoder, then demuxer.
pub struct DecodePipeline {
    resampler: PcmResampler,
    demux: Demux,
    reporter: SessionReporter,
    interrupt: InterruptFlag,
    /// PCM decoded while priming, delivered by the first decode step.
    primed: Vec<u8>,
    scratch: Vec<u8>,
    ended: bool,
}

impl DecodePipeline {
    /// Open `url`, select the audio track, create the decoder and decode the first frame.
    pub fn open(url: &Url, ctx: &SessionContext) -> Result<Self, PlayerError> {
        let titles = TitleSlot::new();
        let opened = net::open_source(url, &ctx.config, &ctx.interrupt, &titles)?;

        let mut hint = Hint::new();
        if let Some(ext) = opened.extension.as_deref() {
            hint.with_extension(ext);
        }
        let transport_errors = opened.transport_errors;
        let mss = MediaSourceStream::new(opened.source, Default::default());
        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| open_error(e, transport_errors.as_ref(), &ctx.interrupt))?;

        let mut format = detected.format;
        let (track_id, params) = select_track(format.as_ref())?;
        let decoder = make_decoder(&params)?;
        tracing::info!(
            url = %url,
            codec = codec_name(&params).unwrap_or("unknown"),
            track = track_id,
            "stream opened"
        );

        // Drain metadata found while probing so only later revisions count as new.
        format.metadata().skip_to_latest();

        let mut demux = Demux {
            decoder,
            format,
            track_id,
            titles,
            last_title: None,
            new_title: None,
            interrupt: ctx.interrupt.clone(),
            decode_errors: 0,
            max_decode_errors: ctx.config.max_decode_errors,
        };

        let mut primed = Vec::new();
        let resampler = {
            let Some(decoded) = demux.next_audio()? else {
                return Err(PlayerError::new(
                    ErrorCode::DecodeFailed,
                    "stream ended before the first audio frame",
                ));
            };
            let spec = *decoded.spec();
            let class = sample_class(&decoded);
            let mut resampler = PcmResampler::new(spec.rate, spec.channels.count(), class)?;
            resampler.process(decoded, &mut primed)?;
            tracing::info!(
                rate = spec.rate,
                channels = spec.channels.count(),
                class = ?class,
                "decoder primed"
            );
            resampler
        };

        let mut pipeline = Self {
            resampler,
            demux,
            reporter: ctx.reporter.clone(),
            interrupt: ctx.interrupt.clone(),
            primed,
            scratch: Vec::new(),
            ended: false,
        };
        pipeline.forward_title();
        Ok(pipeline)
    }

    fn forward_title(&mut self) {
        if let Some(title) = self.demux.new_title.take() {
            self.reporter.title(title);
        }
    }
}

impl PcmSource for DecodePipeline {
    fn format(&self) -> OutputFormat {
        self.resampler.format()
    }

    fn set_output_rate(&mut self, rate: u32) -> Result<(), PlayerError> {
        if rate != self.resampler.format().sample_rate && !self.primed.is_empty() {
            tracing::debug!(bytes = self.primed.len(), "dropping primed pcm after rate change");
            self.primed.clear();
        }
        self.resampler.set_output_rate(rate)
    }

    fn decode_next_chunk(
        &mut self,
        pcm: &mut PcmGuard<'_>,
        target: usize,
    ) -> Result<ChunkOutcome, PlayerError> {
        if !self.primed.is_empty() {
            pcm.append(&self.primed);
            self.primed = Vec::new();
        }
        if self.ended {
            return Ok(ChunkOutcome::EndOfStream);
        }

        while pcm.len() < target {
            if self.interrupt.is_raised() {
                return Err(PlayerError::aborted());
            }
            self.scratch.clear();
            match self.demux.next_audio()? {
                Some(decoded) => self.resampler.process(decoded, &mut self.scratch)?,
                None => {
                    self.resampler.flush(&mut self.scratch)?;
                    pcm.append(&self.scratch);
                    self.ended = true;
                    tracing::info!("end of stream");
                    return Ok(ChunkOutcome::EndOfStream);
                }
            }
            pcm.append(&self.scratch);
            self.forward_title();
        }
        Ok(ChunkOutcome::Ready)
    }
}

/// Demuxer plus decoder for the selected track, with decode error bookkeeping.
///
/// Read timeouts are retried by the byte feed; one that reaches the demuxer is final.
struct Demux {
    decoder: Box<dyn Decoder>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    titles: TitleSlot,
    last_title: Option<String>,
    new_title: Option<String>,
    interrupt: InterruptFlag,
    decode_errors: u32,
    max_decode_errors: u32,
}

impl Demux {
    /// Next decoded buffer of the selected track, `None` at end of stream.
    fn next_audio(&mut self) -> Result<Option<AudioBufferRef<'_>>, PlayerError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof
                        && !interrupt::is_aborted(&e) =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::IoError(e)) => {
                    return Err(PlayerError::from_io(&e, "read packet"));
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.reset_track()?;
                    continue;
                }
                Err(e) => {
                    if self.interrupt.is_raised() {
                        return Err(PlayerError::aborted());
                    }
                    return Err(PlayerError::new(ErrorCode::DemuxFailed, e.to_string()));
                }
            };

            self.poll_title();
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    self.decode_errors = 0;
                    if decoded.frames() == 0 {
                        continue;
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    self.decode_errors += 1;
                    tracing::warn!(error = e, count = self.decode_errors, "skipping corrupt packet");
                    if self.decode_errors > self.max_decode_errors {
                        return Err(PlayerError::new(
                            ErrorCode::DecodeFailed,
                            format!("{} consecutive decode errors: {e}", self.decode_errors),
                        ));
                    }
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(PlayerError::new(ErrorCode::DecodeFailed, e.to_string())),
            }
            return Ok(Some(self.decoder.last_decoded()));
        }
    }

    /// Re-select the track and rebuild the decoder after a chained-stream boundary.
    fn reset_track(&mut self) -> Result<(), PlayerError> {
        let (track_id, params) = select_track(self.format.as_ref())?;
        self.decoder = make_decoder(&params)?;
        self.track_id = track_id;
        tracing::info!(track = track_id, "decoder reset for new logical stream");
        Ok(())
    }

    /// Record a title from ICY or container metadata when it differs from the last one.
    fn poll_title(&mut self) {
        let from_container = {
            let mut metadata = self.format.metadata();
            if metadata.is_latest() {
                None
            } else {
                metadata.skip_to_latest().and_then(|rev| {
                    let tag = |key: StandardTagKey| {
                        rev.tags()
                            .iter()
                            .find(|t| t.std_key == Some(key))
                            .map(|t| t.value.to_string())
                    };
                    match (tag(StandardTagKey::Artist), tag(StandardTagKey::TrackTitle)) {
                        (Some(artist), Some(title)) => Some(format!("{artist} - {title}")),
                        (None, Some(title)) => Some(title),
                        _ => None,
                    }
                })
            }
        };
        let Some(raw) = self.titles.take().or(from_container) else {
            return;
        };
        if self.last_title.as_deref() != Some(raw.as_str()) {
            self.last_title = Some(raw.clone());
            self.new_title = Some(raw);
        }
    }
}

/// Default track when it has a codec, else the first track that does.
fn select_track(format: &dyn FormatReader) -> Result<(u32, CodecParameters), PlayerError> {
    format
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .map(|t| (t.id, t.codec_params.clone()))
        .ok_or_else(|| PlayerError::new(ErrorCode::NoAudioStream, "no audio track in stream"))
}

fn make_decoder(params: &CodecParameters) -> Result<Box<dyn Decoder>, PlayerError> {
    symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| match e {
            SymphoniaError::Unsupported(what) => {
                PlayerError::new(ErrorCode::NoCodec, format!("unsupported codec: {what}"))
            }
            other => PlayerError::new(ErrorCode::DecoderInit, other.to_string()),
        })
}

/// Map a format detection failure. Detection reports transport failures as a missing
/// format, so a recorded transport error takes precedence.
fn open_error(
    err: SymphoniaError,
    transport_errors: Option<&FeedErrorSlot>,
    interrupt: &InterruptFlag,
) -> PlayerError {
    if interrupt.is_raised() {
        return PlayerError::aborted();
    }
    if let Some(io_err) = transport_errors.and_then(FeedErrorSlot::get) {
        return PlayerError::from_io(&io_err, "open input");
    }
    match err {
        SymphoniaError::IoError(e) if interrupt::is_aborted(&e) => PlayerError::aborted(),
        SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            PlayerError::new(ErrorCode::NetworkTimeout, format!("open input: {e}"))
        }
        other => PlayerError::new(ErrorCode::OpenInput, other.to_string()),
    }
}

fn sample_class(decoded: &AudioBufferRef<'_>) -> SampleClass {
    match decoded {
        AudioBufferRef::F32(_) | AudioBufferRef::F64(_) => SampleClass::Float,
        _ => SampleClass::Int,
    }
}

/// Short codec label for logs.
fn codec_name(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SessionEvent;
    use crate::config::PlayerConfig;
    use crate::ring::PcmRingBuffer;
    use crate::test_support::{FixtureServer, Route, wav_bytes};
    use crossbeam_channel::{Receiver, unbounded};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn context() -> (SessionContext, Receiver<(u64, SessionEvent)>) {
        let (tx, rx) = unbounded();
        let ctx = SessionContext {
            interrupt: InterruptFlag::new(),
            ring: Arc::new(PcmRingBuffer::new()),
            reporter: SessionReporter::new(1, tx),
            config: PlayerConfig {
                read_timeout: Duration::from_millis(100),
                max_read_timeouts: 3,
                ..PlayerConfig::default()
            },
        };
        (ctx, rx)
    }

    fn write_temp(name: &str, bytes: &[u8]) -> Url {
        let path = std::env::temp_dir().join(format!("radio-player-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn decodes_local_wav_to_end() {
        let url = write_temp("tone.wav", &wav_bytes(22_050, 2, 4_000));
        let (ctx, _rx) = context();
        let mut pipeline = DecodePipeline::open(&url, &ctx).unwrap();
        let format = pipeline.format();
        assert_eq!(format.sample_rate, 22_050);
        assert_eq!(format.channels, 2);
        assert_eq!(format.class, SampleClass::Int);

        let mut total = 0usize;
        loop {
            let mut pcm = ctx.ring.lock();
            let outcome = pipeline.decode_next_chunk(&mut pcm, 8192).unwrap();
            total += pcm.len();
            pcm.clear();
            if outcome == ChunkOutcome::EndOfStream {
                break;
            }
        }
        assert_eq!(total, 4_000 * format.bytes_per_frame());
    }

    #[test]
    fn decodes_wav_over_http() {
        let server = FixtureServer::start(vec![(
            "/mono.wav",
            Route::bytes(wav_bytes(8_000, 1, 1_000)).header("Content-Type", "audio/wav"),
        )]);
        let url = Url::parse(&server.url("/mono.wav")).unwrap();
        let (ctx, _rx) = context();
        let mut pipeline = DecodePipeline::open(&url, &ctx).unwrap();
        assert_eq!(pipeline.format().channels, 1);

        let mut pcm = ctx.ring.lock();
        let outcome = pipeline.decode_next_chunk(&mut pcm, usize::MAX).unwrap();
        assert_eq!(outcome, ChunkOutcome::EndOfStream);
        assert_eq!(pcm.len(), 1_000 * 4);
    }

    #[test]
    fn garbage_input_is_an_invalid_source() {
        let url = write_temp("noise.bin", &[0x5au8; 4096]);
        let (ctx, _rx) = context();
        let err = DecodePipeline::open(&url, &ctx).err().unwrap();
        assert_eq!(err.category(), crate::error::ErrorCategory::InvalidSource);
    }

    #[test]
    fn stalled_stream_times_out_after_retries() {
        let server = FixtureServer::start(vec![("/stall.mp3", Route::stall())]);
        let url = Url::parse(&server.url("/stall.mp3")).unwrap();
        let (ctx, _rx) = context();
        let started = Instant::now();
        let err = DecodePipeline::open(&url, &ctx).err().unwrap();
        assert_eq!(err.code(), ErrorCode::NetworkTimeout);
        assert!(started.elapsed() >= ctx.config.read_timeout * ctx.config.max_read_timeouts);
    }

    #[test]
    fn stream_that_stalls_mid_playback_times_out() {
        let wav = wav_bytes(8_000, 1, 100_000);
        let server = FixtureServer::start(vec![(
            "/cut.wav",
            Route::bytes(wav[..120_000].to_vec()).then_stall(),
        )]);
        let url = Url::parse(&server.url("/cut.wav")).unwrap();
        let (ctx, _rx) = context();
        let mut pipeline = DecodePipeline::open(&url, &ctx).unwrap();

        let mut decoded = 0usize;
        let (err, took) = loop {
            let mut pcm = ctx.ring.lock();
            let started = Instant::now();
            match pipeline.decode_next_chunk(&mut pcm, 4096) {
                Ok(outcome) => {
                    assert_eq!(outcome, ChunkOutcome::Ready);
                    decoded += pcm.len();
                    pcm.clear();
                }
                Err(err) => break (err, started.elapsed()),
            }
        };
        assert!(decoded > 0);
        assert_eq!(err.code(), ErrorCode::NetworkTimeout);
        assert!(took >= ctx.config.read_timeout * ctx.config.max_read_timeouts);
    }

    #[test]
    fn raised_flag_aborts_open() {
        let server = FixtureServer::start(vec![("/stall.mp3", Route::stall())]);
        let url = Url::parse(&server.url("/stall.mp3")).unwrap();
        let (mut ctx, _rx) = context();
        ctx.config.read_timeout = Duration::from_secs(30);
        let flag = ctx.interrupt.clone();
        let raiser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.raise();
        });
        let err = DecodePipeline::open(&url, &ctx).err().unwrap();
        raiser.join().unwrap();
        assert!(err.is_aborted());
    }

    #[test]
    fn codec_name_maps_known_codecs() {
        use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_S16LE};
        let mut params = CodecParameters::new();
        assert!(codec_name(&params).is_none());
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name(&params), Some("PCM_S16"));
    }
}
