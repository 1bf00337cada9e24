//! Playback wiring: Symphonia decode pipeline feeding a cpal output stream.

use url::Url;

use crate::backend::{MediaBackend, PcmSource, SessionContext, SinkHandle};
use crate::decode::DecodePipeline;
use crate::error::PlayerError;
use crate::sink::CpalSink;

/// The production [`MediaBackend`].
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for CpalBackend {
    fn open(&mut self, url: &Url, ctx: &SessionContext) -> Result<Box<dyn PcmSource>, PlayerError> {
        let pipeline = DecodePipeline::open(url, ctx)?;
        Ok(Box::new(pipeline))
    }

    fn start_sink(
        &mut self,
        source: Box<dyn PcmSource>,
        ctx: &SessionContext,
        device: Option<&str>,
        gain: f32,
    ) -> Result<Box<dyn SinkHandle>, PlayerError> {
        let sink = CpalSink::start(source, ctx, device, gain)?;
        Ok(Box::new(sink))
    }
}
