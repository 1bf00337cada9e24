//! Playback state machine.
//!
//! [`Player`] is a cheap handle: every command is forwarded to one control thread which
//! owns the backend and the active session and executes commands serially. Observers
//! receive [`PlayerEvent`]s on their own channels.
//!
//! `play()` and `stop()` raise the interrupt flag on the caller's thread before enqueuing,
//! so a blocking open on the control thread gives up promptly.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use url::Url;

use crate::backend::{MediaBackend, SessionContext, SessionEvent, SessionReporter, SinkHandle};
use crate::config::{PlayerConfig, clamp_volume};
use crate::error::{ErrorCode, PlayerError};
use crate::interrupt::InterruptFlag;
use crate::metadata::NowPlaying;
use crate::pipeline::CpalBackend;
use crate::resolve::Resolver;
use crate::ring::PcmRingBuffer;
use crate::status::{PlaybackFailure, PlaybackStatus, PlayerEvent};

enum Command {
    Play { url: String, generation: u64 },
    Stop,
    SetVolume(f32),
    SetMuted(bool),
    SetDevice(Option<String>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Snapshot {
    status: PlaybackStatus,
    now_playing: Option<String>,
}

/// State shared between the handle and the control thread.
#[derive(Debug, Default)]
struct Shared {
    snapshot: Mutex<Snapshot>,
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
    /// Bumped by every `play()`/`stop()`; a play request only runs while it is current.
    generation: AtomicU64,
}

impl Shared {
    fn publish(&self, event: PlayerEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn set_status(&self, status: PlaybackStatus) {
        {
            let Ok(mut snap) = self.snapshot.lock() else {
                return;
            };
            if snap.status == status {
                return;
            }
            snap.status = status.clone();
        }
        tracing::debug!(status = ?status, "status changed");
        self.publish(PlayerEvent::StatusChanged(status));
    }

    fn set_now_playing(&self, title: String) {
        if let Ok(mut snap) = self.snapshot.lock() {
            snap.now_playing = Some(title.clone());
        }
        self.publish(PlayerEvent::NowPlayingChanged(title));
    }

    /// Forget the title; observers get an empty one.
    fn clear_now_playing(&self) {
        if let Ok(mut snap) = self.snapshot.lock() {
            snap.now_playing = None;
        }
        self.publish(PlayerEvent::NowPlayingChanged(String::new()));
    }
}

/// Handle to the playback control thread.
///
/// Dropping the handle stops playback and joins the thread.
pub struct Player {
    cmd_tx: Sender<Command>,
    interrupt: InterruptFlag,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Start a player that plays through cpal.
    pub fn new(config: PlayerConfig) -> io::Result<Self> {
        Self::with_backend(config, CpalBackend::new)
    }

    /// Start a player whose backend is built by `make_backend` on the control thread.
    pub fn with_backend<F, B>(config: PlayerConfig, make_backend: F) -> io::Result<Self>
    where
        F: FnOnce() -> B + Send + 'static,
        B: MediaBackend + 'static,
    {
        let (cmd_tx, cmd_rx) = unbounded();
        let interrupt = InterruptFlag::new();
        let shared = Arc::new(Shared::default());

        let thread_interrupt = interrupt.clone();
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("radio-control".to_string())
            .spawn(move || {
                let controller = Controller::new(
                    make_backend(),
                    config,
                    thread_interrupt,
                    thread_shared,
                );
                controller.run(cmd_rx);
            })?;

        Ok(Self {
            cmd_tx,
            interrupt,
            shared,
            thread: Some(thread),
        })
    }

    /// Stop whatever is playing and start `url`.
    pub fn play(&self, url: &str) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.interrupt.raise();
        self.send(Command::Play {
            url: url.to_string(),
            generation,
        });
    }

    /// Stop playback. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.interrupt.raise();
        self.send(Command::Stop);
    }

    /// Set the volume (clamped to 0.0..=1.0).
    pub fn set_volume(&self, volume: f32) {
        self.send(Command::SetVolume(volume));
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(Command::SetMuted(muted));
    }

    /// Select an output device by id or name substring; `None` selects the default.
    ///
    /// A playing session restarts on the new device.
    pub fn set_output_device(&self, device: Option<String>) {
        self.send(Command::SetDevice(device));
    }

    /// Receive every future [`PlayerEvent`]. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared
            .snapshot
            .lock()
            .map(|s| s.status.clone())
            .unwrap_or_default()
    }

    pub fn now_playing(&self) -> Option<String> {
        self.shared
            .snapshot
            .lock()
            .ok()
            .and_then(|s| s.now_playing.clone())
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!("player control thread is gone");
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.interrupt.raise();
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Session {
    id: u64,
    url: String,
    generation: u64,
    sink: Box<dyn SinkHandle>,
}

/// State owned by the control thread.
struct Controller<B> {
    backend: B,
    config: PlayerConfig,
    interrupt: InterruptFlag,
    shared: Arc<Shared>,
    events_tx: Sender<(u64, SessionEvent)>,
    events_rx: Receiver<(u64, SessionEvent)>,
    next_session: u64,
    session: Option<Session>,
    now_playing: NowPlaying,
    volume: f32,
    muted: bool,
    device: Option<String>,
}

impl<B: MediaBackend> Controller<B> {
    fn new(backend: B, config: PlayerConfig, interrupt: InterruptFlag, shared: Arc<Shared>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            backend,
            volume: clamp_volume(config.volume),
            muted: config.muted,
            device: config.device.clone(),
            config,
            interrupt,
            shared,
            events_tx,
            events_rx,
            next_session: 0,
            session: None,
            now_playing: NowPlaying::default(),
        }
    }

    fn run(mut self, cmd_rx: Receiver<Command>) {
        let events_rx = self.events_rx.clone();
        loop {
            select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(events_rx) -> msg => {
                    if let Ok((id, event)) = msg {
                        self.handle_session_event(id, event);
                    }
                }
            }
        }
        self.teardown();
        tracing::debug!("control thread exiting");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { url, generation } => self.play(url, generation),
            Command::Stop => self.stop(),
            Command::SetVolume(volume) => {
                self.volume = clamp_volume(volume);
                self.apply_gain();
            }
            Command::SetMuted(muted) => {
                self.muted = muted;
                self.apply_gain();
            }
            Command::SetDevice(device) => self.set_device(device),
            Command::Shutdown => {}
        }
    }

    fn effective_gain(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    fn play(&mut self, url: String, generation: u64) {
        self.teardown();
        self.interrupt.clear();
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            // A later play()/stop() already superseded this request.
            self.interrupt.raise();
            return;
        }

        self.next_session += 1;
        let id = self.next_session;
        tracing::info!(url = %url, session = id, "play requested");
        self.shared.set_status(PlaybackStatus::Connecting);

        match self.start_session(id, &url) {
            Ok(sink) => {
                self.session = Some(Session {
                    id,
                    url,
                    generation,
                    sink,
                });
                self.shared.set_status(PlaybackStatus::Playing);
            }
            Err(err) => self.fail(err),
        }
    }

    fn start_session(&mut self, id: u64, raw: &str) -> Result<Box<dyn SinkHandle>, PlayerError> {
        let candidates = Resolver::new(&self.config).resolve(raw)?;
        self.interrupt_check()?;
        let url: &Url = candidates
            .first()
            .ok_or_else(|| PlayerError::new(ErrorCode::OpenInput, "no candidates"))?;
        if candidates.len() > 1 {
            tracing::debug!(candidates = candidates.len(), "playing first candidate");
        }

        let ctx = SessionContext {
            interrupt: self.interrupt.clone(),
            ring: Arc::new(PcmRingBuffer::with_capacity(self.config.buffer_bytes * 2)),
            reporter: SessionReporter::new(id, self.events_tx.clone()),
            config: self.config.clone(),
        };
        let source = self.backend.open(url, &ctx)?;
        self.interrupt_check()?;
        let gain = self.effective_gain();
        let device = self.device.clone();
        self.backend
            .start_sink(source, &ctx, device.as_deref(), gain)
    }

    fn interrupt_check(&self) -> Result<(), PlayerError> {
        if self.interrupt.is_raised() {
            Err(PlayerError::aborted())
        } else {
            Ok(())
        }
    }

    fn stop(&mut self) {
        self.teardown();
        self.shared.set_status(PlaybackStatus::Stopped);
    }

    /// Release the active session, if any, and forget its title.
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.interrupt.raise();
            if let Err(err) = session.sink.stop() {
                tracing::warn!(error = %err, session = session.id, "sink stop failed");
            }
            tracing::info!(session = session.id, url = %session.url, "session closed");
        }
        if self.now_playing.current().is_some() {
            self.now_playing = NowPlaying::default();
            self.shared.clear_now_playing();
        }
    }

    /// End the session because of `err`. Aborts and anything caught while the flag is
    /// raised end silently.
    fn fail(&mut self, err: PlayerError) {
        let cancelled = err.is_aborted() || self.interrupt.is_raised();
        self.teardown();
        if cancelled {
            tracing::debug!(error = %err, "playback cancelled");
            self.shared.set_status(PlaybackStatus::Stopped);
        } else {
            tracing::warn!(code = ?err.code(), detail = err.detail(), "playback failed");
            self.shared
                .set_status(PlaybackStatus::Error(PlaybackFailure::from(&err)));
        }
    }

    fn apply_gain(&mut self) {
        let gain = self.effective_gain();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(err) = session.sink.set_gain(gain) {
            self.fail(err);
        }
    }

    fn set_device(&mut self, device: Option<String>) {
        if self.device == device {
            return;
        }
        tracing::info!(device = ?device, "output device changed");
        self.device = device;
        if let Some(session) = self.session.as_ref() {
            let url = session.url.clone();
            let generation = session.generation;
            self.play(url, generation);
        }
    }

    fn handle_session_event(&mut self, id: u64, event: SessionEvent) {
        if self.session.as_ref().map(|s| s.id) != Some(id) {
            tracing::trace!(session = id, "dropping event from stale session");
            return;
        }
        match event {
            SessionEvent::Title(raw) => {
                if let Some(title) = self.now_playing.update(&raw) {
                    tracing::info!(title = %title, "now playing");
                    self.shared.set_now_playing(title);
                }
            }
            SessionEvent::Failed(err) => self.fail(err),
            SessionEvent::Finished => {
                tracing::info!(session = id, "stream finished");
                self.stop();
            }
        }
    }
}
