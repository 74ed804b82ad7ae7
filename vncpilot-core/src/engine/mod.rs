//! The engine: one task that owns every piece of session state.
//!
//! Tool calls arrive as [`Command`]s; wire events, deferred jobs, recording
//! ticks and encoder readiness arrive on their own channels. A single
//! `select!` loop handles one event at a time, so nothing here needs a lock.

pub mod handle;

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use handle::{Command, EngineHandle};

use crate::correlator::{CaptureSink, RequestCorrelator};
use crate::error::Result;
use crate::input::{ActionDispatcher, DRAG_MOVE_SETTLE, FollowUp, InputAction};
use crate::macros::{MacroPlayer, MacroStore, Playback};
use crate::preview::{HeadlessPreview, Preview, PreviewSurface};
use crate::recording::{EncoderFactory, FfmpegFactory, FfmpegOptions, ReadyReceiver, RecordingPipeline};
use crate::rfb::RfbLink;
use crate::scheduler::{DoneReply, Job, Scheduler};
use crate::session::{ConnectionSession, Link, SessionSignal, WireEvent, WireEventReceiver, wire_channel};

pub const DEFAULT_COMMAND_BUFFER: usize = 64;
pub const DEFAULT_PREVIEW_TITLE: &str = "vncpilot";

/// Observer of session signals, called after the engine's own consumers.
pub trait SignalObserver: Send {
    fn on_signal(&mut self, signal: &SessionSignal);
}

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Macro directory to select at startup.
    pub macro_dir: Option<PathBuf>,
    pub preview_title: String,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            macro_dir: None,
            preview_title: DEFAULT_PREVIEW_TITLE.to_string(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────

pub struct Engine {
    session: ConnectionSession,
    dispatcher: ActionDispatcher,
    correlator: RequestCorrelator,
    store: MacroStore,
    player: MacroPlayer,
    playback: Option<Playback>,
    scheduler: Scheduler,
    recording: RecordingPipeline,
    ready_rx: ReadyReceiver,
    preview: Preview,
    observers: Vec<Box<dyn SignalObserver>>,
    commands: mpsc::Receiver<Command>,
    events: WireEventReceiver,
}

impl Engine {
    /// Build an engine around `link`, whose wire events arrive on `events`.
    pub fn new(
        config: EngineConfig,
        link: Box<dyn Link>,
        events: WireEventReceiver,
        encoders: Box<dyn EncoderFactory>,
    ) -> Result<(Self, EngineHandle)> {
        let store = match &config.macro_dir {
            Some(dir) => MacroStore::with_dir(dir)?,
            None => MacroStore::new(),
        };
        let (recording, ready_rx) = RecordingPipeline::new(encoders);
        let (tx, commands) = mpsc::channel(config.command_buffer.max(1));

        let engine = Self {
            session: ConnectionSession::new(link),
            dispatcher: ActionDispatcher::new(),
            correlator: RequestCorrelator::new(),
            store,
            player: MacroPlayer::new(),
            playback: None,
            scheduler: Scheduler::new(),
            recording,
            ready_rx,
            preview: Preview::new(Box::new(HeadlessPreview), config.preview_title),
            observers: Vec::new(),
            commands,
            events,
        };
        Ok((engine, EngineHandle::new(tx)))
    }

    /// Replace the headless preview with a real window.
    pub fn with_preview_surface(mut self, surface: Box<dyn PreviewSurface>) -> Self {
        let title = self.preview.title().to_string();
        self.preview = Preview::new(surface, title);
        self
    }

    /// Register an observer. Observers are called in registration order.
    pub fn add_observer(&mut self, observer: Box<dyn SignalObserver>) {
        self.observers.push(observer);
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until every [`EngineHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Engine started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_wire(event),
                Some(job) = self.scheduler.next(), if !self.scheduler.is_empty() => {
                    self.run_job(job);
                }
                _ = self.recording.next_tick(), if self.recording.is_active() => {
                    let fallback = self.dispatcher.position();
                    self.recording.on_tick(&self.session, fallback);
                }
                Some(event) = self.ready_rx.recv() => self.recording.on_encoder_event(event),
            }
            self.refresh_update_demand();
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Engine shutting down");
        self.scheduler.clear();
        self.playback = None;
        if let Ok(finalizing) = self.recording.stop() {
            if let Err(e) = finalizing.wait().await {
                warn!(error = %e, "Recording did not finalize cleanly");
            }
        }
        let signals = self.session.close();
        self.deliver(signals);
    }

    /// Updates flow while anyone needs them.
    fn refresh_update_demand(&mut self) {
        let wanted = self.preview.wants_updates()
            || self.recording.is_active()
            || self.correlator.wants_updates();
        self.session.set_updates_enabled(wanted);
    }

    // ── Signals ──────────────────────────────────────────────────

    fn handle_wire(&mut self, event: WireEvent) {
        let signals = self.session.apply(event);
        self.deliver(signals);
    }

    fn deliver(&mut self, signals: Vec<SessionSignal>) {
        let mut lost = false;
        for signal in &signals {
            if let SessionSignal::CursorPosChanged(at) = signal {
                self.dispatcher.track(*at);
            }
            self.preview.on_signal(signal);
            let fallback = self.dispatcher.position();
            self.correlator.on_signal(signal, &self.session, fallback);
            for observer in &mut self.observers {
                observer.on_signal(signal);
            }
            if matches!(
                signal,
                SessionSignal::ConnectionStateChanged(false) | SessionSignal::TransportError(_)
            ) {
                lost = true;
            }
        }

        if lost && self.recording.is_active() {
            info!("Connection lost; stopping recording");
            if let Ok(finalizing) = self.recording.stop() {
                finalizing.detach();
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect {
                host,
                port,
                password,
                reply,
            } => {
                info!(%host, port, "Connect requested");
                self.correlator.begin_connect(
                    &mut self.session,
                    &host,
                    port,
                    password.as_deref(),
                    reply,
                );
            }
            Command::Disconnect { reply } => {
                let signals = self.session.close();
                self.deliver(signals);
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.session.status());
            }

            Command::Screenshot { region, reply } => {
                let fallback = self.dispatcher.position();
                self.correlator
                    .begin_capture(&self.session, fallback, region, CaptureSink::Image(reply));
            }
            Command::Save {
                path,
                region,
                reply,
            } => {
                let fallback = self.dispatcher.position();
                self.correlator.begin_capture(
                    &self.session,
                    fallback,
                    region,
                    CaptureSink::File { path, reply },
                );
            }

            Command::Input { action, reply } => self.perform(action, Some(reply)),

            Command::SetPreview { visible, reply } => {
                self.preview.set_enabled(visible);
                let _ = reply.send(());
            }
            Command::SetInteractive { enabled, reply } => {
                self.preview.set_interactive(enabled);
                let _ = reply.send(());
            }
            Command::SetStaysOnTop { enabled, reply } => {
                self.preview.set_stays_on_top(enabled);
                let _ = reply.send(());
            }
            Command::SetPreviewTitle { title, reply } => {
                self.preview.set_title(&title);
                let _ = reply.send(());
            }

            Command::SetMacroDir { path, reply } => {
                let _ = reply.send(self.store.set_dir(path));
            }
            Command::CreateMacro {
                name,
                description,
                reply,
            } => {
                let _ = reply.send(self.store.create(&name, &description));
            }
            Command::AddMacroStep {
                name,
                action,
                params,
                delay,
                reply,
            } => {
                let _ = reply.send(self.store.add_step(&name, &action, &params, delay));
            }
            Command::PlayMacro {
                name,
                speed_factor,
                reply,
            } => {
                if let Some(playback) = self.player.start(&self.store, &name, speed_factor, reply) {
                    let delay = playback.next_delay().unwrap_or_default();
                    self.playback = Some(playback);
                    self.scheduler.schedule(Job::MacroStep, delay);
                }
            }
            Command::ListMacros { reply } => {
                let _ = reply.send(self.store.list());
            }
            Command::GetMacro { name, reply } => {
                let _ = reply.send(self.store.get(&name));
            }
            Command::DeleteMacro { name, reply } => {
                let _ = reply.send(self.store.delete(&name));
            }

            Command::StartRecording { path, fps, reply } => {
                let _ = reply.send(self.recording.start(&self.session, path, fps));
            }
            Command::StopRecording { reply } => match self.recording.stop() {
                // The reply waits for the file; the loop does not.
                Ok(finalizing) => {
                    tokio::spawn(async move {
                        let _ = reply.send(finalizing.wait().await);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
        }
    }

    // ── Input and deferred jobs ──────────────────────────────────

    /// Run an action's immediate part and queue the rest. A drag answers
    /// `reply` after the drop; everything else answers right away.
    fn perform(&mut self, action: InputAction, reply: Option<DoneReply>) {
        match self.dispatcher.perform(&mut self.session, action) {
            None => done(reply),
            Some(FollowUp::Release { delay, button }) => {
                self.scheduler.schedule(Job::LongPressRelease { button }, delay);
                done(reply);
            }
            Some(FollowUp::DragMove { delay, to, button }) => {
                self.scheduler
                    .schedule(Job::DragMove { to, button, reply }, delay);
            }
        }
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::LongPressRelease { button } => {
                debug!(?button, "Long press released");
                self.dispatcher.release_here(&mut self.session);
            }
            Job::DragMove { to, button, reply } => {
                self.dispatcher.move_to(&mut self.session, to, button);
                self.scheduler
                    .schedule(Job::DragRelease { to, reply }, DRAG_MOVE_SETTLE);
            }
            Job::DragRelease { to, reply } => {
                self.dispatcher.drop_at(&mut self.session, to);
                done(reply);
            }
            Job::MacroStep => self.macro_step(),
            Job::MacroYield => self.macro_yield(),
        }
    }

    fn macro_step(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        match playback.take_step() {
            Some(Some(action)) => self.perform(action, None),
            Some(None) | None => {}
        }
        self.scheduler.defer(Job::MacroYield);
    }

    fn macro_yield(&mut self) {
        let Some(playback) = self.playback.as_ref() else {
            return;
        };
        match playback.next_delay() {
            Some(delay) => self.scheduler.schedule(Job::MacroStep, delay),
            None => {
                if let Some(playback) = self.playback.take() {
                    playback.finish();
                }
            }
        }
    }
}

fn done(reply: Option<DoneReply>) {
    if let Some(reply) = reply {
        let _ = reply.send(());
    }
}

// ── Spawning ─────────────────────────────────────────────────────

/// Real transport settings for [`spawn`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// `None` keeps the link's default.
    pub connect_timeout: Option<Duration>,
    pub ffmpeg: FfmpegOptions,
}

/// Start an engine backed by a TCP RFB link and an ffmpeg encoder.
pub fn spawn(config: EngineConfig, transport: TransportConfig) -> Result<(EngineHandle, JoinHandle<()>)> {
    let (tx, rx) = wire_channel();
    let mut link = RfbLink::new(tx);
    if let Some(timeout) = transport.connect_timeout {
        link = link.with_connect_timeout(timeout);
    }
    let factory = FfmpegFactory::new(transport.ffmpeg);
    let (engine, handle) = Engine::new(config, Box::new(link), rx, Box::new(factory))?;
    Ok((handle, engine.spawn()))
}
