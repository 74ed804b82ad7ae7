//! Fixed-cadence sampling of composited frames into an encoder.
//!
//! The sampling timer runs independently of framebuffer arrival. A tick
//! that finds the encoder busy, or nothing to sample, drops its frame
//! rather than queueing it. Finalizing an encoder runs on its own task so
//! the engine loop keeps going while ffmpeg flushes.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::encoder::{
    EncoderEvent, EncoderFactory, EncoderSettings, ReadyReceiver, ReadySignal, RecordingId,
    VideoEncoder,
};
use crate::compositor;
use crate::error::{PilotError, Result};
use crate::session::ConnectionSession;
use crate::types::Point;

pub const DEFAULT_FPS: i64 = 10;
pub const MIN_FPS: i64 = 1;
pub const MAX_FPS: i64 = 60;

pub fn clamp_fps(fps: i64) -> u32 {
    fps.clamp(MIN_FPS, MAX_FPS) as u32
}

// ── RecordingSession ─────────────────────────────────────────────

/// One active recording.
pub struct RecordingSession {
    id: RecordingId,
    settings: EncoderSettings,
    encoder: Box<dyn VideoEncoder>,
    ready: bool,
    ticker: Interval,
    submitted: u64,
    dropped: u64,
}

impl RecordingSession {
    pub fn id(&self) -> RecordingId {
        self.id
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Offer one frame. An encoder that refuses it is finished.
    fn sample(&mut self, session: &ConnectionSession, fallback: Point) -> Result<()> {
        if !self.ready {
            self.dropped += 1;
            debug!(id = self.id, "Encoder busy; frame dropped");
            return Ok(());
        }
        let Some(frame) = compositor::render(session, fallback) else {
            self.dropped += 1;
            return Ok(());
        };
        if frame.dimensions() != (self.settings.width, self.settings.height) {
            self.dropped += 1;
            warn!(
                id = self.id,
                frame = ?frame.dimensions(),
                "Frame size differs from recording size; dropped"
            );
            return Ok(());
        }
        self.encoder.submit(frame)?;
        self.ready = false;
        self.submitted += 1;
        Ok(())
    }

    /// Hand the encoder to a task that flushes and closes it.
    fn finalize(self) -> Finalizing {
        info!(
            id = self.id,
            submitted = self.submitted,
            dropped = self.dropped,
            "Stopping recording"
        );
        let mut encoder = self.encoder;
        Finalizing(tokio::spawn(async move { encoder.finish().await }))
    }
}

/// An encoder being flushed in the background.
#[must_use = "a recording is only known to be complete once awaited"]
pub struct Finalizing(JoinHandle<Result<()>>);

impl Finalizing {
    /// Wait for the output file to be closed.
    pub async fn wait(self) -> Result<()> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => Err(PilotError::Encoder(format!("finalize task failed: {e}"))),
        }
    }

    /// Let it finish on its own, logging any failure.
    pub fn detach(self) {
        tokio::spawn(async move {
            if let Err(e) = self.wait().await {
                warn!(error = %e, "Recording did not finalize cleanly");
            }
        });
    }
}

// ── RecordingPipeline ────────────────────────────────────────────

/// Owner of the (at most one) active recording.
pub struct RecordingPipeline {
    factory: Box<dyn EncoderFactory>,
    active: Option<RecordingSession>,
    /// Why the last recording ended on its own, until the next start or stop.
    failure: Option<String>,
    next_id: RecordingId,
    ready_tx: mpsc::UnboundedSender<EncoderEvent>,
}

impl RecordingPipeline {
    /// Create the pipeline and the readiness channel the engine polls.
    pub fn new(factory: Box<dyn EncoderFactory>) -> (Self, ReadyReceiver) {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                active: None,
                failure: None,
                next_id: 0,
                ready_tx,
            },
            ready_rx,
        )
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&RecordingSession> {
        self.active.as_ref()
    }

    /// Begin recording the session's framebuffer to `path`.
    pub fn start(&mut self, session: &ConnectionSession, path: PathBuf, fps: i64) -> Result<()> {
        if self.active.is_some() {
            return Err(PilotError::AlreadyRecording);
        }
        if !session.is_connected() {
            return Err(PilotError::NotConnected);
        }
        let (width, height) = session
            .framebuffer()
            .map(|fb| fb.dimensions())
            .ok_or(PilotError::NoFramebuffer)?;

        let fps = clamp_fps(fps);
        self.failure = None;
        self.next_id += 1;
        let id = self.next_id;
        let settings = EncoderSettings {
            path,
            width,
            height,
            fps,
        };
        let encoder = self
            .factory
            .start(&settings, ReadySignal::new(id, self.ready_tx.clone()))?;

        let period = Duration::from_millis(1000 / u64::from(fps));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(id, path = %settings.path.display(), width, height, fps, "Recording started");
        self.active = Some(RecordingSession {
            id,
            settings,
            encoder,
            ready: true,
            ticker,
            submitted: 0,
            dropped: 0,
        });
        Ok(())
    }

    /// Wait for the next sampling tick. Pending forever when idle.
    pub async fn next_tick(&mut self) {
        match self.active.as_mut() {
            Some(rec) => {
                rec.ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Sample one frame, or drop it.
    pub fn on_tick(&mut self, session: &ConnectionSession, fallback: Point) {
        let Some(rec) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = rec.sample(session, fallback) {
            let id = rec.id;
            self.fail(id, e.to_string());
        }
    }

    /// Apply a readiness or failure report from recording `event.id()`.
    pub fn on_encoder_event(&mut self, event: EncoderEvent) {
        if self.active.as_ref().map(|rec| rec.id) != Some(event.id()) {
            debug!(id = event.id(), "Event for a finished recording ignored");
            return;
        }
        match event {
            EncoderEvent::Ready(_) => {
                if let Some(rec) = self.active.as_mut() {
                    rec.ready = true;
                }
            }
            EncoderEvent::Failed(id, reason) => self.fail(id, reason),
        }
    }

    /// End the active recording after an encoder failure. The reason is
    /// kept for the next `stop`.
    fn fail(&mut self, id: RecordingId, reason: String) {
        warn!(id, %reason, "Encoder failed; recording stopped");
        if let Some(rec) = self.active.take() {
            rec.finalize().detach();
        }
        self.failure = Some(reason);
    }

    /// Halt sampling and start finalizing the file.
    ///
    /// With nothing active, reports why the last recording ended early, if
    /// it did.
    pub fn stop(&mut self) -> Result<Finalizing> {
        let failure = self.failure.take();
        match self.active.take() {
            Some(rec) => Ok(rec.finalize()),
            None => Err(failure.map_or(PilotError::NotRecording, PilotError::Encoder)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::session::{Generation, Link, WireEvent, WireEventKind};
    use crate::types::{ButtonMask, Rect};

    struct NullLink;

    impl Link for NullLink {
        fn open(&mut self, _: Generation, _: &str, _: u16, _: Option<&str>) {}
        fn close(&mut self) {}
        fn request_update(&mut self, _: bool, _: Rect) {}
        fn pointer(&mut self, _: ButtonMask, _: Point) {}
        fn key(&mut self, _: u32, _: bool) {}
    }

    #[derive(Default)]
    struct Log {
        frames: usize,
        finished: bool,
        settings: Option<EncoderSettings>,
        refuse_frames: bool,
    }

    struct FakeEncoder(Arc<Mutex<Log>>);

    #[async_trait]
    impl VideoEncoder for FakeEncoder {
        fn submit(&mut self, _frame: RgbaImage) -> Result<()> {
            let mut log = self.0.lock().unwrap();
            if log.refuse_frames {
                return Err(PilotError::Encoder("encoder stopped".into()));
            }
            log.frames += 1;
            Ok(())
        }
        async fn finish(&mut self) -> Result<()> {
            self.0.lock().unwrap().finished = true;
            Ok(())
        }
    }

    struct FakeFactory(Arc<Mutex<Log>>);

    impl EncoderFactory for FakeFactory {
        fn start(&self, settings: &EncoderSettings, _: ReadySignal) -> Result<Box<dyn VideoEncoder>> {
            self.0.lock().unwrap().settings = Some(settings.clone());
            Ok(Box::new(FakeEncoder(self.0.clone())))
        }
    }

    fn live_session() -> ConnectionSession {
        let mut s = ConnectionSession::new(Box::new(NullLink));
        s.open("h", 5900, None).unwrap();
        let g = s.generation();
        s.apply(WireEvent::new(g, WireEventKind::TransportConnected));
        s.apply(WireEvent::new(
            g,
            WireEventKind::ServerInit {
                width: 4,
                height: 2,
                name: String::new(),
            },
        ));
        s.apply(WireEvent::new(
            g,
            WireEventKind::Pixels {
                x: 0,
                y: 0,
                image: RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255])),
            },
        ));
        s
    }

    fn pipeline() -> (RecordingPipeline, ReadyReceiver, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let (p, rx) = RecordingPipeline::new(Box::new(FakeFactory(log.clone())));
        (p, rx, log)
    }

    #[test]
    fn fps_is_clamped() {
        assert_eq!(clamp_fps(0), 1);
        assert_eq!(clamp_fps(-4), 1);
        assert_eq!(clamp_fps(30), 30);
        assert_eq!(clamp_fps(500), 60);
    }

    #[tokio::test]
    async fn start_requires_connection_and_pixels() {
        let (mut p, _rx, _log) = pipeline();
        let idle = ConnectionSession::new(Box::new(NullLink));
        assert!(matches!(
            p.start(&idle, "a.mp4".into(), 10),
            Err(PilotError::NotConnected)
        ));
        assert!(matches!(p.stop(), Err(PilotError::NotRecording)));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_encoder_drops_frames_until_ready() {
        let (mut p, _rx, log) = pipeline();
        let s = live_session();
        p.start(&s, "a.mp4".into(), 500).unwrap();
        assert_eq!(log.lock().unwrap().settings.as_ref().unwrap().fps, 60);
        assert!(matches!(
            p.start(&s, "b.mp4".into(), 10),
            Err(PilotError::AlreadyRecording)
        ));

        p.on_tick(&s, Point::default());
        p.on_tick(&s, Point::default());
        assert_eq!(log.lock().unwrap().frames, 1);
        assert_eq!(p.active().unwrap().dropped(), 1);

        let id = p.active().unwrap().id();
        p.on_encoder_event(EncoderEvent::Ready(id + 1));
        p.on_tick(&s, Point::default());
        assert_eq!(log.lock().unwrap().frames, 1);

        p.on_encoder_event(EncoderEvent::Ready(id));
        p.on_tick(&s, Point::default());
        assert_eq!(log.lock().unwrap().frames, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_and_allows_restart() {
        let (mut p, _rx, log) = pipeline();
        let s = live_session();
        p.start(&s, "a.mp4".into(), 10).unwrap();
        p.stop().unwrap().wait().await.unwrap();
        assert!(log.lock().unwrap().finished);
        assert!(!p.is_active());
        p.start(&s, "b.mp4".into(), 10).unwrap();
        assert!(p.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_frame_ends_the_recording() {
        let (mut p, _rx, log) = pipeline();
        let s = live_session();
        p.start(&s, "a.mp4".into(), 10).unwrap();
        log.lock().unwrap().refuse_frames = true;

        p.on_tick(&s, Point::default());
        assert!(!p.is_active());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(log.lock().unwrap().finished);

        let err = p.stop().err().unwrap();
        assert_eq!(err.to_string(), "encoder error: encoder stopped");
        // Reported once.
        assert!(matches!(p.stop(), Err(PilotError::NotRecording)));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_report_ends_only_its_own_recording() {
        let (mut p, _rx, _log) = pipeline();
        let s = live_session();
        p.start(&s, "a.mp4".into(), 10).unwrap();
        let id = p.active().unwrap().id();

        p.on_encoder_event(EncoderEvent::Failed(id + 1, "stale".into()));
        assert!(p.is_active());

        p.on_encoder_event(EncoderEvent::Failed(id, "encoder pipe closed".into()));
        assert!(!p.is_active());

        // A new recording clears the old failure.
        p.start(&s, "b.mp4".into(), 10).unwrap();
        p.stop().unwrap().wait().await.unwrap();
        assert!(matches!(p.stop(), Err(PilotError::NotRecording)));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_frame_period() {
        let (mut p, _rx, _log) = pipeline();
        let s = live_session();
        p.start(&s, "a.mp4".into(), 4).unwrap();

        let start = Instant::now();
        p.next_tick().await;
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
