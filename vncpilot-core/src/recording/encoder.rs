//! The video encoder seam and its ffmpeg-backed implementation.
//!
//! An encoder accepts one frame at a time and announces, through its
//! [`ReadySignal`], when it can take the next or when it has failed.
//! Frames offered while it is busy are the pipeline's problem, not the
//! encoder's.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PilotError, Result};

/// Identifies one recording; readiness for an older one is ignored.
pub type RecordingId = u64;

/// What an encoder reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// The encoder can take another frame.
    Ready(RecordingId),
    /// The encoder cannot continue; the recording is over.
    Failed(RecordingId, String),
}

impl EncoderEvent {
    pub fn id(&self) -> RecordingId {
        match self {
            Self::Ready(id) | Self::Failed(id, _) => *id,
        }
    }
}

/// Receiver of encoder events, polled by the engine.
pub type ReadyReceiver = mpsc::UnboundedReceiver<EncoderEvent>;

// ── Settings ─────────────────────────────────────────────────────

/// What to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// How ffmpeg should encode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegOptions {
    /// Executable name or path.
    pub program: String,
    /// x264 preset.
    pub preset: String,
    /// x264 CRF quality (0-51, lower = better quality, larger file).
    pub crf: u8,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
        }
    }
}

// ── ReadySignal ──────────────────────────────────────────────────

/// Back channel from one recording's encoder to the engine.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    id: RecordingId,
    tx: mpsc::UnboundedSender<EncoderEvent>,
}

impl ReadySignal {
    pub fn new(id: RecordingId, tx: mpsc::UnboundedSender<EncoderEvent>) -> Self {
        Self { id, tx }
    }

    /// Ready for the next frame.
    pub fn notify(&self) {
        let _ = self.tx.send(EncoderEvent::Ready(self.id));
    }

    /// The encoder died.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(EncoderEvent::Failed(self.id, reason.into()));
    }
}

// ── Traits ───────────────────────────────────────────────────────

#[async_trait]
pub trait VideoEncoder: Send {
    /// Hand over one frame at the configured size. Never blocks; fails if
    /// the previous frame has not been consumed yet.
    fn submit(&mut self, frame: RgbaImage) -> Result<()>;

    /// Flush everything and close the output file.
    async fn finish(&mut self) -> Result<()>;
}

/// Creates an encoder per recording.
pub trait EncoderFactory: Send {
    fn start(&self, settings: &EncoderSettings, ready: ReadySignal) -> Result<Box<dyn VideoEncoder>>;
}

// ── ffmpeg ───────────────────────────────────────────────────────

/// Arguments for an H.264/MP4 encode of raw RGBA frames read from stdin.
///
/// Odd frame sizes are padded to even ones, as yuv420p requires.
pub fn build_ffmpeg_args(settings: &EncoderSettings, preset: &str, crf: u8) -> Vec<String> {
    let video_size = format!("{}x{}", settings.width, settings.height);
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pixel_format".to_string(),
        "rgba".to_string(),
        "-video_size".to_string(),
        video_size,
        "-framerate".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        preset.to_string(),
        "-crf".to_string(),
        crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        settings.path.to_string_lossy().into_owned(),
    ]
}

/// Spawns one ffmpeg process per recording.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFactory {
    options: FfmpegOptions,
}

impl FfmpegFactory {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }
}

impl EncoderFactory for FfmpegFactory {
    fn start(&self, settings: &EncoderSettings, ready: ReadySignal) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FfmpegEncoder::spawn(&self.options, settings, ready)?))
    }
}

/// An ffmpeg child fed through its stdin by a writer task.
pub struct FfmpegEncoder {
    frames: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    child: Child,
    frame_len: usize,
    path: PathBuf,
}

impl FfmpegEncoder {
    pub fn spawn(options: &FfmpegOptions, settings: &EncoderSettings, ready: ReadySignal) -> Result<Self> {
        let args = build_ffmpeg_args(settings, &options.preset, options.crf);
        debug!(program = %options.program, ?args, "Starting encoder");

        let mut child = Command::new(&options.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PilotError::Encoder(format!("failed to start {}: {e}", options.program)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PilotError::Encoder("encoder stdin unavailable".into()))?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = stdin.write_all(&frame).await {
                    warn!(error = %e, "Encoder stopped accepting frames");
                    ready.fail(format!("encoder pipe closed: {e}"));
                    return Err(e);
                }
                ready.notify();
            }
            stdin.shutdown().await
        });

        info!(path = %settings.path.display(), width = settings.width, height = settings.height, fps = settings.fps, "Encoder started");
        Ok(Self {
            frames: Some(tx),
            writer: Some(writer),
            child,
            frame_len: settings.width as usize * settings.height as usize * 4,
            path: settings.path.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn submit(&mut self, frame: RgbaImage) -> Result<()> {
        let raw = frame.into_raw();
        if raw.len() != self.frame_len {
            return Err(PilotError::Encoder(format!(
                "frame of {} bytes, expected {}",
                raw.len(),
                self.frame_len
            )));
        }
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| PilotError::Encoder("encoder already finished".into()))?;
        frames.try_send(raw).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PilotError::Encoder("encoder busy".into()),
            mpsc::error::TrySendError::Closed(_) => PilotError::Encoder("encoder stopped".into()),
        })
    }

    async fn finish(&mut self) -> Result<()> {
        // Closing the channel ends the writer, which closes ffmpeg's stdin.
        self.frames = None;
        if let Some(writer) = self.writer.take() {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Encoder pipe closed early"),
                Err(e) => return Err(PilotError::Encoder(format!("writer task failed: {e}"))),
            }
        }
        let status = self.child.wait().await?;
        if !status.success() {
            return Err(PilotError::Encoder(format!("ffmpeg exited with {status}")));
        }
        info!(path = %self.path.display(), "Recording finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            path: PathBuf::from("/tmp/out.mp4"),
            width: 641,
            height: 480,
            fps: 10,
        }
    }

    #[test]
    fn ffmpeg_args_describe_raw_rgba_input() {
        let args = build_ffmpeg_args(&settings(), "veryfast", 28);
        let value = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(value("-pixel_format"), "rgba");
        assert_eq!(value("-video_size"), "641x480");
        assert_eq!(value("-framerate"), "10");
        assert_eq!(value("-c:v"), "libx264");
        assert_eq!(value("-preset"), "veryfast");
        assert_eq!(value("-crf"), "28");
        assert_eq!(value("-pix_fmt"), "yuv420p");
        assert!(value("-vf").starts_with("pad="));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn ready_signal_tags_events_with_the_recording() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signal = ReadySignal::new(7, tx);
        signal.notify();
        signal.fail("broken pipe");
        assert_eq!(rx.try_recv().unwrap(), EncoderEvent::Ready(7));
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed, EncoderEvent::Failed(7, "broken pipe".into()));
        assert_eq!(failed.id(), 7);
    }

    #[tokio::test]
    async fn missing_program_is_an_encoder_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = FfmpegFactory::new(FfmpegOptions {
            program: "/nonexistent/ffmpeg-binary".into(),
            ..Default::default()
        });
        let err = factory.start(&settings(), ReadySignal::new(1, tx)).err().unwrap();
        assert!(matches!(err, PilotError::Encoder(_)));
    }
}
