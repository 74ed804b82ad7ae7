//! Screen recording: sampling composited frames into an H.264/MP4 file.

pub mod encoder;
pub mod pipeline;

pub use encoder::{
    EncoderEvent, EncoderFactory, EncoderSettings, FfmpegEncoder, FfmpegFactory, FfmpegOptions,
    ReadyReceiver, ReadySignal, RecordingId, VideoEncoder, build_ffmpeg_args,
};
pub use pipeline::{
    DEFAULT_FPS, Finalizing, MAX_FPS, MIN_FPS, RecordingPipeline, RecordingSession, clamp_fps,
};
