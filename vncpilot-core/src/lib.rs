//! # vncpilot-core
//!
//! Engine for driving a remote desktop over VNC through discrete tool calls.
//!
//! This crate contains:
//! - **RFB client**: `RfbCodec`, the handshake and `RfbLink`, a TCP transport
//! - **Session**: `ConnectionSession`, the connection state machine and framebuffer
//! - **Input**: `ActionDispatcher`, mouse and keyboard actions with timed follow-ups
//! - **Capture**: cursor compositing and region extraction
//! - **Correlation**: `RequestCorrelator`, turning async session events into call results
//! - **Macros**: `MacroStore` on disk and `MacroPlayer` for timed playback
//! - **Recording**: `RecordingPipeline` feeding an external H.264 encoder
//! - **Engine**: the single task that owns it all, driven through `EngineHandle`
//! - **Error**: `PilotError`, a `thiserror`-based error type

pub mod compositor;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod input;
pub mod macros;
pub mod preview;
pub mod recording;
pub mod rfb;
pub mod scheduler;
pub mod session;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use correlator::{CaptureSink, RequestCorrelator};
pub use engine::{
    Command, Engine, EngineConfig, EngineHandle, SignalObserver, TransportConfig, spawn,
};
pub use error::{PilotError, Result};
pub use input::{ActionDispatcher, FollowUp, InputAction, char_keysym, parse_keysym};
pub use macros::{MacroAction, MacroDefinition, MacroPlayer, MacroStep, MacroStore};
pub use preview::{HeadlessPreview, Preview, PreviewSurface};
pub use recording::{
    EncoderEvent, EncoderFactory, EncoderSettings, FfmpegFactory, FfmpegOptions, Finalizing,
    ReadySignal, RecordingPipeline, VideoEncoder,
};
pub use rfb::RfbLink;
pub use scheduler::{Job, Scheduler};
pub use session::{
    ConnectionSession, Generation, Link, SessionSignal, TransportState, WireEvent, WireEventKind,
    WireEventSender, wire_channel,
};
pub use types::{ButtonMask, CursorShape, MouseButton, Point, Rect, Region};
