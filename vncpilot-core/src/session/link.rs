//! The seam between the session state machine and the wire.
//!
//! A [`Link`] accepts outbound requests without blocking and reports
//! everything it hears back as [`WireEvent`]s on a channel the engine polls.
//! [`crate::rfb::RfbLink`] speaks real RFB over TCP; tests script their own.

use image::RgbaImage;
use tokio::sync::mpsc;

use crate::types::{ButtonMask, CursorShape, Point, Rect};

/// Monotonic connection counter. Events from an older connection are stale.
pub type Generation = u64;

/// Sender half handed to a [`Link`] implementation.
pub type WireEventSender = mpsc::UnboundedSender<WireEvent>;

/// Receiver half polled by the engine.
pub type WireEventReceiver = mpsc::UnboundedReceiver<WireEvent>;

/// Create a wire event channel.
pub fn wire_channel() -> (WireEventSender, WireEventReceiver) {
    mpsc::unbounded_channel()
}

// ── WireEvent ────────────────────────────────────────────────────

/// One notification from the link, tagged with the connection it belongs to.
#[derive(Debug, Clone)]
pub struct WireEvent {
    pub generation: Generation,
    pub kind: WireEventKind,
}

impl WireEvent {
    pub fn new(generation: Generation, kind: WireEventKind) -> Self {
        Self { generation, kind }
    }
}

#[derive(Debug, Clone)]
pub enum WireEventKind {
    /// The TCP socket is up; the RFB handshake starts now.
    TransportConnected,
    /// The transport failed. Terminal for this generation.
    TransportError(String),
    /// An established connection ended. Terminal for this generation.
    TransportClosed,
    /// Handshake complete; the server announced its desktop.
    ServerInit {
        width: u32,
        height: u32,
        name: String,
    },
    /// A rectangle of decoded pixels at `(x, y)`.
    Pixels { x: u32, y: u32, image: RgbaImage },
    /// New cursor shape, or `None` when the server hides its cursor.
    Cursor(Option<CursorShape>),
    /// Server-reported pointer position.
    PointerPos(Point),
    /// The remote desktop changed size.
    DesktopSize { width: u32, height: u32 },
    /// Every rectangle of one FramebufferUpdate has been delivered.
    UpdateEnd,
}

// ── Link ─────────────────────────────────────────────────────────

/// Outbound half of a remote-framebuffer connection.
///
/// All methods return immediately. Requests issued while no connection is
/// established are dropped by the implementation.
pub trait Link: Send {
    /// Start connecting. Events for this attempt carry `generation`.
    fn open(&mut self, generation: Generation, host: &str, port: u16, password: Option<&str>);

    /// Tear down the current connection without emitting further events.
    fn close(&mut self);

    /// FramebufferUpdateRequest for `area`.
    fn request_update(&mut self, incremental: bool, area: Rect);

    /// PointerEvent.
    fn pointer(&mut self, buttons: ButtonMask, at: Point);

    /// KeyEvent.
    fn key(&mut self, keysym: u32, down: bool);
}
