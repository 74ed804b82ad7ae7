//! Protocol-session state for one remote desktop.
//!
//! [`ConnectionSession`] is the single writer of framebuffer and cursor
//! state. It applies [`WireEvent`]s from the link, turns them into
//! [`SessionSignal`]s for the rest of the engine, and is the only place that
//! issues framebuffer update requests.
//!
//! ```text
//!  Disconnected ──open──► Connecting ──TransportConnected──► Connected
//!       ▲                     │                                  │
//!       └── TransportError / TransportClosed / close ◄───────────┘
//! ```

pub mod link;

use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use crate::error::{PilotError, Result};
use crate::types::{ButtonMask, CursorShape, Point, Rect};

pub use link::{
    Generation, Link, WireEvent, WireEventKind, WireEventReceiver, WireEventSender, wire_channel,
};

// ── TransportState ───────────────────────────────────────────────

/// Connection state as derived from transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

// ── SessionSignal ────────────────────────────────────────────────

/// What changed after applying one wire event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// The socket connected.
    TransportConnected,
    /// The transport failed with the given message.
    TransportError(String),
    /// An open connection ended without a transport error.
    Disconnected,
    /// Entered (`true`) or left (`false`) the connected state.
    ConnectionStateChanged(bool),
    /// Pixel data was written into the framebuffer.
    ImageChanged(Rect),
    /// A complete FramebufferUpdate was applied.
    FramebufferUpdated,
    /// The server cursor shape changed or disappeared.
    CursorChanged,
    /// The server reported a new pointer position.
    CursorPosChanged(Point),
    /// The remote desktop changed size.
    DesktopResized { width: u32, height: u32 },
}

// ── ConnectionSession ────────────────────────────────────────────

pub struct ConnectionSession {
    link: Box<dyn Link>,
    state: TransportState,
    generation: Generation,
    peer: Option<(String, u16)>,
    handshake_complete: bool,
    desktop_size: (u32, u32),
    desktop_name: String,
    framebuffer: Option<RgbaImage>,
    cursor: Option<CursorShape>,
    cursor_pos: Point,
    updates_enabled: bool,
}

impl ConnectionSession {
    pub fn new(link: Box<dyn Link>) -> Self {
        Self {
            link,
            state: TransportState::Disconnected,
            generation: 0,
            peer: None,
            handshake_complete: false,
            desktop_size: (0, 0),
            desktop_name: String::new(),
            framebuffer: None,
            cursor: None,
            cursor_pos: Point::default(),
            updates_enabled: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    /// `true` once ServerInit has been received on the current connection.
    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn peer(&self) -> Option<(&str, u16)> {
        self.peer.as_ref().map(|(h, p)| (h.as_str(), *p))
    }

    pub fn desktop_name(&self) -> &str {
        &self.desktop_name
    }

    /// The current framebuffer snapshot, absent until pixels have arrived.
    pub fn framebuffer(&self) -> Option<&RgbaImage> {
        self.framebuffer.as_ref()
    }

    pub fn cursor(&self) -> Option<&CursorShape> {
        self.cursor.as_ref()
    }

    pub fn cursor_pos(&self) -> Point {
        self.cursor_pos
    }

    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled
    }

    /// `"connected to <host>:<port> (<w>x<h>)"` or `"disconnected"`.
    pub fn status(&self) -> String {
        match (&self.state, &self.peer) {
            (TransportState::Connected, Some((host, port))) => {
                let (w, h) = self
                    .framebuffer
                    .as_ref()
                    .map(|fb| fb.dimensions())
                    .unwrap_or(self.desktop_size);
                format!("connected to {host}:{port} ({w}x{h})")
            }
            _ => "disconnected".to_string(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Begin a new connection.
    ///
    /// Valid from: `Disconnected`. The previous snapshot is discarded.
    pub fn open(&mut self, host: &str, port: u16, password: Option<&str>) -> Result<()> {
        if self.state != TransportState::Disconnected {
            return Err(PilotError::ConnectInProgress);
        }
        self.generation += 1;
        self.peer = Some((host.to_string(), port));
        self.handshake_complete = false;
        self.desktop_size = (0, 0);
        self.desktop_name.clear();
        self.framebuffer = None;
        self.cursor = None;
        self.state = TransportState::Connecting;
        info!(host, port, generation = self.generation, "Opening connection");
        self.link.open(self.generation, host, port, password);
        Ok(())
    }

    /// Close the current connection, if any.
    ///
    /// Events still in flight from the closed connection become stale.
    pub fn close(&mut self) -> Vec<SessionSignal> {
        if self.state == TransportState::Disconnected {
            return Vec::new();
        }
        info!(generation = self.generation, "Closing connection");
        self.link.close();
        self.generation += 1;
        self.leave(None)
    }

    fn leave(&mut self, error: Option<String>) -> Vec<SessionSignal> {
        let was_connected = self.is_connected();
        self.state = TransportState::Disconnected;
        self.handshake_complete = false;

        let mut signals = vec![match error {
            Some(msg) => SessionSignal::TransportError(msg),
            None => SessionSignal::Disconnected,
        }];
        if was_connected {
            signals.push(SessionSignal::ConnectionStateChanged(false));
        }
        signals
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Turn continuous framebuffer updates on or off.
    ///
    /// Requests are only sent once the protocol handshake is complete; an
    /// enable issued earlier takes effect at ServerInit.
    pub fn set_updates_enabled(&mut self, enabled: bool) {
        if self.updates_enabled == enabled {
            return;
        }
        debug!(enabled, "Framebuffer updates");
        self.updates_enabled = enabled;
        if enabled && self.handshake_complete {
            self.request_full_update();
        }
    }

    fn request_full_update(&mut self) {
        let (w, h) = self.desktop_size;
        self.link.request_update(false, Rect::full(w, h));
    }

    /// Send a pointer event. Dropped unless the handshake is complete.
    pub fn pointer(&mut self, buttons: ButtonMask, at: Point) {
        if !self.handshake_complete {
            debug!(?at, "Pointer event dropped: not connected");
            return;
        }
        self.cursor_pos = at;
        self.link.pointer(buttons, at);
    }

    /// Send a key event. Dropped unless the handshake is complete.
    pub fn key(&mut self, keysym: u32, down: bool) {
        if !self.handshake_complete {
            debug!(keysym, "Key event dropped: not connected");
            return;
        }
        self.link.key(keysym, down);
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Apply one wire event and report what changed.
    pub fn apply(&mut self, event: WireEvent) -> Vec<SessionSignal> {
        if event.generation != self.generation {
            debug!(
                event_generation = event.generation,
                current = self.generation,
                "Ignoring stale wire event"
            );
            return Vec::new();
        }

        match event.kind {
            WireEventKind::TransportConnected => {
                if self.state != TransportState::Connecting {
                    warn!(state = %self.state, "Unexpected TransportConnected");
                    return Vec::new();
                }
                self.state = TransportState::Connected;
                info!("Transport connected");
                vec![
                    SessionSignal::TransportConnected,
                    SessionSignal::ConnectionStateChanged(true),
                ]
            }

            WireEventKind::TransportError(msg) => {
                if self.state == TransportState::Disconnected {
                    return Vec::new();
                }
                warn!(error = %msg, "Transport error");
                self.leave(Some(msg))
            }

            WireEventKind::TransportClosed => {
                if self.state == TransportState::Disconnected {
                    return Vec::new();
                }
                info!("Transport closed");
                self.leave(None)
            }

            WireEventKind::ServerInit {
                width,
                height,
                name,
            } => {
                info!(width, height, name = %name, "Server init");
                self.handshake_complete = true;
                self.desktop_size = (width, height);
                self.desktop_name = name;
                if self.updates_enabled {
                    self.request_full_update();
                }
                Vec::new()
            }

            WireEventKind::Pixels { x, y, image } => match self.blit(x, y, &image) {
                Some(rect) => vec![SessionSignal::ImageChanged(rect)],
                None => Vec::new(),
            },

            WireEventKind::Cursor(shape) => {
                self.cursor = shape;
                vec![SessionSignal::CursorChanged]
            }

            WireEventKind::PointerPos(at) => {
                self.cursor_pos = at;
                vec![SessionSignal::CursorPosChanged(at)]
            }

            WireEventKind::DesktopSize { width, height } => {
                info!(width, height, "Desktop resized");
                self.desktop_size = (width, height);
                if let Some(old) = self.framebuffer.take() {
                    let mut resized = blank(width, height);
                    image::imageops::replace(&mut resized, &old, 0, 0);
                    self.framebuffer = Some(resized);
                }
                vec![SessionSignal::DesktopResized { width, height }]
            }

            WireEventKind::UpdateEnd => {
                if self.updates_enabled && self.handshake_complete {
                    let (w, h) = self.desktop_size;
                    self.link.request_update(true, Rect::full(w, h));
                }
                vec![SessionSignal::FramebufferUpdated]
            }
        }
    }

    /// Copy `image` into the framebuffer at `(x, y)`, clipped to the desktop.
    fn blit(&mut self, x: u32, y: u32, image: &RgbaImage) -> Option<Rect> {
        let (dw, dh) = self.desktop_size;
        if x >= dw || y >= dh || image.width() == 0 || image.height() == 0 {
            warn!(x, y, width = image.width(), height = image.height(), "Rectangle outside desktop");
            return None;
        }
        let fb = self.framebuffer.get_or_insert_with(|| blank(dw, dh));
        image::imageops::replace(fb, image, i64::from(x), i64::from(y));
        Some(Rect::new(
            x,
            y,
            image.width().min(dw - x),
            image.height().min(dh - y),
        ))
    }
}

fn blank(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Open(Generation, String, u16),
        Close,
        Update(bool),
        Pointer(ButtonMask, Point),
        Key(u32, bool),
    }

    #[derive(Clone, Default)]
    struct RecordingLink(Arc<Mutex<Vec<Call>>>);

    impl Link for RecordingLink {
        fn open(&mut self, generation: Generation, host: &str, port: u16, _: Option<&str>) {
            self.0.lock().unwrap().push(Call::Open(generation, host.into(), port));
        }
        fn close(&mut self) {
            self.0.lock().unwrap().push(Call::Close);
        }
        fn request_update(&mut self, incremental: bool, _: Rect) {
            self.0.lock().unwrap().push(Call::Update(incremental));
        }
        fn pointer(&mut self, buttons: ButtonMask, at: Point) {
            self.0.lock().unwrap().push(Call::Pointer(buttons, at));
        }
        fn key(&mut self, keysym: u32, down: bool) {
            self.0.lock().unwrap().push(Call::Key(keysym, down));
        }
    }

    fn session() -> (ConnectionSession, Arc<Mutex<Vec<Call>>>) {
        let link = RecordingLink::default();
        let calls = link.0.clone();
        (ConnectionSession::new(Box::new(link)), calls)
    }

    fn ev(s: &ConnectionSession, kind: WireEventKind) -> WireEvent {
        WireEvent::new(s.generation(), kind)
    }

    fn handshake(s: &mut ConnectionSession, w: u32, h: u32) {
        s.open("example", 5900, None).unwrap();
        let g = s.generation();
        s.apply(WireEvent::new(g, WireEventKind::TransportConnected));
        s.apply(WireEvent::new(
            g,
            WireEventKind::ServerInit {
                width: w,
                height: h,
                name: "desk".into(),
            },
        ));
    }

    #[test]
    fn open_then_connected() {
        let (mut s, calls) = session();
        s.open("example", 5901, None).unwrap();
        assert_eq!(s.state(), TransportState::Connecting);
        assert_eq!(calls.lock().unwrap()[0], Call::Open(1, "example".into(), 5901));

        let signals = s.apply(ev(&s, WireEventKind::TransportConnected));
        assert_eq!(
            signals,
            vec![
                SessionSignal::TransportConnected,
                SessionSignal::ConnectionStateChanged(true)
            ]
        );
        assert!(s.is_connected());
    }

    #[test]
    fn open_while_connecting_is_rejected() {
        let (mut s, _) = session();
        s.open("example", 5900, None).unwrap();
        assert!(matches!(
            s.open("example", 5900, None),
            Err(PilotError::ConnectInProgress)
        ));
    }

    #[test]
    fn updates_wait_for_server_init() {
        let (mut s, calls) = session();
        s.set_updates_enabled(true);
        s.open("example", 5900, None).unwrap();
        s.apply(ev(&s, WireEventKind::TransportConnected));
        assert!(!calls.lock().unwrap().contains(&Call::Update(false)));

        s.apply(ev(
            &s,
            WireEventKind::ServerInit {
                width: 4,
                height: 4,
                name: String::new(),
            },
        ));
        assert!(calls.lock().unwrap().contains(&Call::Update(false)));
    }

    #[test]
    fn update_end_requests_incremental_only_when_enabled() {
        let (mut s, calls) = session();
        handshake(&mut s, 4, 4);
        s.apply(ev(&s, WireEventKind::UpdateEnd));
        assert!(!calls.lock().unwrap().contains(&Call::Update(true)));

        s.set_updates_enabled(true);
        let signals = s.apply(ev(&s, WireEventKind::UpdateEnd));
        assert_eq!(signals, vec![SessionSignal::FramebufferUpdated]);
        assert!(calls.lock().unwrap().contains(&Call::Update(true)));
    }

    #[test]
    fn first_pixels_allocate_framebuffer() {
        let (mut s, _) = session();
        handshake(&mut s, 8, 6);
        assert!(s.framebuffer().is_none());

        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let signals = s.apply(ev(&s, WireEventKind::Pixels { x: 7, y: 1, image: img }));
        assert_eq!(signals, vec![SessionSignal::ImageChanged(Rect::new(7, 1, 1, 2))]);

        let fb = s.framebuffer().unwrap();
        assert_eq!(fb.dimensions(), (8, 6));
        assert_eq!(fb.get_pixel(7, 2), &Rgba([10, 20, 30, 255]));
        assert_eq!(fb.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(s.status(), "connected to example:5900 (8x6)");
    }

    #[test]
    fn stale_events_are_ignored() {
        let (mut s, _) = session();
        s.open("example", 5900, None).unwrap();
        let stale = WireEvent::new(s.generation() - 1, WireEventKind::TransportConnected);
        assert!(s.apply(stale).is_empty());
        assert_eq!(s.state(), TransportState::Connecting);
    }

    #[test]
    fn transport_error_while_connecting() {
        let (mut s, _) = session();
        s.open("example", 5900, None).unwrap();
        let signals = s.apply(ev(&s, WireEventKind::TransportError("refused".into())));
        assert_eq!(signals, vec![SessionSignal::TransportError("refused".into())]);
        assert_eq!(s.status(), "disconnected");
    }

    #[test]
    fn close_reports_disconnect_and_drops_late_events() {
        let (mut s, calls) = session();
        handshake(&mut s, 4, 4);
        let old = s.generation();

        let signals = s.close();
        assert_eq!(
            signals,
            vec![
                SessionSignal::Disconnected,
                SessionSignal::ConnectionStateChanged(false)
            ]
        );
        assert!(calls.lock().unwrap().contains(&Call::Close));
        assert!(s.apply(WireEvent::new(old, WireEventKind::TransportClosed)).is_empty());
        assert!(s.close().is_empty());
    }

    #[test]
    fn input_is_dropped_before_handshake() {
        let (mut s, calls) = session();
        s.pointer(ButtonMask::LEFT, Point::new(1, 1));
        s.key(0x61, true);
        assert!(calls.lock().unwrap().is_empty());

        handshake(&mut s, 4, 4);
        s.pointer(ButtonMask::LEFT, Point::new(1, 1));
        s.key(0x61, true);
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&Call::Pointer(ButtonMask::LEFT, Point::new(1, 1))));
        assert!(calls.contains(&Call::Key(0x61, true)));
        assert_eq!(s.cursor_pos(), Point::new(1, 1));
    }

    #[test]
    fn resize_keeps_overlap() {
        let (mut s, _) = session();
        handshake(&mut s, 4, 4);
        let img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        s.apply(ev(&s, WireEventKind::Pixels { x: 0, y: 0, image: img }));
        s.apply(ev(&s, WireEventKind::DesktopSize { width: 6, height: 2 }));

        let fb = s.framebuffer().unwrap();
        assert_eq!(fb.dimensions(), (6, 2));
        assert_eq!(fb.get_pixel(3, 1), &Rgba([255, 255, 255, 255]));
        assert_eq!(fb.get_pixel(5, 1), &Rgba([0, 0, 0, 255]));
    }
}
