//! [`Link`] implementation over a real TCP socket.
//!
//! Each `open` spawns one connection task. The task performs the handshake,
//! then splits a `Framed<TcpStream, RfbCodec>` into a writer task fed by an
//! mpsc channel and a reader loop that translates server messages into
//! [`WireEvent`]s.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use image::{Rgba, RgbaImage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::{
    BYTES_PER_PIXEL, ClientMessage, PixelFormat, RectBody, RfbCodec, SUPPORTED_ENCODINGS,
    ServerMessage,
};
use super::handshake::handshake;
use crate::error::PilotError;
use crate::session::{Generation, Link, WireEvent, WireEventKind, WireEventSender};
use crate::types::{ButtonMask, CursorShape, Point, Rect};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── RfbLink ──────────────────────────────────────────────────────

pub struct RfbLink {
    events: WireEventSender,
    connect_timeout: Duration,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    task: Option<JoinHandle<()>>,
}

impl RfbLink {
    pub fn new(events: WireEventSender) -> Self {
        Self {
            events,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound: None,
            task: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn send(&self, msg: ClientMessage) {
        match &self.outbound {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => debug!("No connection; dropping outbound message"),
        }
    }
}

impl Link for RfbLink {
    fn open(&mut self, generation: Generation, host: &str, port: u16, password: Option<&str>) {
        self.close();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_connection(
            Emitter {
                generation,
                events: self.events.clone(),
            },
            host.to_string(),
            port,
            password.map(str::to_string),
            self.connect_timeout,
            rx,
        )));
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn request_update(&mut self, incremental: bool, area: Rect) {
        let clamp = |v: u32| v.min(u32::from(u16::MAX)) as u16;
        self.send(ClientMessage::FramebufferUpdateRequest {
            incremental,
            x: clamp(area.x),
            y: clamp(area.y),
            width: clamp(area.width),
            height: clamp(area.height),
        });
    }

    fn pointer(&mut self, buttons: ButtonMask, at: Point) {
        self.send(ClientMessage::pointer(buttons, at));
    }

    fn key(&mut self, keysym: u32, down: bool) {
        self.send(ClientMessage::KeyEvent { down, keysym });
    }
}

impl Drop for RfbLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Connection task ──────────────────────────────────────────────

#[derive(Clone)]
struct Emitter {
    generation: Generation,
    events: WireEventSender,
}

impl Emitter {
    fn emit(&self, kind: WireEventKind) {
        let _ = self.events.send(WireEvent::new(self.generation, kind));
    }

    /// Report a failure. A peer hang-up counts as a plain disconnect.
    fn fail(&self, err: PilotError) {
        match err {
            PilotError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.emit(WireEventKind::TransportClosed)
            }
            other => self.emit(WireEventKind::TransportError(other.to_string())),
        }
    }
}

async fn run_connection(
    emitter: Emitter,
    host: String,
    port: u16,
    password: Option<String>,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let mut stream =
        match tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                emitter.emit(WireEventKind::TransportError(e.to_string()));
                return;
            }
            Err(_) => {
                emitter.emit(WireEventKind::TransportError("connection timed out".into()));
                return;
            }
        };
    let _ = stream.set_nodelay(true);
    emitter.emit(WireEventKind::TransportConnected);

    let init = match handshake(&mut stream, password.as_deref()).await {
        Ok(init) => init,
        Err(e) => {
            emitter.fail(e);
            return;
        }
    };
    info!(
        host = %host,
        port,
        width = init.width,
        height = init.height,
        name = %init.name,
        "RFB handshake complete"
    );

    let mut framed = Framed::new(stream, RfbCodec::new());
    let setup = match framed
        .send(ClientMessage::SetPixelFormat(PixelFormat::BGRX))
        .await
    {
        Ok(()) => {
            framed
                .send(ClientMessage::SetEncodings(SUPPORTED_ENCODINGS.to_vec()))
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = setup {
        emitter.fail(e);
        return;
    }
    emitter.emit(WireEventKind::ServerInit {
        width: u32::from(init.width),
        height: u32::from(init.height),
        name: init.name,
    });

    let (mut net_writer, mut net_reader) = framed.split();

    // Writer task: engine -> network. Ends when the link drops its sender.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = net_writer.send(msg).await {
                warn!(error = %e, "RFB write failed");
                break;
            }
        }
    });

    // Reader loop: network -> engine.
    let outcome = loop {
        match net_reader.next().await {
            Some(Ok(msg)) => {
                if let Some(kind) = translate(msg) {
                    emitter.emit(kind);
                }
            }
            Some(Err(e)) => break Some(e),
            None => break None,
        }
    };
    writer.abort();

    match outcome {
        Some(e) => emitter.fail(e),
        None => emitter.emit(WireEventKind::TransportClosed),
    }
}

// ── Translation ──────────────────────────────────────────────────

/// Map a decoded server message to the event the session consumes.
fn translate(msg: ServerMessage) -> Option<WireEventKind> {
    match msg {
        ServerMessage::Rect {
            x,
            y,
            width,
            height,
            body,
        } => {
            let (w, h) = (u32::from(width), u32::from(height));
            match body {
                RectBody::Raw(pixels) => Some(WireEventKind::Pixels {
                    x: u32::from(x),
                    y: u32::from(y),
                    image: bgrx_to_rgba(w, h, &pixels, None)?,
                }),
                RectBody::Cursor { pixels, mask } => {
                    let shape = if w == 0 || h == 0 {
                        None
                    } else {
                        Some(CursorShape {
                            image: bgrx_to_rgba(w, h, &pixels, Some(&mask[..]))?,
                            hotspot: Point::new(i32::from(x), i32::from(y)),
                        })
                    };
                    Some(WireEventKind::Cursor(shape))
                }
                RectBody::PointerPos => Some(WireEventKind::PointerPos(Point::new(
                    i32::from(x),
                    i32::from(y),
                ))),
                RectBody::DesktopSize => Some(WireEventKind::DesktopSize {
                    width: w,
                    height: h,
                }),
            }
        }
        ServerMessage::UpdateEnd => Some(WireEventKind::UpdateEnd),
        ServerMessage::SetColourMapEntries | ServerMessage::Bell => None,
        ServerMessage::ServerCutText(text) => {
            debug!(len = text.len(), "Ignoring server clipboard");
            None
        }
    }
}

/// Convert `B G R X` pixels to RGBA. With a cursor mask, cleared bits
/// become fully transparent.
fn bgrx_to_rgba(width: u32, height: u32, pixels: &[u8], mask: Option<&[u8]>) -> Option<RgbaImage> {
    let stride = (width as usize).div_ceil(8);
    let mut img = RgbaImage::new(width, height);
    for (i, px) in pixels.chunks_exact(BYTES_PER_PIXEL).enumerate() {
        let x = (i % width as usize) as u32;
        let y = (i / width as usize) as u32;
        let alpha = match mask {
            Some(mask) => {
                let byte = mask.get(y as usize * stride + x as usize / 8)?;
                if byte & (0x80 >> (x % 8)) != 0 { 255 } else { 0 }
            }
            None => 255,
        };
        img.put_pixel(x, y, Rgba([px[2], px[1], px[0], alpha]));
    }
    Some(img)
}
