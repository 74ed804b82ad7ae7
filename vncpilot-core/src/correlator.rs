//! Bridging of asynchronous session signals to single-shot tool results.
//!
//! A pending request is held as an armed waiter owning its `oneshot` reply
//! slot. Resolving a waiter consumes it together with the slot, so every
//! request completes exactly once and all of its races disarm at that same
//! moment.
//!
//! ```text
//!  connect:  Armed ──TransportConnected──► AwaitingFrame ──FramebufferUpdated──► Ok(status)
//!              │                               │
//!              └──── TransportError / Disconnected ────────────────────────────► Err
//!
//!  capture:  Armed ──ImageChanged──► SawPixels ──FramebufferUpdated──► image
//!              └──── TransportError / Disconnected ──────────────────► image (from snapshot)
//! ```

use std::path::PathBuf;

use image::RgbaImage;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::compositor;
use crate::error::{PilotError, Result};
use crate::session::{ConnectionSession, SessionSignal, TransportState};
use crate::types::{Point, Region};

/// Reply slot of a `connect` call.
pub type ConnectReply = oneshot::Sender<Result<String>>;

/// Where a finished capture goes.
#[derive(Debug)]
pub enum CaptureSink {
    /// `screenshot`: the composited, extracted image.
    Image(oneshot::Sender<Result<RgbaImage>>),
    /// `save`: write to `path` and report success.
    File {
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
}

// ── Waiters ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPhase {
    /// Waiting for the socket.
    Armed,
    /// Socket up, updates enabled, waiting for the first complete update.
    AwaitingFrame,
}

#[derive(Debug)]
struct ConnectWaiter {
    phase: ConnectPhase,
    reply: ConnectReply,
}

#[derive(Debug)]
struct CaptureWaiter {
    region: Region,
    sink: CaptureSink,
    saw_pixels: bool,
}

// ── RequestCorrelator ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    connect: Option<ConnectWaiter>,
    captures: Vec<CaptureWaiter>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while the correlator needs framebuffer updates flowing.
    pub fn wants_updates(&self) -> bool {
        !self.captures.is_empty()
            || self
                .connect
                .as_ref()
                .is_some_and(|c| c.phase == ConnectPhase::AwaitingFrame)
    }

    /// Number of armed requests.
    pub fn pending(&self) -> usize {
        self.captures.len() + usize::from(self.connect.is_some())
    }

    // ── connect ──────────────────────────────────────────────────

    /// Start a connection and arm its races.
    pub fn begin_connect(
        &mut self,
        session: &mut ConnectionSession,
        host: &str,
        port: u16,
        password: Option<&str>,
        reply: ConnectReply,
    ) {
        match session.state() {
            TransportState::Connected => {
                let _ = reply.send(Ok(session.status()));
                return;
            }
            TransportState::Connecting => {
                let _ = reply.send(Err(PilotError::ConnectInProgress));
                return;
            }
            TransportState::Disconnected => {}
        }

        if let Err(e) = session.open(host, port, password) {
            let _ = reply.send(Err(e));
            return;
        }
        self.connect = Some(ConnectWaiter {
            phase: ConnectPhase::Armed,
            reply,
        });
    }

    // ── screenshot / save ────────────────────────────────────────

    /// Capture now if updates are flowing or there is no live transport;
    /// otherwise wait for fresh pixels.
    pub fn begin_capture(
        &mut self,
        session: &ConnectionSession,
        fallback: Point,
        region: Region,
        sink: CaptureSink,
    ) {
        if session.updates_enabled() || !session.is_connected() {
            resolve_capture(session, fallback, region, sink);
            return;
        }
        debug!(?region, "Capture armed; waiting for pixels");
        self.captures.push(CaptureWaiter {
            region,
            sink,
            saw_pixels: false,
        });
    }

    // ── Signals ──────────────────────────────────────────────────

    /// Advance armed requests with one session signal.
    pub fn on_signal(&mut self, signal: &SessionSignal, session: &ConnectionSession, fallback: Point) {
        match signal {
            SessionSignal::TransportConnected => {
                if let Some(waiter) = self.connect.as_mut() {
                    waiter.phase = ConnectPhase::AwaitingFrame;
                }
            }

            SessionSignal::ImageChanged(_) => {
                for waiter in &mut self.captures {
                    waiter.saw_pixels = true;
                }
            }

            SessionSignal::FramebufferUpdated => {
                let frame_due = self
                    .connect
                    .as_ref()
                    .is_some_and(|c| c.phase == ConnectPhase::AwaitingFrame);
                if frame_due {
                    if let Some(waiter) = self.connect.take() {
                        let status = session.status();
                        info!(status = %status, "Connect resolved");
                        let _ = waiter.reply.send(Ok(status));
                    }
                }

                let (ready, waiting): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut self.captures).into_iter().partition(|w| w.saw_pixels);
                self.captures = waiting;
                for waiter in ready {
                    resolve_capture(session, fallback, waiter.region, waiter.sink);
                }
            }

            SessionSignal::TransportError(msg) => {
                self.fail_connect(PilotError::Transport(msg.clone()));
                self.flush_captures(session, fallback);
            }

            SessionSignal::Disconnected => {
                self.fail_connect(PilotError::DisconnectedDuringHandshake);
                self.flush_captures(session, fallback);
            }

            SessionSignal::ConnectionStateChanged(_)
            | SessionSignal::CursorChanged
            | SessionSignal::CursorPosChanged(_)
            | SessionSignal::DesktopResized { .. } => {}
        }
    }

    fn fail_connect(&mut self, err: PilotError) {
        if let Some(waiter) = self.connect.take() {
            info!(error = %err, "Connect failed");
            let _ = waiter.reply.send(Err(err));
        }
    }

    /// Resolve every armed capture from the current snapshot.
    fn flush_captures(&mut self, session: &ConnectionSession, fallback: Point) {
        for waiter in std::mem::take(&mut self.captures) {
            resolve_capture(session, fallback, waiter.region, waiter.sink);
        }
    }
}

fn resolve_capture(session: &ConnectionSession, fallback: Point, region: Region, sink: CaptureSink) {
    let image = compositor::capture(session, fallback, region);
    match sink {
        CaptureSink::Image(reply) => {
            let _ = reply.send(image);
        }
        CaptureSink::File { path, reply } => {
            let saved = match image {
                Ok(img) => match img.save(&path) {
                    Ok(()) => {
                        info!(path = %path.display(), "Capture saved");
                        true
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Saving capture failed");
                        false
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Nothing to save");
                    false
                }
            };
            let _ = reply.send(saved);
        }
    }
}
