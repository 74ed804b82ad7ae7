//! The async front door to a running [`super::Engine`].
//!
//! Every method sends one [`Command`] carrying a `oneshot` reply slot and
//! awaits the answer. Handles are cheap to clone; the engine stops once the
//! last one is dropped.

use std::path::PathBuf;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::input::InputAction;
use crate::types::{MouseButton, Point, Region};

/// A request for the engine loop.
#[derive(Debug)]
pub enum Command {
    // ── Connection ───────────────────────────────────────────────
    Connect {
        host: String,
        port: u16,
        password: Option<String>,
        reply: oneshot::Sender<Result<String>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<String>,
    },

    // ── Capture ──────────────────────────────────────────────────
    Screenshot {
        region: Region,
        reply: oneshot::Sender<Result<RgbaImage>>,
    },
    Save {
        path: PathBuf,
        region: Region,
        reply: oneshot::Sender<bool>,
    },

    // ── Input ────────────────────────────────────────────────────
    /// Answered once the action's immediate part is done; for a drag,
    /// once the button is released.
    Input {
        action: InputAction,
        reply: oneshot::Sender<()>,
    },

    // ── Preview ──────────────────────────────────────────────────
    SetPreview {
        visible: bool,
        reply: oneshot::Sender<()>,
    },
    SetInteractive {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    SetStaysOnTop {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    SetPreviewTitle {
        title: String,
        reply: oneshot::Sender<()>,
    },

    // ── Macros ───────────────────────────────────────────────────
    SetMacroDir {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateMacro {
        name: String,
        description: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AddMacroStep {
        name: String,
        action: String,
        params: String,
        delay: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    PlayMacro {
        name: String,
        speed_factor: i64,
        reply: oneshot::Sender<Result<String>>,
    },
    ListMacros {
        reply: oneshot::Sender<Vec<String>>,
    },
    GetMacro {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    DeleteMacro {
        name: String,
        reply: oneshot::Sender<bool>,
    },

    // ── Recording ────────────────────────────────────────────────
    StartRecording {
        path: PathBuf,
        fps: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<()>>,
    },
}

#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// `true` once the engine loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await?;
        Ok(rx.await?)
    }

    // ── Connection ───────────────────────────────────────────────

    /// Resolves with the status line once the first framebuffer update
    /// has arrived.
    pub async fn connect(&self, host: &str, port: u16, password: Option<&str>) -> Result<String> {
        self.request(|reply| Command::Connect {
            host: host.to_string(),
            port,
            password: password.map(str::to_string),
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn status(&self) -> Result<String> {
        self.request(|reply| Command::Status { reply }).await
    }

    // ── Capture ──────────────────────────────────────────────────

    pub async fn screenshot(&self, region: Region) -> Result<RgbaImage> {
        self.request(|reply| Command::Screenshot { region, reply })
            .await?
    }

    pub async fn save(&self, path: impl Into<PathBuf>, region: Region) -> Result<bool> {
        let path = path.into();
        self.request(|reply| Command::Save { path, region, reply })
            .await
    }

    // ── Input ────────────────────────────────────────────────────

    pub async fn perform(&self, action: InputAction) -> Result<()> {
        self.request(|reply| Command::Input { action, reply }).await
    }

    pub async fn mouse_move(&self, at: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::MouseMove { at, button }).await
    }

    pub async fn mouse_click(&self, at: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::MouseClick { at, button }).await
    }

    pub async fn double_click(&self, at: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::DoubleClick { at, button }).await
    }

    pub async fn mouse_press(&self, at: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::MousePress { at, button }).await
    }

    pub async fn mouse_release(&self, at: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::MouseRelease { at, button }).await
    }

    /// Returns after the press; the release follows `hold` later.
    pub async fn long_press(&self, at: Point, button: MouseButton, hold: Duration) -> Result<()> {
        self.perform(InputAction::LongPress { at, button, hold }).await
    }

    /// Returns after the drop.
    pub async fn drag_and_drop(&self, to: Point, button: MouseButton) -> Result<()> {
        self.perform(InputAction::DragAndDrop { to, button }).await
    }

    pub async fn send_key(&self, keysym: u32, down: bool) -> Result<()> {
        self.perform(InputAction::SendKey { keysym, down }).await
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.perform(InputAction::SendText(text.to_string())).await
    }

    // ── Preview ──────────────────────────────────────────────────

    pub async fn set_preview(&self, visible: bool) -> Result<()> {
        self.request(|reply| Command::SetPreview { visible, reply }).await
    }

    pub async fn set_interactive(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetInteractive { enabled, reply })
            .await
    }

    pub async fn set_stays_on_top(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetStaysOnTop { enabled, reply })
            .await
    }

    pub async fn set_preview_title(&self, title: &str) -> Result<()> {
        self.request(|reply| Command::SetPreviewTitle {
            title: title.to_string(),
            reply,
        })
        .await
    }

    // ── Macros ───────────────────────────────────────────────────

    pub async fn set_macro_dir(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|reply| Command::SetMacroDir { path, reply })
            .await?
    }

    pub async fn create_macro(&self, name: &str, description: &str) -> Result<()> {
        self.request(|reply| Command::CreateMacro {
            name: name.to_string(),
            description: description.to_string(),
            reply,
        })
        .await?
    }

    pub async fn add_macro_step(&self, name: &str, action: &str, params: &str, delay: i64) -> Result<()> {
        self.request(|reply| Command::AddMacroStep {
            name: name.to_string(),
            action: action.to_string(),
            params: params.to_string(),
            delay,
            reply,
        })
        .await?
    }

    /// Resolves once every step has run.
    pub async fn play_macro(&self, name: &str, speed_factor: i64) -> Result<String> {
        self.request(|reply| Command::PlayMacro {
            name: name.to_string(),
            speed_factor,
            reply,
        })
        .await?
    }

    pub async fn list_macros(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::ListMacros { reply }).await
    }

    pub async fn get_macro(&self, name: &str) -> Result<Option<String>> {
        self.request(|reply| Command::GetMacro {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn delete_macro(&self, name: &str) -> Result<bool> {
        self.request(|reply| Command::DeleteMacro {
            name: name.to_string(),
            reply,
        })
        .await
    }

    // ── Recording ────────────────────────────────────────────────

    pub async fn start_recording(&self, path: impl Into<PathBuf>, fps: i64) -> Result<()> {
        let path = path.into();
        self.request(|reply| Command::StartRecording { path, fps, reply })
            .await?
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.request(|reply| Command::StopRecording { reply }).await?
    }
}
