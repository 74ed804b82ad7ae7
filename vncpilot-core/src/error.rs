//! Domain-specific error types for vncpilot.
//!
//! Every fallible operation returns `Result<T, PilotError>`. The `Display`
//! text of each variant is exactly what a tool caller sees, so the tool layer
//! can render a failure with `format!("Error: {e}")` without re-wording it.

use thiserror::Error;

/// The canonical error type for the orchestration engine.
#[derive(Debug, Error)]
pub enum PilotError {
    // ── Connection Errors ────────────────────────────────────────
    /// The transport reported an error; carries the transport's own text.
    #[error("{0}")]
    Transport(String),

    /// The transport closed before the first framebuffer update arrived.
    #[error("disconnected during handshake")]
    DisconnectedDuringHandshake,

    /// A second `connect` was issued while one is still in flight.
    #[error("connection attempt already in progress")]
    ConnectInProgress,

    /// The operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// The server sent something the RFB client cannot handle.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server only accepts VNC authentication and no password was given.
    #[error("server requires a password")]
    PasswordRequired,

    /// The server rejected the password.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // ── Capture Errors ───────────────────────────────────────────
    /// The snapshot is empty or the requested region cannot be extracted.
    #[error("no framebuffer available or region is out of bounds")]
    NoFramebuffer,

    // ── Macro Errors ─────────────────────────────────────────────
    /// Single-flight violation: a macro is already playing.
    #[error("another macro is already playing")]
    MacroPlaying,

    /// The macro store root has not been configured.
    #[error("macro directory not set")]
    MacroDirNotSet,

    /// No record exists under the given name.
    #[error("macro '{0}' not found")]
    MacroNotFound(String),

    /// A record with the given name already exists.
    #[error("macro '{0}' already exists")]
    MacroExists(String),

    /// The name cannot be used as a file stem.
    #[error("invalid macro name: {0:?}")]
    InvalidMacroName(String),

    /// The record on disk is not a valid macro document.
    #[error("invalid macro JSON")]
    InvalidMacro,

    /// The action is not one of the recognised macro actions.
    #[error("unknown macro action: {0}")]
    UnknownAction(String),

    /// The step parameters are not valid JSON.
    #[error("invalid step parameters: {0}")]
    InvalidParams(String),

    /// Step delays are waits and cannot be negative.
    #[error("step delay must be non-negative, got {0}")]
    NegativeDelay(i64),

    // ── Recording Errors ─────────────────────────────────────────
    /// `startRecording` while a recording is active.
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// `stopRecording` with nothing to stop.
    #[error("no recording in progress")]
    NotRecording,

    /// The video encoder failed to start, accept a frame or finish.
    #[error("encoder error: {0}")]
    Encoder(String),

    // ── Plumbing Errors ──────────────────────────────────────────
    /// Filesystem or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Still-image encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The engine loop has stopped and can no longer answer.
    #[error("engine is not running")]
    EngineClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PilotError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PilotError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PilotError::EngineClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for PilotError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        PilotError::EngineClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_messages() {
        assert_eq!(
            PilotError::NoFramebuffer.to_string(),
            "no framebuffer available or region is out of bounds"
        );
        assert_eq!(
            PilotError::MacroPlaying.to_string(),
            "another macro is already playing"
        );
        assert_eq!(
            PilotError::MacroNotFound("login".into()).to_string(),
            "macro 'login' not found"
        );
        assert_eq!(PilotError::InvalidMacro.to_string(), "invalid macro JSON");
    }

    #[test]
    fn transport_text_is_passed_through() {
        let e = PilotError::Transport("Connection refused (os error 111)".into());
        assert_eq!(format!("Error: {e}"), "Error: Connection refused (os error 111)");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: PilotError = io_err.into();
        assert!(matches!(e, PilotError::Io(_)));
    }
}
