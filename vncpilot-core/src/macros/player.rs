//! Macro playback state: the single-flight token and the step iterator.
//!
//! The engine drives a [`Playback`] through its scheduler: wait the scaled
//! delay, run one step, yield once, repeat. The player never sleeps or
//! spawns on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use super::action::MacroAction;
use super::store::{MacroStep, MacroStore};
use crate::error::{PilotError, Result};
use crate::input::InputAction;

/// Playback speed when none is given; 100 means recorded speed.
pub const DEFAULT_SPEED_FACTOR: i64 = 100;

/// Reply slot of a `playMacro` call.
pub type PlayReply = oneshot::Sender<Result<String>>;

/// `delay * 100 / max(1, factor)` milliseconds, in integer arithmetic.
pub fn scaled_delay(delay: i64, factor: i64) -> Duration {
    let ms = delay.max(0).saturating_mul(100) / factor.max(1);
    Duration::from_millis(ms as u64)
}

/// Result text of a finished macro.
pub fn completion_message(steps: usize) -> String {
    format!("Macro completed: {steps} steps executed")
}

// ── MacroPlayer ──────────────────────────────────────────────────

/// Owner of the single-flight flag. At most one [`PlaybackToken`] exists
/// per player at any time.
#[derive(Debug, Clone, Default)]
pub struct MacroPlayer {
    playing: Arc<AtomicBool>,
}

impl MacroPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Take the token, or `None` when a macro is already playing.
    pub fn try_acquire(&self) -> Option<PlaybackToken> {
        self.playing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PlaybackToken {
                playing: Arc::clone(&self.playing),
            })
    }

    /// Check, load and prepare a macro for playback.
    ///
    /// Returns `Ok(None)` with the reply already answered when the macro
    /// has no steps.
    pub fn start(
        &self,
        store: &MacroStore,
        name: &str,
        speed_factor: i64,
        reply: PlayReply,
    ) -> Option<Playback> {
        let Some(token) = self.try_acquire() else {
            let _ = reply.send(Err(PilotError::MacroPlaying));
            return None;
        };

        let record = match store.load(name) {
            Ok(record) => record,
            Err(e) => {
                let _ = reply.send(Err(e));
                return None;
            }
        };
        if record.steps.is_empty() {
            let _ = reply.send(Ok(completion_message(0)));
            return None;
        }

        info!(name, steps = record.steps.len(), speed_factor, "Playing macro");
        Some(Playback {
            name: name.to_string(),
            total: record.steps.len(),
            steps: record.steps.into_iter(),
            factor: speed_factor.max(1),
            reply,
            _token: token,
        })
    }
}

/// Proof of exclusive playback. Dropping it frees the player.
#[derive(Debug)]
pub struct PlaybackToken {
    playing: Arc<AtomicBool>,
}

impl Drop for PlaybackToken {
    fn drop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

// ── Playback ─────────────────────────────────────────────────────

/// A macro in flight.
#[derive(Debug)]
pub struct Playback {
    name: String,
    total: usize,
    steps: std::vec::IntoIter<MacroStep>,
    factor: i64,
    reply: PlayReply,
    _token: PlaybackToken,
}

impl Playback {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps not yet taken.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    /// Scaled wait before the next step, if there is one.
    pub fn next_delay(&self) -> Option<Duration> {
        self.steps
            .as_slice()
            .first()
            .map(|step| scaled_delay(step.delay, self.factor))
    }

    /// Take the next step as an input action.
    ///
    /// `Some(None)` is a step whose action is not recognised or whose
    /// parameters cannot be used; it is skipped but still counts as executed.
    pub fn take_step(&mut self) -> Option<Option<InputAction>> {
        let step = self.steps.next()?;
        let input = step
            .action
            .parse::<MacroAction>()
            .and_then(|action| action.to_input(&step.params()));
        match input {
            Ok(input) => Some(Some(input)),
            Err(e) => {
                warn!(macro_name = %self.name, action = %step.action, error = %e, "Skipping macro step");
                Some(None)
            }
        }
    }

    /// Answer the caller and release the token.
    pub fn finish(self) {
        info!(name = %self.name, steps = self.total, "Macro completed");
        let _ = self.reply.send(Ok(completion_message(self.total)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MouseButton, Point};

    #[test]
    fn delay_scaling_is_integer() {
        assert_eq!(scaled_delay(10, 100), Duration::from_millis(10));
        assert_eq!(scaled_delay(10, 200), Duration::from_millis(5));
        assert_eq!(scaled_delay(7, 300), Duration::from_millis(2));
        assert_eq!(scaled_delay(10, 0), Duration::from_millis(1000));
        assert_eq!(scaled_delay(10, -50), Duration::from_millis(1000));
        assert_eq!(scaled_delay(-3, 100), Duration::ZERO);
    }

    #[test]
    fn token_is_single_flight() {
        let player = MacroPlayer::new();
        let token = player.try_acquire().unwrap();
        assert!(player.is_playing());
        assert!(player.try_acquire().is_none());
        drop(token);
        assert!(!player.is_playing());
        assert!(player.try_acquire().is_some());
    }

    #[test]
    fn empty_macro_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = MacroStore::with_dir(dir.path()).unwrap();
        store.create("empty", "").unwrap();

        let player = MacroPlayer::new();
        let (tx, mut rx) = oneshot::channel();
        assert!(player.start(&store, "empty", 100, tx).is_none());
        assert_eq!(rx.try_recv().unwrap().unwrap(), "Macro completed: 0 steps executed");
        assert!(!player.is_playing());
    }

    #[test]
    fn busy_check_comes_first() {
        let player = MacroPlayer::new();
        let _held = player.try_acquire().unwrap();
        let (tx, mut rx) = oneshot::channel();
        // Even with no directory configured, the busy error wins.
        assert!(player.start(&MacroStore::new(), "x", 100, tx).is_none());
        assert!(matches!(rx.try_recv().unwrap(), Err(PilotError::MacroPlaying)));
    }

    #[test]
    fn load_errors_are_reported() {
        let player = MacroPlayer::new();
        let (tx, mut rx) = oneshot::channel();
        player.start(&MacroStore::new(), "x", 100, tx);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err().to_string(),
            "macro directory not set"
        );

        let dir = tempfile::tempdir().unwrap();
        let store = MacroStore::with_dir(dir.path()).unwrap();
        let (tx, mut rx) = oneshot::channel();
        player.start(&store, "ghost", 100, tx);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err().to_string(),
            "macro 'ghost' not found"
        );
        assert!(!player.is_playing());
    }

    #[test]
    fn playback_walks_steps_and_counts_skipped_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = MacroStore::with_dir(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("m.json"),
            r#"{"name":"m","steps":[
                {"action":"mouseClick","params":{"x":1,"y":2},"delay":4},
                {"action":"wiggle","params":{},"delay":0},
                {"action":"mouseMove","params":{"x":9999999999},"delay":0}
            ]}"#,
        )
        .unwrap();

        let player = MacroPlayer::new();
        let (tx, mut rx) = oneshot::channel();
        let mut playback = player.start(&store, "m", 200, tx).unwrap();
        assert!(player.is_playing());

        assert_eq!(playback.next_delay(), Some(Duration::from_millis(2)));
        assert_eq!(
            playback.take_step(),
            Some(Some(InputAction::MouseClick {
                at: Point::new(1, 2),
                button: MouseButton::Left
            }))
        );
        assert_eq!(playback.next_delay(), Some(Duration::ZERO));
        assert_eq!(playback.take_step(), Some(None));
        // Coordinates that do not fit the screen space are skipped too.
        assert_eq!(playback.take_step(), Some(None));
        assert_eq!(playback.next_delay(), None);
        assert_eq!(playback.take_step(), None);

        playback.finish();
        assert_eq!(rx.try_recv().unwrap().unwrap(), "Macro completed: 3 steps executed");
        assert!(!player.is_playing());
    }
}
