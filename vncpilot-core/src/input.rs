//! Translation of abstract input actions into RFB pointer and key events.
//!
//! [`ActionDispatcher`] is stateless apart from the shared pointer position,
//! which every pointer action and every server-reported cursor position
//! updates. Timed actions (long press, drag and drop) return a
//! [`FollowUp`] that the engine schedules; the dispatcher never sleeps.

use std::time::Duration;

use crate::session::ConnectionSession;
use crate::types::{ButtonMask, MouseButton, Point};

/// Wait between the press and the move of a drag.
pub const DRAG_PRESS_SETTLE: Duration = Duration::from_millis(100);
/// Wait between the move and the release of a drag.
pub const DRAG_MOVE_SETTLE: Duration = Duration::from_millis(50);
/// Hold time of a long press when none is given.
pub const DEFAULT_LONG_PRESS: Duration = Duration::from_millis(1000);

// ── Keysyms ──────────────────────────────────────────────────────

pub const XK_BACKSPACE: u32 = 0xff08;
pub const XK_TAB: u32 = 0xff09;
pub const XK_RETURN: u32 = 0xff0d;

/// X11 keysym for a typed character.
pub fn char_keysym(c: char) -> u32 {
    match c {
        '\n' | '\r' => XK_RETURN,
        '\t' => XK_TAB,
        '\u{8}' => XK_BACKSPACE,
        ' '..='~' | '\u{a0}'..='\u{ff}' => u32::from(c),
        _ => 0x0100_0000 | u32::from(c),
    }
}

/// Parse a keysym written as `0x`-hex, `0`-prefixed octal or decimal.
pub fn parse_keysym(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u32::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

// ── InputAction ──────────────────────────────────────────────────

/// One input action as issued by a tool call or a macro step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    MouseMove { at: Point, button: MouseButton },
    MouseClick { at: Point, button: MouseButton },
    DoubleClick { at: Point, button: MouseButton },
    MousePress { at: Point, button: MouseButton },
    MouseRelease { at: Point, button: MouseButton },
    LongPress {
        at: Point,
        button: MouseButton,
        hold: Duration,
    },
    DragAndDrop { to: Point, button: MouseButton },
    SendKey { keysym: u32, down: bool },
    SendText(String),
}

/// Deferred remainder of a timed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Release `button` after `delay` at whatever the position is then.
    Release { delay: Duration, button: MouseButton },
    /// Drag phase two: after `delay`, move to `to` with `button` held.
    DragMove {
        delay: Duration,
        to: Point,
        button: MouseButton,
    },
}

// ── ActionDispatcher ─────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ActionDispatcher {
    position: Point,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared pointer position.
    pub fn position(&self) -> Point {
        self.position
    }

    /// Adopt an externally reported cursor position.
    pub fn track(&mut self, at: Point) {
        self.position = at;
    }

    pub fn move_to(&mut self, session: &mut ConnectionSession, at: Point, button: MouseButton) {
        self.position = at;
        session.pointer(button.mask(), at);
    }

    pub fn press(&mut self, session: &mut ConnectionSession, at: Point, button: MouseButton) {
        self.position = at;
        session.pointer(button.mask(), at);
    }

    pub fn release(&mut self, session: &mut ConnectionSession, at: Point) {
        self.position = at;
        session.pointer(ButtonMask::empty(), at);
    }

    pub fn click(&mut self, session: &mut ConnectionSession, at: Point, button: MouseButton) {
        self.press(session, at, button);
        self.release(session, at);
    }

    pub fn double_click(&mut self, session: &mut ConnectionSession, at: Point, button: MouseButton) {
        self.click(session, at, button);
        self.click(session, at, button);
    }

    pub fn key(&mut self, session: &mut ConnectionSession, keysym: u32, down: bool) {
        session.key(keysym, down);
    }

    pub fn text(&mut self, session: &mut ConnectionSession, text: &str) {
        for c in text.chars() {
            let keysym = char_keysym(c);
            session.key(keysym, true);
            session.key(keysym, false);
        }
    }

    /// Release at the current position; the second half of a long press.
    pub fn release_here(&mut self, session: &mut ConnectionSession) {
        let at = self.position;
        self.release(session, at);
    }

    /// Drag phase three: release at the target.
    pub fn drop_at(&mut self, session: &mut ConnectionSession, to: Point) {
        self.release(session, to);
    }

    /// Run the immediate part of `action`.
    pub fn perform(&mut self, session: &mut ConnectionSession, action: InputAction) -> Option<FollowUp> {
        match action {
            InputAction::MouseMove { at, button } => self.move_to(session, at, button),
            InputAction::MouseClick { at, button } => self.click(session, at, button),
            InputAction::DoubleClick { at, button } => self.double_click(session, at, button),
            InputAction::MousePress { at, button } => self.press(session, at, button),
            InputAction::MouseRelease { at, .. } => self.release(session, at),
            InputAction::LongPress { at, button, hold } => {
                self.press(session, at, button);
                return Some(FollowUp::Release {
                    delay: hold,
                    button,
                });
            }
            InputAction::DragAndDrop { to, button } => {
                let from = self.position;
                self.press(session, from, button);
                return Some(FollowUp::DragMove {
                    delay: DRAG_PRESS_SETTLE,
                    to,
                    button,
                });
            }
            InputAction::SendKey { keysym, down } => self.key(session, keysym, down),
            InputAction::SendText(text) => self.text(session, &text),
        }
        None
    }
}
