//! Macro step actions and their parameter conventions.

use std::str::FromStr;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::PilotError;
use crate::input::{DEFAULT_LONG_PRESS, InputAction, parse_keysym};
use crate::types::{MouseButton, Point};

/// The actions a macro step may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroAction {
    MouseMove,
    MouseClick,
    DoubleClick,
    MousePress,
    MouseRelease,
    LongPress,
    DragAndDrop,
    SendKey,
    SendText,
}

impl MacroAction {
    pub const ALL: [MacroAction; 9] = [
        MacroAction::MouseMove,
        MacroAction::MouseClick,
        MacroAction::DoubleClick,
        MacroAction::MousePress,
        MacroAction::MouseRelease,
        MacroAction::LongPress,
        MacroAction::DragAndDrop,
        MacroAction::SendKey,
        MacroAction::SendText,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MacroAction::MouseMove => "mouseMove",
            MacroAction::MouseClick => "mouseClick",
            MacroAction::DoubleClick => "doubleClick",
            MacroAction::MousePress => "mousePress",
            MacroAction::MouseRelease => "mouseRelease",
            MacroAction::LongPress => "longPress",
            MacroAction::DragAndDrop => "dragAndDrop",
            MacroAction::SendKey => "sendKey",
            MacroAction::SendText => "sendText",
        }
    }

    /// Build the input action for a step with these `params`.
    ///
    /// Missing or mistyped parameters take their defaults: coordinates 0,
    /// button 0 for moves and 1 otherwise, duration 1000 ms, keysym 0,
    /// `down` false, empty text. Coordinates outside the 32-bit range are
    /// an error.
    pub fn to_input(self, params: &Map<String, Value>) -> Result<InputAction, PilotError> {
        let int = |key: &str, default: i64| params.get(key).and_then(Value::as_i64).unwrap_or(default);
        let coord = |key: &str| {
            let v = int(key, 0);
            i32::try_from(v).map_err(|_| PilotError::InvalidParams(format!("{key} out of range: {v}")))
        };
        let at = Point::new(coord("x")?, coord("y")?);
        let button = |default: i64| MouseButton::press_code(int("button", default));

        Ok(match self {
            MacroAction::MouseMove => InputAction::MouseMove {
                at,
                button: MouseButton::held_code(int("button", 0)),
            },
            MacroAction::MouseClick => InputAction::MouseClick { at, button: button(1) },
            MacroAction::DoubleClick => InputAction::DoubleClick { at, button: button(1) },
            MacroAction::MousePress => InputAction::MousePress { at, button: button(1) },
            MacroAction::MouseRelease => InputAction::MouseRelease { at, button: button(1) },
            MacroAction::LongPress => InputAction::LongPress {
                at,
                button: button(1),
                hold: params
                    .get("duration")
                    .and_then(Value::as_i64)
                    .map(|ms| Duration::from_millis(ms.max(0) as u64))
                    .unwrap_or(DEFAULT_LONG_PRESS),
            },
            MacroAction::DragAndDrop => InputAction::DragAndDrop { to: at, button: button(1) },
            MacroAction::SendKey => InputAction::SendKey {
                keysym: match params.get("keysym") {
                    Some(Value::String(s)) => parse_keysym(s).unwrap_or(0),
                    Some(v) => v.as_u64().and_then(|k| u32::try_from(k).ok()).unwrap_or(0),
                    None => 0,
                },
                down: params.get("down").and_then(Value::as_bool).unwrap_or(false),
            },
            MacroAction::SendText => InputAction::SendText(
                params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
        })
    }
}

impl FromStr for MacroAction {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacroAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| PilotError::UnknownAction(s.to_string()))
    }
}

impl std::fmt::Display for MacroAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
