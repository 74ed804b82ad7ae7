//! Tool dispatch: named arguments in, protocol content out.
//!
//! Failures of the tool itself are results, not protocol errors: text tools
//! answer `"Error: <reason>"`, boolean tools answer `"false"`. Only an
//! unknown tool or unusable arguments produce a [`ToolError`].

use std::io::Cursor;
use std::time::Duration;

use base64::Engine as _;
use image::{ImageFormat, RgbaImage};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use vncpilot_core::{EngineHandle, InputAction, MouseButton, Point, Region, Result, parse_keysym};

use crate::protocol::Content;

/// Every tool this server answers, in listing order.
pub const TOOLS: [&str; 27] = [
    "connect",
    "disconnect",
    "screenshot",
    "save",
    "status",
    "mouseMove",
    "mouseClick",
    "doubleClick",
    "mousePress",
    "mouseRelease",
    "longPress",
    "dragAndDrop",
    "sendKey",
    "sendText",
    "setPreview",
    "setInteractive",
    "setStaysOnTop",
    "setPreviewTitle",
    "setMacroDir",
    "createMacro",
    "addMacroStep",
    "playMacro",
    "listMacros",
    "getMacro",
    "deleteMacro",
    "startRecording",
    "stopRecording",
];

pub const DEFAULT_PORT: i64 = 5900;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument {name}: expected {expected}")]
    InvalidArgument {
        name: &'static str,
        expected: &'static str,
    },
}

// ── Arguments ────────────────────────────────────────────────────

struct Args<'a>(&'a Map<String, Value>);

/// `3.0` is 3; `3.5` and anything past the `i64` range are not integers.
fn whole_number(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

impl Args<'_> {
    fn get(&self, name: &'static str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    fn int_or(&self, name: &'static str, default: i64) -> std::result::Result<i64, ToolError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_f64().and_then(whole_number))
                .ok_or(ToolError::InvalidArgument {
                    name,
                    expected: "an integer",
                }),
        }
    }

    fn coord(&self, name: &'static str, default: i64) -> std::result::Result<i32, ToolError> {
        i32::try_from(self.int_or(name, default)?).map_err(|_| ToolError::InvalidArgument {
            name,
            expected: "a 32-bit integer",
        })
    }

    fn point(&self) -> std::result::Result<Point, ToolError> {
        Ok(Point::new(self.coord("x", 0)?, self.coord("y", 0)?))
    }

    fn region(&self) -> std::result::Result<Region, ToolError> {
        Ok(Region::new(
            self.coord("x", 0)?,
            self.coord("y", 0)?,
            self.coord("width", -1)?,
            self.coord("height", -1)?,
        ))
    }

    fn string(&self, name: &'static str) -> std::result::Result<String, ToolError> {
        self.string_opt(name)?.ok_or(ToolError::MissingArgument(name))
    }

    fn string_or(&self, name: &'static str, default: &str) -> std::result::Result<String, ToolError> {
        Ok(self.string_opt(name)?.unwrap_or_else(|| default.to_string()))
    }

    fn string_opt(&self, name: &'static str) -> std::result::Result<Option<String>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ToolError::InvalidArgument {
                name,
                expected: "a string",
            }),
        }
    }

    fn flag(&self, name: &'static str) -> std::result::Result<bool, ToolError> {
        self.flag_opt(name)?.ok_or(ToolError::MissingArgument(name))
    }

    fn flag_opt(&self, name: &'static str) -> std::result::Result<Option<bool>, ToolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ToolError::InvalidArgument {
                name,
                expected: "a boolean",
            }),
        }
    }

    fn keysym(&self) -> std::result::Result<u32, ToolError> {
        let invalid = ToolError::InvalidArgument {
            name: "keysym",
            expected: "a keysym number or numeric string",
        };
        match self.get("keysym") {
            None => Err(ToolError::MissingArgument("keysym")),
            Some(Value::String(s)) => parse_keysym(s).ok_or(invalid),
            Some(v) => v.as_u64().and_then(|k| u32::try_from(k).ok()).ok_or(invalid),
        }
    }

    /// Step parameters: a JSON string, or an inline object.
    fn params(&self) -> std::result::Result<String, ToolError> {
        match self.get("params") {
            None => Ok("{}".to_string()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v) => Ok(v.to_string()),
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────

fn text(result: Result<String>) -> Vec<Content> {
    vec![Content::text(match result {
        Ok(s) => s,
        Err(e) => format!("Error: {e}"),
    })]
}

fn boolean(tool: &str, result: Result<bool>) -> Vec<Content> {
    let ok = result.unwrap_or_else(|e| {
        warn!(tool, error = %e, "Tool failed");
        false
    });
    vec![Content::text(if ok { "true" } else { "false" })]
}

fn void(result: Result<()>) -> Vec<Content> {
    match result {
        Ok(()) => Vec::new(),
        Err(e) => vec![Content::text(format!("Error: {e}"))],
    }
}

/// PNG bytes of `image`, base64-encoded.
pub fn encode_png(image: &RgbaImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

// ── Dispatch ─────────────────────────────────────────────────────

/// Run one tool call against the engine.
pub async fn call(
    handle: &EngineHandle,
    tool: &str,
    arguments: &Map<String, Value>,
) -> std::result::Result<Vec<Content>, ToolError> {
    let args = Args(arguments);
    debug!(tool, "Tool call");

    let content = match tool {
        "tools/list" => TOOLS.iter().map(|name| Content::text(*name)).collect(),

        // ── Connection ───────────────────────────────────────────
        "connect" => {
            let host = args.string("host")?;
            let port = u16::try_from(args.int_or("port", DEFAULT_PORT)?).map_err(|_| {
                ToolError::InvalidArgument {
                    name: "port",
                    expected: "a TCP port",
                }
            })?;
            let password = args.string_opt("password")?;
            text(handle.connect(&host, port, password.as_deref()).await)
        }
        "disconnect" => void(handle.disconnect().await),
        "status" => text(handle.status().await),

        // ── Capture ──────────────────────────────────────────────
        "screenshot" => {
            let region = args.region()?;
            match handle
                .screenshot(region)
                .await
                .and_then(|image| encode_png(&image))
            {
                Ok(data) => vec![Content::png(data)],
                Err(e) => text(Err(e)),
            }
        }
        "save" => {
            let path = args.string("filePath")?;
            let region = args.region()?;
            boolean(tool, handle.save(path, region).await)
        }

        // ── Input ────────────────────────────────────────────────
        "mouseMove" => {
            let at = args.point()?;
            let button = MouseButton::held_code(args.int_or("button", 0)?);
            void(handle.perform(InputAction::MouseMove { at, button }).await)
        }
        "mouseClick" | "doubleClick" | "mousePress" | "mouseRelease" | "dragAndDrop" => {
            let at = args.point()?;
            let button = MouseButton::press_code(args.int_or("button", 1)?);
            let action = match tool {
                "mouseClick" => InputAction::MouseClick { at, button },
                "doubleClick" => InputAction::DoubleClick { at, button },
                "mousePress" => InputAction::MousePress { at, button },
                "mouseRelease" => InputAction::MouseRelease { at, button },
                _ => InputAction::DragAndDrop { to: at, button },
            };
            void(handle.perform(action).await)
        }
        "longPress" => {
            let at = args.point()?;
            let hold = Duration::from_millis(args.int_or("duration", 1000)?.max(0) as u64);
            let button = MouseButton::press_code(args.int_or("button", 1)?);
            void(handle.long_press(at, button, hold).await)
        }
        "sendKey" => {
            let keysym = args.keysym()?;
            let down = args.flag_opt("down")?.unwrap_or(false);
            void(handle.send_key(keysym, down).await)
        }
        "sendText" => void(handle.send_text(&args.string("text")?).await),

        // ── Preview ──────────────────────────────────────────────
        "setPreview" => void(handle.set_preview(args.flag("visible")?).await),
        "setInteractive" => void(handle.set_interactive(args.flag("enabled")?).await),
        "setStaysOnTop" => void(handle.set_stays_on_top(args.flag("enabled")?).await),
        "setPreviewTitle" => void(handle.set_preview_title(&args.string("title")?).await),

        // ── Macros ───────────────────────────────────────────────
        "setMacroDir" => void(handle.set_macro_dir(args.string("path")?).await),
        "createMacro" => {
            let name = args.string("name")?;
            let description = args.string_or("description", "")?;
            boolean(tool, handle.create_macro(&name, &description).await.map(|()| true))
        }
        "addMacroStep" => {
            let name = args.string("name")?;
            let action = args.string("action")?;
            let params = args.params()?;
            let delay = args.int_or("delay", 0)?;
            boolean(
                tool,
                handle
                    .add_macro_step(&name, &action, &params, delay)
                    .await
                    .map(|()| true),
            )
        }
        "playMacro" => {
            let name = args.string("name")?;
            let factor = args.int_or("speedFactor", vncpilot_core::macros::DEFAULT_SPEED_FACTOR)?;
            text(handle.play_macro(&name, factor).await)
        }
        "listMacros" => match handle.list_macros().await {
            Ok(names) => names.into_iter().map(Content::text).collect(),
            Err(e) => text(Err(e)),
        },
        "getMacro" => {
            let name = args.string("name")?;
            text(handle.get_macro(&name).await.map(Option::unwrap_or_default))
        }
        "deleteMacro" => boolean(tool, handle.delete_macro(&args.string("name")?).await),

        // ── Recording ────────────────────────────────────────────
        "startRecording" => {
            let path = args.string("filePath")?;
            let fps = args.int_or("fps", vncpilot_core::recording::DEFAULT_FPS)?;
            boolean(tool, handle.start_recording(path, fps).await.map(|()| true))
        }
        "stopRecording" => boolean(tool, handle.stop_recording().await.map(|()| true)),

        other => return Err(ToolError::UnknownTool(other.to_string())),
    };
    Ok(content)
}
