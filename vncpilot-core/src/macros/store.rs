//! Durable macro records, one pretty-printed JSON file per macro.
//!
//! Every mutation is a whole-file read-modify-write. Concurrent writers to
//! the same directory are not supported.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::action::MacroAction;
use crate::error::{PilotError, Result};

const EXTENSION: &str = "json";

// ── Records ──────────────────────────────────────────────────────

/// One stored macro.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroDefinition {
    pub name: String,
    pub description: String,
    /// Anything but an array reads as no steps.
    #[serde(deserialize_with = "lenient_steps")]
    pub steps: Vec<MacroStep>,
    /// Fields written by other tools, kept on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One step: wait `delay` (scaled at playback), then perform `action`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroStep {
    pub action: String,
    pub params: Value,
    /// Fractional delays are truncated; non-numbers read as 0.
    #[serde(deserialize_with = "lenient_delay")]
    pub delay: i64,
}

impl MacroStep {
    /// The step parameters, or an empty map when they are not an object.
    pub fn params(&self) -> Map<String, Value> {
        self.params.as_object().cloned().unwrap_or_default()
    }
}

fn lenient_steps<'de, D>(deserializer: D) -> std::result::Result<Vec<MacroStep>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value::<MacroStep>(item).unwrap_or_default())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_delay<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        _ => 0,
    })
}

// ── MacroStore ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MacroStore {
    root: Option<PathBuf>,
}

impl MacroStore {
    /// A store with no directory; every operation reports it as unset.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new();
        store.set_dir(path)?;
        Ok(store)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Point the store at `path`, creating the directory tree.
    pub fn set_dir(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        info!(dir = %path.display(), "Macro directory set");
        self.root = Some(path);
        Ok(())
    }

    fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(PilotError::MacroDirNotSet)
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        let root = self.root()?;
        validate_name(name)?;
        Ok(root.join(format!("{name}.{EXTENSION}")))
    }

    /// Create an empty macro.
    pub fn create(&self, name: &str, description: &str) -> Result<()> {
        let path = self.record_path(name)?;
        let record = MacroDefinition {
            name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        };
        let text = serde_json::to_string_pretty(&record)?;

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PilotError::MacroExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(text.as_bytes())?;
        info!(name, "Macro created");
        Ok(())
    }

    /// Append a step. On any failure the record is left untouched.
    pub fn add_step(&self, name: &str, action: &str, params_json: &str, delay: i64) -> Result<()> {
        self.root()?;
        let action: MacroAction = action.parse()?;
        let mut record = self.load(name)?;

        let params: Value = serde_json::from_str(params_json)
            .map_err(|e| PilotError::InvalidParams(e.to_string()))?;
        if delay < 0 {
            return Err(PilotError::NegativeDelay(delay));
        }
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        action.to_input(&params)?;

        record.steps.push(MacroStep {
            action: action.as_str().to_string(),
            params: Value::Object(params),
            delay,
        });
        self.write(name, &record)?;
        debug!(name, %action, delay, steps = record.steps.len(), "Macro step added");
        Ok(())
    }

    /// Parse a record.
    pub fn load(&self, name: &str) -> Result<MacroDefinition> {
        let path = self.record_path(name)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PilotError::MacroNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|_| PilotError::InvalidMacro)
    }

    /// The record text exactly as stored, if there is one.
    pub fn get(&self, name: &str) -> Option<String> {
        let path = self.record_path(name).ok()?;
        fs::read_to_string(path).ok()
    }

    /// Names of all records, sorted.
    pub fn list(&self) -> Vec<String> {
        let Some(root) = self.root.as_deref() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == EXTENSION))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Remove a record. `false` when there was nothing to remove.
    pub fn delete(&self, name: &str) -> bool {
        let Ok(path) = self.record_path(name) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(name, "Macro deleted");
                true
            }
            Err(_) => false,
        }
    }

    /// Replace the record via a sibling temp file and a rename.
    fn write(&self, name: &str, record: &MacroDefinition) -> Result<()> {
        let path = self.record_path(name)?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Names become file stems: no separators, no control characters, no
/// leading dot.
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.len() > 200
        || name.starts_with('.')
        || name
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'));
    if bad {
        return Err(PilotError::InvalidMacroName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MacroStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MacroStore::with_dir(dir.path().join("macros")).unwrap();
        (dir, store)
    }

    #[test]
    fn unset_root() {
        let store = MacroStore::new();
        assert!(matches!(store.create("a", ""), Err(PilotError::MacroDirNotSet)));
        assert!(matches!(
            store.add_step("a", "sendText", "{}", 0),
            Err(PilotError::MacroDirNotSet)
        ));
        assert!(store.list().is_empty());
        assert!(store.get("a").is_none());
        assert!(!store.delete("a"));
    }

    #[test]
    fn create_writes_empty_record() {
        let (_dir, store) = store();
        store.create("login", "log in").unwrap();

        let text = store.get("login").unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["name"], "login");
        assert_eq!(v["description"], "log in");
        assert_eq!(v["steps"], serde_json::json!([]));

        assert!(matches!(store.create("login", ""), Err(PilotError::MacroExists(_))));
    }

    #[test]
    fn add_step_round_trip() {
        let (_dir, store) = store();
        store.create("greet", "").unwrap();
        store.add_step("greet", "sendText", r#"{"text":"hi"}"#, 0).unwrap();

        let v: Value = serde_json::from_str(&store.get("greet").unwrap()).unwrap();
        assert_eq!(v["steps"][0]["action"], "sendText");
        assert_eq!(v["steps"][0]["params"]["text"], "hi");
        assert_eq!(v["steps"][0]["delay"], 0);
    }

    #[test]
    fn failed_add_leaves_record_unchanged() {
        let (_dir, store) = store();
        store.create("m", "").unwrap();
        let before = store.get("m").unwrap();

        assert!(matches!(
            store.add_step("m", "teleport", "{}", 0),
            Err(PilotError::UnknownAction(_))
        ));
        assert!(matches!(
            store.add_step("m", "sendText", "{not json", 0),
            Err(PilotError::InvalidParams(_))
        ));
        assert!(matches!(
            store.add_step("m", "sendText", "{}", -5),
            Err(PilotError::NegativeDelay(-5))
        ));
        assert!(matches!(
            store.add_step("m", "mouseClick", r#"{"x": 4294967296}"#, 0),
            Err(PilotError::InvalidParams(_))
        ));
        assert!(matches!(
            store.add_step("missing", "sendText", "{}", 0),
            Err(PilotError::MacroNotFound(_))
        ));
        assert_eq!(store.get("m").unwrap(), before);
    }

    #[test]
    fn hand_edited_records_are_read_leniently() {
        let (_dir, store) = store();
        let root = store.dir().unwrap().to_path_buf();
        fs::write(
            root.join("floaty.json"),
            r#"{"name":"floaty","steps":[{"action":"sendText","params":{"text":"a"},"delay":12.9}]}"#,
        )
        .unwrap();
        fs::write(root.join("flat.json"), r#"{"name":"flat","steps":"none"}"#).unwrap();

        let floaty = store.load("floaty").unwrap();
        assert_eq!(floaty.steps.len(), 1);
        assert_eq!(floaty.steps[0].delay, 12);

        let flat = store.load("flat").unwrap();
        assert!(flat.steps.is_empty());
        store.add_step("flat", "sendText", "{}", 1).unwrap();
        assert_eq!(store.load("flat").unwrap().steps.len(), 1);
    }

    #[test]
    fn non_object_params_are_stored_empty() {
        let (_dir, store) = store();
        store.create("m", "").unwrap();
        store.add_step("m", "mouseClick", "[1, 2]", 3).unwrap();
        let record = store.load("m").unwrap();
        assert_eq!(record.steps[0].params, Value::Object(Map::new()));
        assert_eq!(record.steps[0].delay, 3);
    }

    #[test]
    fn unreadable_record_is_invalid() {
        let (_dir, store) = store();
        fs::write(store.dir().unwrap().join("broken.json"), "{oops").unwrap();
        assert!(matches!(store.load("broken"), Err(PilotError::InvalidMacro)));
        assert!(matches!(
            store.add_step("broken", "sendText", "{}", 0),
            Err(PilotError::InvalidMacro)
        ));
    }

    #[test]
    fn list_is_sorted_json_stems() {
        let (_dir, store) = store();
        store.create("zeta", "").unwrap();
        store.create("alpha", "").unwrap();
        fs::write(store.dir().unwrap().join("notes.txt"), "x").unwrap();
        assert_eq!(store.list(), vec!["alpha".to_string(), "zeta".to_string()]);

        assert!(store.delete("zeta"));
        assert!(!store.delete("zeta"));
        assert_eq!(store.list(), vec!["alpha".to_string()]);
    }

    #[test]
    fn unsafe_names_rejected() {
        let (_dir, store) = store();
        for name in ["", "../escape", "a/b", ".hidden", "tab\tname"] {
            assert!(
                matches!(store.create(name, ""), Err(PilotError::InvalidMacroName(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn unknown_fields_survive_rewrite() {
        let (_dir, store) = store();
        fs::write(
            store.dir().unwrap().join("ext.json"),
            r#"{"name":"ext","steps":[],"author":"ops"}"#,
        )
        .unwrap();
        store.add_step("ext", "sendKey", r#"{"keysym":65}"#, 1).unwrap();
        let v: Value = serde_json::from_str(&store.get("ext").unwrap()).unwrap();
        assert_eq!(v["author"], "ops");
        assert_eq!(v["steps"].as_array().unwrap().len(), 1);
    }
}
