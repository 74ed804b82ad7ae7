//! Configuration for the vncpilot tool server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vncpilot_core::{EngineConfig, FfmpegOptions, TransportConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Macro storage.
    pub macros: MacrosConfig,
    /// Screen recording.
    pub recording: RecordingConfig,
    /// Live preview window.
    pub preview: PreviewConfig,
    /// VNC session.
    pub session: SessionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacrosConfig {
    /// Directory holding macro records. Empty until `setMacroDir`.
    pub dir: String,
}

/// Encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// ffmpeg executable name or path.
    pub ffmpeg: String,
    /// x264 preset: "ultrafast" … "veryslow".
    pub preset: String,
    /// x264 CRF quality (0-51).
    pub crf: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Initial window title.
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs go to stderr; stdout is
    /// reserved for tool responses either way.
    pub file: String,
}

impl LoggingConfig {
    pub fn log_file(&self) -> Option<&Path> {
        (!self.file.is_empty()).then(|| Path::new(&self.file))
    }
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for RecordingConfig {
    fn default() -> Self {
        let ffmpeg = FfmpegOptions::default();
        Self {
            ffmpeg: ffmpeg.program,
            preset: ffmpeg.preset,
            crf: ffmpeg.crf,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            title: vncpilot_core::engine::DEFAULT_PREVIEW_TITLE.into(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: vncpilot_core::rfb::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PilotConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        std::fs::write(path, Self::default_toml()?)
    }

    pub fn default_toml() -> std::io::Result<String> {
        toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            macro_dir: (!self.macros.dir.is_empty()).then(|| PathBuf::from(&self.macros.dir)),
            preview_title: self.preview.title.clone(),
            ..Default::default()
        }
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Some(Duration::from_millis(self.session.connect_timeout_ms.max(1))),
            ffmpeg: FfmpegOptions {
                program: self.recording.ffmpeg.clone(),
                preset: self.recording.preset.clone(),
                crf: self.recording.crf.min(51),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = PilotConfig::default_toml().unwrap();
        assert!(text.contains("[recording]"));
        assert!(text.contains("connect_timeout_ms"));
        assert!(text.contains("veryfast"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: PilotConfig = toml::from_str("[recording]\ncrf = 30\n").unwrap();
        assert_eq!(cfg.recording.crf, 30);
        assert_eq!(cfg.recording.ffmpeg, "ffmpeg");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.session.connect_timeout_ms, 10_000);
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PilotConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(cfg.preview.title, "vncpilot");

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "this is = = not toml").unwrap();
        assert_eq!(PilotConfig::load(&broken).recording.preset, "veryfast");
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vncpilot.toml");
        PilotConfig::write_default(&path).unwrap();
        let cfg = PilotConfig::load(&path);
        assert_eq!(cfg.recording.crf, 23);
    }

    #[test]
    fn log_file_is_optional() {
        let cfg = PilotConfig::default();
        assert_eq!(cfg.logging.log_file(), None);

        let cfg: PilotConfig =
            toml::from_str("[logging]\nlevel = \"debug\"\nfile = \"/var/log/vncpilot.log\"\n").unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.log_file(), Some(Path::new("/var/log/vncpilot.log")));
    }

    #[test]
    fn engine_config_from_sections() {
        let mut cfg = PilotConfig::default();
        assert_eq!(cfg.to_engine_config().macro_dir, None);

        cfg.macros.dir = "/tmp/macros".into();
        cfg.recording.crf = 99;
        assert_eq!(
            cfg.to_engine_config().macro_dir,
            Some(PathBuf::from("/tmp/macros"))
        );
        let transport = cfg.to_transport_config();
        assert_eq!(transport.ffmpeg.crf, 51);
        assert_eq!(transport.connect_timeout, Some(Duration::from_secs(10)));
    }
}
