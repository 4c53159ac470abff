//! Configuration for the recorder binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use framepipe_core::{EncoderCommand, EncoderPreset, FrameSize, RecorderConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderFileConfig {
    /// Encoder process settings.
    pub encoder: EncoderConfig,
    /// Render loop and pipeline tuning.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Encoder process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Executable name or path. Looked up in `PATH` when not a path.
    pub executable: String,
    /// Output file. The preset's suffix is added when it has no extension.
    pub output: PathBuf,
    /// Codec preset, e.g. "h264-default", "pro-res4444", "vp9-default".
    pub preset: EncoderPreset,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frames per second.
    pub fps: f64,
}

/// Render loop and pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Rate at which the synthetic renderer ticks.
    pub render_fps: f64,
    /// Stop after this many seconds. 0 records until Ctrl-C.
    pub duration_secs: f64,
    /// Base latency of a simulated readback in milliseconds.
    pub readback_latency_ms: u64,
    /// Fail every Nth simulated readback. 0 never fails.
    pub readback_failure_every: u64,
    /// Buffers allowed to wait for the encoder.
    pub transmit_queue_cap: usize,
    /// Readbacks allowed in flight before captures are dropped.
    pub max_outstanding: usize,
    /// Lagging ticks before the slow-renderer warning.
    pub drop_warning_threshold: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for EncoderConfig {
    fn default() -> Self {
        let cmd = EncoderCommand::default();
        Self {
            executable: cmd.executable,
            output: cmd.output,
            preset: cmd.preset,
            width: cmd.size.width,
            height: cmd.size.height,
            fps: cmd.frame_rate,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let recorder = RecorderConfig::default();
        Self {
            render_fps: 60.0,
            duration_secs: 10.0,
            readback_latency_ms: 20,
            readback_failure_every: 0,
            transmit_queue_cap: recorder.transmit_queue_cap,
            max_outstanding: recorder.max_outstanding,
            drop_warning_threshold: recorder.drop_warning_threshold,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RecorderFileConfig {
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

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into the pipeline's configuration, clamping values the
    /// encoder or the pacer cannot work with.
    pub fn to_recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            encoder: EncoderCommand {
                executable: self.encoder.executable.clone(),
                size: FrameSize::new(self.encoder.width.max(1), self.encoder.height.max(1)),
                frame_rate: self.encoder.fps.clamp(1.0, 240.0),
                preset: self.encoder.preset,
                output: self.encoder.output.clone(),
            },
            transmit_queue_cap: self.capture.transmit_queue_cap.max(1),
            max_outstanding: self.capture.max_outstanding.max(1),
            drop_warning_threshold: self.capture.drop_warning_threshold,
        }
    }

    pub fn render_fps(&self) -> f64 {
        self.capture.render_fps.clamp(1.0, 1000.0)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&RecorderFileConfig::default()).unwrap();
        assert!(text.contains("[encoder]"));
        assert!(text.contains("preset = \"h264-default\""));
        assert!(text.contains("transmit_queue_cap = 4"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: RecorderFileConfig = toml::from_str(
            r#"
            [encoder]
            preset = "pro-res4444"
            fps = 24.0

            [capture]
            max_outstanding = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.encoder.preset, EncoderPreset::ProRes4444);
        assert_eq!(cfg.encoder.width, 1920);
        assert_eq!(cfg.capture.max_outstanding, 3);
        assert_eq!(cfg.capture.transmit_queue_cap, 4);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn to_recorder_config_clamps() {
        let mut cfg = RecorderFileConfig::default();
        cfg.encoder.fps = 0.0;
        cfg.encoder.width = 0;
        cfg.capture.transmit_queue_cap = 0;
        let rc = cfg.to_recorder_config();
        assert_eq!(rc.encoder.frame_rate, 1.0);
        assert_eq!(rc.encoder.size.width, 1);
        assert_eq!(rc.transmit_queue_cap, 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = RecorderFileConfig::load(Path::new("/nonexistent/framepipe.toml"));
        assert_eq!(cfg.capture.render_fps, 60.0);
    }

    #[test]
    fn written_default_loads_back() {
        let path = std::env::temp_dir().join(format!(
            "framepipe-config-{}.toml",
            std::process::id()
        ));
        RecorderFileConfig::write_default(&path).unwrap();
        let cfg = RecorderFileConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.encoder.executable, "ffmpeg");
        assert_eq!(cfg.capture.max_outstanding, 6);
    }
}
