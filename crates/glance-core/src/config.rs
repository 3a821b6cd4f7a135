use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::GlanceError;

/// Environment variable pointing at an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "GLANCE_CONFIG";

// MARK: - BackendKind

/// Which platform capture implementation drives the streams.
///
/// Builds without the `xcap` feature fall back to `Virtual` at start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process displays rendering a test pattern.
    Virtual,
    /// Real monitors via the `xcap` crate.
    #[default]
    Xcap,
}

impl std::str::FromStr for BackendKind {
    type Err = GlanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "virtual" => Ok(Self::Virtual),
            "xcap" | "native" => Ok(Self::Xcap),
            other => Err(GlanceError::ConfigurationInvalid {
                reason: format!("unknown capture backend '{other}'"),
            }),
        }
    }
}

// MARK: - CaptureSettings

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub backend: BackendKind,
    #[serde(alias = "targetFps")]
    pub target_fps: u32,
    #[serde(alias = "startTimeoutMs")]
    pub start_timeout_ms: u64,
    #[serde(alias = "stopTimeoutMs")]
    pub stop_timeout_ms: u64,
    /// Switch to the first capturable display when the requested one vanished.
    #[serde(alias = "fallbackOnUnavailable")]
    pub fallback_on_unavailable: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            target_fps: 30,
            start_timeout_ms: 5_000,
            stop_timeout_ms: 2_000,
            fallback_on_unavailable: false,
        }
    }
}

impl CaptureSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.target_fps.max(1) as u64)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

// MARK: - PreviewSettings

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub title: String,
    pub width: f32,
    pub height: f32,
    #[serde(alias = "alwaysOnTop")]
    pub always_on_top: bool,
    #[serde(alias = "startVisible")]
    pub start_visible: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            title: "Glance — Preview".into(),
            width: 900.0,
            height: 500.0,
            always_on_top: true,
            start_visible: true,
        }
    }
}

// MARK: - GlanceConfig

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlanceConfig {
    pub capture: CaptureSettings,
    pub preview: PreviewSettings,
}

impl GlanceConfig {
    /// Defaults, then `$GLANCE_CONFIG` (if set), then `GLANCE_*` overrides.
    pub fn load() -> Result<Self, GlanceError> {
        let mut cfg = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env_with(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, GlanceError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    /// Applies `GLANCE_BACKEND`, `GLANCE_FPS` and `GLANCE_START_TIMEOUT_MS`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), GlanceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("GLANCE_BACKEND") {
            self.capture.backend = backend.parse()?;
        }
        if let Some(fps) = lookup("GLANCE_FPS") {
            match fps.trim().parse::<u32>() {
                Ok(v) => self.capture.target_fps = v.clamp(1, 120),
                Err(_) => warn!("Ignoring GLANCE_FPS={fps:?}: not a number"),
            }
        }
        if let Some(ms) = lookup("GLANCE_START_TIMEOUT_MS") {
            match ms.trim().parse::<u64>() {
                Ok(v) => self.capture.start_timeout_ms = v,
                Err(_) => warn!("Ignoring GLANCE_START_TIMEOUT_MS={ms:?}: not a number"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), GlanceError> {
        let invalid = |reason: &str| GlanceError::ConfigurationInvalid { reason: reason.into() };
        if self.capture.target_fps == 0 {
            return Err(invalid("capture.targetFps must be at least 1"));
        }
        if self.capture.start_timeout_ms == 0 || self.capture.stop_timeout_ms == 0 {
            return Err(invalid("capture timeouts must be non-zero"));
        }
        if self.preview.width < 1.0 || self.preview.height < 1.0 {
            return Err(invalid("preview size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{
            "capture": {
                "backend": "virtual",
                "targetFps": 60,
                "startTimeoutMs": 1500,
                "fallbackOnUnavailable": true
            },
            "preview": { "alwaysOnTop": false, "width": 640 }
        }"#;

        let cfg: GlanceConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.capture.target_fps, 60);
        assert_eq!(cfg.capture.start_timeout_ms, 1500);
        assert_eq!(cfg.capture.stop_timeout_ms, 2_000);
        assert!(cfg.capture.fallback_on_unavailable);
        assert!(!cfg.preview.always_on_top);
        assert_eq!(cfg.preview.width, 640.0);
        assert_eq!(cfg.preview.height, 500.0);
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let json = r#"{
            "capture": { "target_fps": 24, "stop_timeout_ms": 750 },
            "preview": { "start_visible": false }
        }"#;

        let cfg: GlanceConfig = serde_json::from_str(json).expect("valid snake_case config");
        assert_eq!(cfg.capture.target_fps, 24);
        assert_eq!(cfg.capture.stop_timeout_ms, 750);
        assert!(!cfg.preview.start_visible);
    }

    #[test]
    fn env_overrides_apply_and_clamp() {
        let mut cfg = GlanceConfig::default();
        cfg.apply_env_with(|key| match key {
            "GLANCE_BACKEND" => Some("Virtual".into()),
            "GLANCE_FPS" => Some("500".into()),
            "GLANCE_START_TIMEOUT_MS" => Some("oops".into()),
            _ => None,
        })
        .expect("overrides apply");

        assert_eq!(cfg.capture.backend, BackendKind::Virtual);
        assert_eq!(cfg.capture.target_fps, 120);
        assert_eq!(cfg.capture.start_timeout_ms, 5_000);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cfg = GlanceConfig::default();
        let err = cfg
            .apply_env_with(|key| (key == "GLANCE_BACKEND").then(|| "vnc".to_string()))
            .unwrap_err();
        assert!(matches!(err, GlanceError::ConfigurationInvalid { .. }));
    }

    #[test]
    fn validate_rejects_zero_fps() {
        let mut cfg = GlanceConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.capture.target_fps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn frame_interval_follows_fps() {
        let settings = CaptureSettings { target_fps: 50, ..Default::default() };
        assert_eq!(settings.frame_interval(), Duration::from_millis(20));
    }
}
