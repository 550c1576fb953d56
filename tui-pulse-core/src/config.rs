//! Runtime configuration loaded from JSON
//!
//! Every field has a default, so `{}` is a valid config file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::BusConfig;
use crate::error::ConfigError;

/// Lowest accepted frame rate.
pub const MIN_FPS: u32 = 1;
/// Highest accepted frame rate.
pub const MAX_FPS: u32 = 120;

/// Clamp a requested frame rate into `MIN_FPS..=MAX_FPS`.
pub fn clamp_fps(fps: u32) -> u32 {
    fps.clamp(MIN_FPS, MAX_FPS)
}

/// Top-level runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Frames per second, clamped to 1..=120 when applied
    pub target_fps: u32,
    /// How long a trailing ESC waits for the rest of a sequence
    pub escape_timeout_ms: u64,
    /// Whether the loop should try to enter raw mode
    pub raw_mode: bool,
    pub bus: BusConfig,
    /// Command name to binding patterns, e.g. `"quit": ["q", "ctrl+q"]`
    pub keymap: BTreeMap<String, Vec<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            escape_timeout_ms: 50,
            raw_mode: true,
            bus: BusConfig::default(),
            keymap: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        debug!(path = %path.display(), "Loaded runtime config");
        Ok(config)
    }

    /// Reject values no component can work with. Out-of-range frame rates
    /// are clamped rather than rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "bus.batch_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "bus.queue_capacity",
                message: "must be at least 1".to_string(),
            });
        }
        if let Some((command, _)) = self
            .keymap
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.trim().is_empty()))
        {
            return Err(ConfigError::Invalid {
                field: "keymap",
                message: format!("empty binding pattern for command '{}'", command),
            });
        }
        Ok(())
    }

    /// Frame rate after clamping.
    pub fn effective_fps(&self) -> u32 {
        clamp_fps(self.target_fps)
    }

    pub fn escape_timeout(&self) -> Duration {
        Duration::from_millis(self.escape_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.bus.queue_capacity, 1000);
        assert_eq!(config.bus.history_limit, 500);
        assert_eq!(config.escape_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_override() {
        let config = RuntimeConfig::from_json_str(
            r#"{ "target_fps": 30, "bus": { "batch_size": 4 }, "keymap": { "quit": ["q"] } }"#,
        )
        .unwrap();
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.bus.batch_size, 4);
        assert_eq!(config.bus.queue_capacity, 1000);
        assert_eq!(config.keymap["quit"], vec!["q".to_string()]);
    }

    #[test]
    fn test_fps_is_clamped() {
        let config = RuntimeConfig {
            target_fps: 500,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.effective_fps(), MAX_FPS);
        assert_eq!(clamp_fps(0), MIN_FPS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RuntimeConfig::from_json_str(r#"{ "bus": { "batch_size": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "bus.batch_size", .. }));

        let err = RuntimeConfig::from_json_str(r#"{ "keymap": { "quit": [" "] } }"#).unwrap_err();
        assert!(err.to_string().contains("quit"));

        let err = RuntimeConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RuntimeConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
