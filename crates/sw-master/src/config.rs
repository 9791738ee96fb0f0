//! Render configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! frames_per_buffer = 512
//! sample_rate = 44100
//! channels = 2
//! ring_capacity = 4
//! handoff = "blocking"   # or "spin"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sw_audio::HandoffMode;
use sw_engine::StageConfig;
use sw_ir::MAX_CHANNELS;

/// Errors from loading or validating a [`RenderConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Audio dimensions and handoff settings of a renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub frames_per_buffer: u32,
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames queued between the render thread and the audio device.
    pub ring_capacity: usize,
    pub handoff: HandoffMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let stage = StageConfig::default();
        Self {
            frames_per_buffer: stage.frames_per_buffer,
            sample_rate: stage.sample_rate,
            channels: stage.channels,
            ring_capacity: 4,
            handoff: HandoffMode::Blocking,
        }
    }
}

impl RenderConfig {
    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded render config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_per_buffer == 0 || self.frames_per_buffer > u16::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "frames_per_buffer must be in 1..={}, got {}",
                u16::MAX,
                self.frames_per_buffer
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS as u32 {
            return Err(ConfigError::Invalid(format!(
                "channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::Invalid("ring_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Dimensions handed to every stage of the graph.
    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            frames_per_buffer: self.frames_per_buffer,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Wall-clock length of one frame, in seconds.
    pub fn frame_seconds(&self) -> f64 {
        self.frames_per_buffer as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RenderConfig::from_toml("").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.stage_config(), StageConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = RenderConfig::from_toml(
            r#"
            frames_per_buffer = 256
            channels = 1
            handoff = "spin"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_per_buffer, 256);
        assert_eq!(config.channels, 1);
        assert_eq!(config.handoff, HandoffMode::Spin);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.ring_capacity, 4);
    }

    #[test]
    fn unknown_keys_and_modes_are_rejected() {
        assert!(matches!(
            RenderConfig::from_toml("buffer = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml("handoff = \"eager\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        for text in [
            "channels = 0",
            "channels = 9",
            "frames_per_buffer = 0",
            "frames_per_buffer = 70000",
            "ring_capacity = 0",
        ] {
            assert!(
                matches!(RenderConfig::from_toml(text), Err(ConfigError::Invalid(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RenderConfig::load("/nonexistent/shaderwave.toml").unwrap_err();
        assert!(err.to_string().contains("shaderwave.toml"));
    }
}
