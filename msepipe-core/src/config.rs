//! Centralized configuration for the append pipeline and seek coordinator.
//!
//! All tunable parameters live here instead of being scattered as literals.

use std::time::Duration;

use thiserror::Error;

/// Configuration for every msepipe component.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MseConfig {
    pub pipeline: PipelineConfig,
    pub seek: SeekConfig,
}

/// Append pipeline behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the handle → actor command channel
    pub command_channel_capacity: usize,
    /// Upper bound on processing-thread rendezvous waits (None = unbounded)
    pub rendezvous_timeout: Option<Duration>,
    /// Keep reporting every buffer departure instead of only the first
    pub diagnostics_logging: bool,
    /// Largest leading presentation gap stretched back to zero
    pub leading_gap_tolerance: Duration,
    /// Media types the pipeline links to a track
    pub supported_media_types: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_channel_capacity: 100,
            rendezvous_timeout: None,
            diagnostics_logging: false,
            leading_gap_tolerance: Duration::from_millis(100),
            supported_media_types: [
                "video/x-h264",
                "video/x-h265",
                "video/x-vp8",
                "video/x-vp9",
                "video/x-av1",
                "audio/mpeg",
                "audio/x-opus",
                "audio/x-vorbis",
                "audio/x-flac",
                "text/vtt",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Seek coordination behaviour.
#[derive(Debug, Clone)]
pub struct SeekConfig {
    /// How far ahead a seek may snap to reach buffered data
    pub snap_epsilon: Duration,
    /// Playback rate used for transport seeks
    pub default_rate: f64,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            snap_epsilon: Duration::from_millis(100),
            default_rate: 1.0,
        }
    }
}

/// Errors from strict configuration loading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

const RENDEZVOUS_TIMEOUT_MS: &str = "MSEPIPE_RENDEZVOUS_TIMEOUT_MS";
const DIAGNOSTICS: &str = "MSEPIPE_DIAGNOSTICS";
const LEADING_GAP_MS: &str = "MSEPIPE_LEADING_GAP_MS";
const SEEK_SNAP_MS: &str = "MSEPIPE_SEEK_SNAP_MS";
const COMMAND_CAPACITY: &str = "MSEPIPE_COMMAND_CAPACITY";

impl MseConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for key in [
            RENDEZVOUS_TIMEOUT_MS,
            DIAGNOSTICS,
            LEADING_GAP_MS,
            SEEK_SNAP_MS,
            COMMAND_CAPACITY,
        ] {
            if let Ok(value) = std::env::var(key) {
                if let Err(e) = config.apply(key, &value) {
                    tracing::warn!("Ignoring environment override: {e}");
                }
            }
        }
        config
    }

    /// Like [`MseConfig::from_env`], but rejects unparseable values.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidValue` - An override could not be parsed
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in [
            RENDEZVOUS_TIMEOUT_MS,
            DIAGNOSTICS,
            LEADING_GAP_MS,
            SEEK_SNAP_MS,
            COMMAND_CAPACITY,
        ] {
            if let Ok(value) = std::env::var(key) {
                config.apply(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Configuration for tests: short rendezvous timeout so a wedged
    /// owning task fails the test instead of hanging it.
    pub fn for_testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                rendezvous_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn apply(&mut self, key: &'static str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        };

        match key {
            RENDEZVOUS_TIMEOUT_MS => {
                let millis: u64 = value.parse().map_err(|_| invalid())?;
                self.pipeline.rendezvous_timeout = match millis {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                };
            }
            DIAGNOSTICS => {
                self.pipeline.diagnostics_logging = value.parse().map_err(|_| invalid())?;
            }
            LEADING_GAP_MS => {
                let millis: u64 = value.parse().map_err(|_| invalid())?;
                self.pipeline.leading_gap_tolerance = Duration::from_millis(millis);
            }
            SEEK_SNAP_MS => {
                let millis: u64 = value.parse().map_err(|_| invalid())?;
                self.seek.snap_epsilon = Duration::from_millis(millis);
            }
            COMMAND_CAPACITY => {
                let capacity: usize = value.parse().map_err(|_| invalid())?;
                if capacity == 0 {
                    return Err(invalid());
                }
                self.pipeline.command_channel_capacity = capacity;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = MseConfig::default();

        assert_eq!(config.pipeline.command_channel_capacity, 100);
        assert_eq!(config.pipeline.rendezvous_timeout, None);
        assert!(!config.pipeline.diagnostics_logging);
        assert_eq!(
            config.pipeline.leading_gap_tolerance,
            Duration::from_millis(100)
        );
        let supported = &config.pipeline.supported_media_types;
        assert!(supported.iter().any(|t| t == "video/x-h264"));
        assert!(supported.iter().any(|t| t == "text/vtt"));
        assert!(!supported.iter().any(|t| t == "video/x-theora"));
        assert_eq!(config.seek.snap_epsilon, Duration::from_millis(100));
        assert_eq!(config.seek.default_rate, 1.0);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = MseConfig::default();
        config.apply(RENDEZVOUS_TIMEOUT_MS, "250").unwrap();
        config.apply(DIAGNOSTICS, "true").unwrap();
        config.apply(LEADING_GAP_MS, "40").unwrap();
        config.apply(SEEK_SNAP_MS, "500").unwrap();
        config.apply(COMMAND_CAPACITY, "8").unwrap();

        assert_eq!(
            config.pipeline.rendezvous_timeout,
            Some(Duration::from_millis(250))
        );
        assert!(config.pipeline.diagnostics_logging);
        assert_eq!(
            config.pipeline.leading_gap_tolerance,
            Duration::from_millis(40)
        );
        assert_eq!(config.seek.snap_epsilon, Duration::from_millis(500));
        assert_eq!(config.pipeline.command_channel_capacity, 8);

        config.apply(RENDEZVOUS_TIMEOUT_MS, "0").unwrap();
        assert_eq!(config.pipeline.rendezvous_timeout, None);
    }

    #[test]
    fn test_apply_rejects_garbage() {
        let mut config = MseConfig::default();
        assert_eq!(
            config.apply(LEADING_GAP_MS, "soon"),
            Err(ConfigError::InvalidValue {
                key: LEADING_GAP_MS,
                value: "soon".to_string(),
            })
        );
        assert!(config.apply(COMMAND_CAPACITY, "0").is_err());
        assert_eq!(
            config.pipeline.leading_gap_tolerance,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var(SEEK_SNAP_MS, "250");
            std::env::set_var(DIAGNOSTICS, "not-a-bool");
        }

        let config = MseConfig::from_env();
        assert_eq!(config.seek.snap_epsilon, Duration::from_millis(250));
        assert!(!config.pipeline.diagnostics_logging);
        assert!(MseConfig::try_from_env().is_err());

        // Cleanup
        unsafe {
            std::env::remove_var(SEEK_SNAP_MS);
            std::env::remove_var(DIAGNOSTICS);
        }
    }
}
