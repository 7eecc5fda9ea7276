//! Session configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) is a valid configuration.
//!
//! ```toml
//! [session]
//! auto_analyze = true
//! analyze_channel = "flok-master"
//!
//! [highlight]
//! enabled = true
//! max_window = 0.1
//! frame_rate = 60.0
//!
//! [scheduler]
//! cps = 0.5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::eval::DEFAULT_ANALYZE_CHANNEL;
use crate::highlight::{DEFAULT_FRAME_RATE, MAX_WINDOW};
use crate::scheduler::DEFAULT_CPS;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session: SessionSettings,
    pub highlight: HighlightSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Tag every payload with an analysis channel.
    pub auto_analyze: bool,
    pub analyze_channel: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_analyze: true,
            analyze_channel: DEFAULT_ANALYZE_CHANNEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightSettings {
    pub enabled: bool,
    /// Widest query window per frame, in cycles.
    pub max_window: f64,
    /// Frames per second.
    pub frame_rate: f64,
}

impl Default for HighlightSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_window: MAX_WINDOW,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub cps: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { cps: DEFAULT_CPS }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scheduler.cps.is_finite() && self.scheduler.cps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "scheduler.cps must be positive, got {}",
                self.scheduler.cps
            )));
        }
        if !(self.highlight.max_window.is_finite() && self.highlight.max_window > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "highlight.max_window must be positive, got {}",
                self.highlight.max_window
            )));
        }
        if !(self.highlight.frame_rate.is_finite() && self.highlight.frame_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "highlight.frame_rate must be positive, got {}",
                self.highlight.frame_rate
            )));
        }
        if self.session.analyze_channel.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "session.analyze_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SessionConfig::parse("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.session.auto_analyze);
        assert_eq!(config.session.analyze_channel, "flok-master");
        assert_eq!(config.highlight.max_window, 0.1);
        assert_eq!(config.scheduler.cps, 0.5);
    }

    #[test]
    fn test_partial_sections() {
        let config = SessionConfig::parse(
            r#"
            [session]
            auto_analyze = false

            [highlight]
            enabled = false
            "#,
        )
        .unwrap();
        assert!(!config.session.auto_analyze);
        assert_eq!(config.session.analyze_channel, "flok-master");
        assert!(!config.highlight.enabled);
        assert_eq!(config.highlight.frame_rate, 60.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::parse("[scheduler]\ncps = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::parse("[highlight]\nmax_window = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::parse("[scheduler]\ncps = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file_and_write_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\ncps = 0.75").unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler.cps, 0.75);

        let written = config.to_toml().unwrap();
        assert_eq!(SessionConfig::parse(&written).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
