//! Pipeline configuration

use crate::error::BreakdownError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Breakdown pipeline configuration
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakdownConfig {
    /// Issue fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Per-persona analysis timeout in seconds
    pub analysis_timeout_secs: u64,
    /// Per-item write timeout in seconds
    pub write_timeout_secs: u64,
    /// Personas analyzed at once (1 = sequential)
    pub max_concurrent_personas: usize,
    /// Progress broadcast buffer
    pub progress_capacity: usize,
    /// Upper bound on synthesized epics
    pub max_epics: usize,
}

impl BreakdownConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// - `BreakdownError::Config` if the text is not valid TOML or a value is invalid
    pub fn from_toml_str(text: &str) -> Result<Self, BreakdownError> {
        let config: Self = toml::from_str(text).map_err(|e| BreakdownError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// - `BreakdownError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BreakdownError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BreakdownError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// With fetch timeout
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, secs: u64) -> Self {
        self.fetch_timeout_secs = secs;
        self
    }

    /// With per-persona analysis timeout
    #[inline]
    #[must_use]
    pub fn with_analysis_timeout(mut self, secs: u64) -> Self {
        self.analysis_timeout_secs = secs;
        self
    }

    /// With per-item write timeout
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, secs: u64) -> Self {
        self.write_timeout_secs = secs;
        self
    }

    /// With fan-out concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_personas(mut self, max: usize) -> Self {
        self.max_concurrent_personas = max;
        self
    }

    /// With progress channel capacity
    #[inline]
    #[must_use]
    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    /// With epic limit
    #[inline]
    #[must_use]
    pub fn with_max_epics(mut self, max: usize) -> Self {
        self.max_epics = max;
        self
    }

    /// Fetch timeout
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Per-persona analysis timeout
    #[inline]
    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    /// Per-item write timeout
    #[inline]
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Validate configuration values
    ///
    /// # Errors
    /// - `BreakdownError::Config` naming the first zero-valued field
    pub fn validate(&self) -> Result<(), BreakdownError> {
        let checks = [
            ("fetch_timeout_secs", self.fetch_timeout_secs == 0),
            ("analysis_timeout_secs", self.analysis_timeout_secs == 0),
            ("write_timeout_secs", self.write_timeout_secs == 0),
            ("max_concurrent_personas", self.max_concurrent_personas == 0),
            ("progress_capacity", self.progress_capacity == 0),
            ("max_epics", self.max_epics == 0),
        ];

        match checks.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(BreakdownError::Config(format!(
                "{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for BreakdownConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            analysis_timeout_secs: 120,
            write_timeout_secs: 30,
            max_concurrent_personas: 1,
            progress_capacity: 64,
            max_epics: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BreakdownConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.analysis_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_concurrent_personas, 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BreakdownConfig::from_toml_str("max_epics = 2\nmax_concurrent_personas = 4\n")
            .unwrap();
        assert_eq!(config.max_epics, 2);
        assert_eq!(config.max_concurrent_personas, 4);
        assert_eq!(config.write_timeout_secs, 30);
    }

    #[test]
    fn zero_values_rejected() {
        let err = BreakdownConfig::new()
            .with_analysis_timeout(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("analysis_timeout_secs"));

        let err = BreakdownConfig::from_toml_str("progress_capacity = 0").unwrap_err();
        assert!(matches!(err, BreakdownError::Config(_)));
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = BreakdownConfig::from_toml_str("max_epics = \"many\"").unwrap_err();
        assert!(matches!(err, BreakdownError::Config(_)));
    }
}
