//! Engine tracking configuration

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment prefix, e.g. `NODE_AGENT_OVERCOMMIT_RATIO=0.5`
pub const ENV_PREFIX: &str = "NODE_AGENT";

/// Per-engine tracking settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Force-refresh the engine state this often
    #[serde(default = "default_refresh_period")]
    pub refresh_period_secs: u64,

    /// Timeout for requests sent to the engine
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Advertised capacity on top of the physical one (0.5 = +50%)
    #[serde(default = "default_overcommit_ratio")]
    pub overcommit_ratio: f64,
}

fn default_refresh_period() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

fn default_overcommit_ratio() -> f64 {
    0.05
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_period_secs: default_refresh_period(),
            request_timeout_secs: default_request_timeout(),
            overcommit_ratio: default_overcommit_ratio(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional config file, then `NODE_AGENT_*` environment
    /// variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.overcommit_ratio.is_finite() || self.overcommit_ratio < 0.0 {
            bail!(
                "overcommit ratio must be a non-negative number, got {}",
                self.overcommit_ratio
            );
        }
        if self.refresh_period_secs == 0 {
            bail!("refresh period must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn with_refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period_secs = period.as_secs().max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_overcommit_ratio(mut self, ratio: f64) -> Self {
        self.overcommit_ratio = ratio;
        self
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Overcommit ratio scaled by 100 to keep capacity arithmetic integral
    pub fn overcommit_scaled(&self) -> i64 {
        (self.overcommit_ratio * 100.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.refresh_period(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.overcommit_scaled(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overcommit_scaled() {
        assert_eq!(EngineConfig::default().with_overcommit_ratio(1.0).overcommit_scaled(), 100);
        assert_eq!(EngineConfig::default().with_overcommit_ratio(0.5).overcommit_scaled(), 50);
        assert_eq!(EngineConfig::default().with_overcommit_ratio(0.0).overcommit_scaled(), 0);
    }

    #[test]
    fn test_validate_rejects_negative_ratio() {
        let config = EngineConfig::default().with_overcommit_ratio(-0.1);
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_overcommit_ratio(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.toml");
        std::fs::write(&path, "refresh_period_secs = 5\novercommit_ratio = 0.5\n").unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.refresh_period(), Duration::from_secs(5));
        assert_eq!(config.overcommit_scaled(), 50);
        // Unset keys keep their defaults
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.toml");
        std::fs::write(&path, "refresh_period_secs = 0\n").unwrap();

        assert!(EngineConfig::load(Some(&path)).is_err());
    }
}
