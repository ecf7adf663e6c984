//! Driver configuration
//!
//! Defaults come from the wire model; a host may override them through the
//! environment (`AMC525_DEVICE_NAME`, `AMC525_MAX_BOARDS`).

use crate::error::{Amc525Error, Result};
use amc525_chip::pcie::{DEFAULT_MAX_BOARDS, DEVICE_NAME, MAX_BOARDS_LIMIT};
use tracing::debug;

/// Environment variable overriding the endpoint name prefix
pub const DEVICE_NAME_ENV: &str = "AMC525_DEVICE_NAME";

/// Environment variable overriding the board limit
pub const MAX_BOARDS_ENV: &str = "AMC525_MAX_BOARDS";

/// Driver-wide settings shared by every attached board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Prefix of every endpoint node name
    pub device_name: String,

    /// Number of boards that can be attached at once
    pub max_boards: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            max_boards: DEFAULT_MAX_BOARDS,
        }
    }
}

impl DriverConfig {
    /// Build a configuration from defaults plus environment overrides
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::Config` if an override is present but invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var(DEVICE_NAME_ENV) {
            config.device_name = name;
        }

        if let Ok(value) = std::env::var(MAX_BOARDS_ENV) {
            config.max_boards = value.trim().parse().map_err(|e| {
                Amc525Error::config(format!("{MAX_BOARDS_ENV}={value:?} is not a number: {e}"))
            })?;
        }

        config.validate()?;
        debug!(
            "Driver config: device_name={}, max_boards={}",
            config.device_name, config.max_boards
        );
        Ok(config)
    }

    /// Check that the settings are usable
    ///
    /// # Errors
    ///
    /// Returns `Amc525Error::Config` for an empty or dotted device name, or a
    /// board limit outside `1..=32`.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() || self.device_name.contains(['.', '/']) {
            return Err(Amc525Error::config(format!(
                "device name {:?} must be non-empty and contain no '.' or '/'",
                self.device_name
            )));
        }

        if !(1..=MAX_BOARDS_LIMIT).contains(&self.max_boards) {
            return Err(Amc525Error::config(format!(
                "max_boards {} outside 1..={MAX_BOARDS_LIMIT}",
                self.max_boards
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = DriverConfig::default();
        assert_eq!(config.device_name, "amc525_lamc_priv");
        assert_eq!(config.max_boards, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_board_limit() {
        let config = DriverConfig {
            max_boards: 33,
            ..DriverConfig::default()
        };
        assert!(matches!(config.validate(), Err(Amc525Error::Config { .. })));

        let config = DriverConfig {
            max_boards: 0,
            ..DriverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_dotted_name() {
        let config = DriverConfig {
            device_name: "amc.525".into(),
            ..DriverConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
