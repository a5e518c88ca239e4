//! Application configuration loading, saving, and validation.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::events::{DEFAULT_INTERVAL, MIN_INTERVAL};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the sqlite database lives.
    pub database_path: PathBuf,

    /// Bluetooth adapter to use, e.g. `hci0`. Unset means the system default.
    pub adapter: Option<String>,

    /// Polling interval applied to events launched without an explicit one.
    pub default_interval: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            adapter: None,
            default_interval: DEFAULT_INTERVAL,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the parsed values fail validation.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|err| Error::ConfigParse(err.to_string()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|err| Error::ConfigParse(err.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.default_interval < MIN_INTERVAL || !self.default_interval.is_finite() {
            return Err(Error::ConfigValidation(format!(
                "default_interval must be at least {MIN_INTERVAL} seconds, got {}",
                self.default_interval
            )));
        }
        Ok(())
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/bluescout/config.toml`. Elsewhere the per-user config
/// directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/bluescout/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bluescout")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}

/// Default database location.
///
/// On Linux: `/var/lib/bluescout/bluescout.db`. Elsewhere the per-user data
/// directory.
#[must_use]
pub fn default_database_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/bluescout/bluescout.db")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bluescout")
            .map(|dirs| dirs.data_dir().join("bluescout.db"))
            .unwrap_or_else(|| PathBuf::from("./bluescout.db"))
    }
}

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("static pattern compiles")
});

/// Whether `addr` looks like a colon-separated MAC address.
#[must_use]
pub fn is_valid_mac_address(addr: &str) -> bool {
    MAC_ADDRESS_RE.is_match(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.default_interval - DEFAULT_INTERVAL).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert!(config.adapter.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig {
            database_path: PathBuf::from("/tmp/test.db"),
            adapter: Some("hci1".into()),
            default_interval: 5.0,
        };
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.database_path, PathBuf::from("/tmp/test.db"));
        assert_eq!(loaded.adapter.as_deref(), Some("hci1"));
        assert!((loaded.default_interval - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "adapter = \"hci0\"\n").unwrap();

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.adapter.as_deref(), Some("hci0"));
        assert_eq!(loaded.database_path, default_database_path());
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_interval = 0.2\n").unwrap();

        let err = AppConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("not a mac"));
    }
}
