use crate::watchdog::WatchdogError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The monitor wakes this many times per nominal timeout window.
pub const DEFAULT_POLL_DIVISOR: u32 = 100;

/// Lower bound for the polling interval, so tiny timeouts don't spin.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Watchdog settings, loaded from watchdog.toml.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub timeout_ms: u64,
    pub poll_divisor: u32,
    pub min_poll_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_divisor: DEFAULT_POLL_DIVISOR,
            min_poll_interval_ms: DEFAULT_MIN_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl WatchdogConfig {
    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<(), WatchdogError> {
        if self.timeout_ms == 0 {
            return Err(WatchdogError::InvalidArgument(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.poll_divisor == 0 {
            return Err(WatchdogError::InvalidArgument(
                "poll_divisor must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        poll_interval_for(
            self.timeout(),
            self.poll_divisor,
            Duration::from_millis(self.min_poll_interval_ms),
        )
    }
}

/// `timeout / divisor`, clamped to at least `floor`.
pub fn poll_interval_for(timeout: Duration, divisor: u32, floor: Duration) -> Duration {
    (timeout / divisor.max(1)).max(floor)
}

/// Errors that can occur while loading a config file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid TOML for `WatchdogConfig`.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<WatchdogConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(WatchdogConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = WatchdogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(300));
    }

    #[test]
    fn test_poll_interval_is_hundredth_of_timeout() {
        let interval = poll_interval_for(
            Duration::from_millis(200),
            DEFAULT_POLL_DIVISOR,
            DEFAULT_MIN_POLL_INTERVAL,
        );
        assert_eq!(interval, Duration::from_millis(2));
    }

    #[test]
    fn test_poll_interval_clamped_to_floor() {
        // 50ms / 100 = 500us, below the 1ms floor
        let interval = poll_interval_for(
            Duration::from_millis(50),
            DEFAULT_POLL_DIVISOR,
            DEFAULT_MIN_POLL_INTERVAL,
        );
        assert_eq!(interval, DEFAULT_MIN_POLL_INTERVAL);

        // Sub-divisor timeouts would otherwise truncate to zero
        let interval = poll_interval_for(Duration::from_nanos(99), 100, Duration::ZERO);
        assert_eq!(interval, Duration::from_nanos(0));
        let interval = poll_interval_for(Duration::from_nanos(99), 100, DEFAULT_MIN_POLL_INTERVAL);
        assert_eq!(interval, DEFAULT_MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = WatchdogConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_zero_divisor() {
        let config = WatchdogConfig {
            poll_divisor: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_divisor"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("watchdog.toml")).unwrap();
        assert_eq!(config, WatchdogConfig::default());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchdog.toml");
        std::fs::write(&path, "timeout_ms = 200\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.timeout_ms, 200);
        assert_eq!(config.poll_divisor, DEFAULT_POLL_DIVISOR);
        assert_eq!(config.poll_interval(), Duration::from_millis(2));
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchdog.toml");
        std::fs::write(
            &path,
            "timeout_ms = 5000\npoll_divisor = 50\nmin_poll_interval_ms = 10\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config,
            WatchdogConfig {
                timeout_ms: 5000,
                poll_divisor: 50,
                min_poll_interval_ms: 10,
            }
        );
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watchdog.toml");
        std::fs::write(&path, "timeout_ms = \"soon\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_load_directory_is_read_error() {
        let dir = tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
