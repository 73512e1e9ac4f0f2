//! Configuration file loading and environment overrides

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use super::RuntimeConfig;
use super::error::{ConfigError, ConfigResult};

/// Base URL of the repository server
pub const ENV_BASE_URL: &str = "STEWARD_BASE_URL";
/// API root path segment
pub const ENV_API_ROOT: &str = "STEWARD_API_ROOT";
/// Poll interval in milliseconds
pub const ENV_POLL_INTERVAL_MS: &str = "STEWARD_POLL_INTERVAL_MS";
/// Poll attempt budget
pub const ENV_MAX_ATTEMPTS: &str = "STEWARD_MAX_ATTEMPTS";
/// Per-request timeout in seconds
pub const ENV_TIMEOUT_SECS: &str = "STEWARD_TIMEOUT_SECS";

/// Write the configuration as pretty JSON.
///
/// Goes through a temp file and a rename so readers never see a partial file.
pub fn write_config(path: &Path, config: &RuntimeConfig) -> ConfigResult<()> {
    let json = serde_json::to_vec_pretty(config)?;
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> ConfigResult<RuntimeConfig> {
    let data = fs::read(path)?;
    let config: RuntimeConfig = serde_json::from_slice(&data)?;
    config.validate()?;
    Ok(config)
}

impl RuntimeConfig {
    /// Apply `STEWARD_*` overrides from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// Unset, blank and unparsable values are ignored; the result is
    /// validated afterwards.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let number = |name: &str| text(name).and_then(|value| parse_number(name, &value));

        if let Some(url) = text(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(root) = text(ENV_API_ROOT) {
            self.api_root = root;
        }
        if let Some(interval) = number(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = interval;
        }
        if let Some(attempts) = number(ENV_MAX_ATTEMPTS) {
            self.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(secs) = number(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = Some(secs);
        }
        self.validate()
    }

    /// Reject configurations no client could run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Option<u64> {
    match value.trim().parse() {
        Ok(number) => Some(number),
        Err(_) => {
            tracing::warn!("ignoring {name}: not a number: {value:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_load_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("steward.json");

        let config = RuntimeConfig {
            base_url: "http://repo.example".to_string(),
            poll_interval_ms: 250,
            max_attempts: 8,
            debug: true,
            ..RuntimeConfig::default()
        };

        write_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.base_url, "http://repo.example");
        assert_eq!(loaded.poll_interval_ms, 250);
        assert_eq!(loaded.max_attempts, 8);
        assert!(loaded.debug);
        assert!(!temp.path().join("steward.tmp").exists());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("steward.json");
        fs::write(&path, br#"{"base_url": "http://repo.example"}"#).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.api_root, "api");
        assert_eq!(loaded.poll_interval_ms, 1000);
        assert_eq!(loaded.max_attempts, 30);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://other.example"),
            (ENV_MAX_ATTEMPTS, "5"),
            (ENV_TIMEOUT_SECS, "12"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "http://other.example");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.request_timeout_secs, Some(12));
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_unusable_overrides_ignored() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|name| match name {
                ENV_POLL_INTERVAL_MS => Some("soon".to_string()),
                ENV_BASE_URL => Some("   ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.base_url, RuntimeConfig::default().base_url);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = RuntimeConfig::default();
        config.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.poll_interval_ms = 10;
        config.base_url = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
