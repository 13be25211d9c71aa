//! Probe configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;
use voxdash_call::CallConfig;

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Call registration and lifecycle settings.
    #[serde(default)]
    pub call: CallConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxdash_call=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VOXDASH_ENDPOINT` overrides `call.endpoint`
/// - `VOXDASH_AUTH_TOKEN` overrides `call.auth_token`
/// - `VOXDASH_REGISTER_TIMEOUT_SECS` overrides `call.register_timeout_secs`
/// - `VOXDASH_CONNECT_TIMEOUT_SECS` overrides `call.connect_timeout_secs`
/// - `VOXDASH_LOG_LEVEL` overrides `logging.level`
/// - `VOXDASH_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `VOXDASH_*` overrides read through `lookup`. Unparseable numbers
/// leave the configured value in place.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = lookup("VOXDASH_ENDPOINT") {
        config.call.endpoint = endpoint;
    }
    if let Some(token) = lookup("VOXDASH_AUTH_TOKEN").filter(|t| !t.is_empty()) {
        config.call.auth_token = Some(token);
    }
    if let Some(secs) = lookup("VOXDASH_REGISTER_TIMEOUT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.call.register_timeout_secs = parsed;
        }
    }
    if let Some(secs) = lookup("VOXDASH_CONNECT_TIMEOUT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.call.connect_timeout_secs = parsed;
        }
    }
    if let Some(level) = lookup("VOXDASH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VOXDASH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.call.register_timeout_secs, 15);
        assert_eq!(config.call.connect_timeout_secs, 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_values_are_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[call]
endpoint = "https://dash.example/v1/calls"
auth_token = "dash_secret"
connect_timeout_secs = 30

[logging]
level = "debug"
json = true
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.call.endpoint, "https://dash.example/v1/calls");
        assert_eq!(config.call.auth_token.as_deref(), Some("dash_secret"));
        assert_eq!(config.call.connect_timeout_secs, 30);
        assert_eq!(config.call.register_timeout_secs, 15);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[call\nendpoint = ").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::default();
        config.call.endpoint = "http://from-file".to_string();

        apply_overrides(
            &mut config,
            env(&[
                ("VOXDASH_ENDPOINT", "http://from-env"),
                ("VOXDASH_AUTH_TOKEN", "env_secret"),
                ("VOXDASH_REGISTER_TIMEOUT_SECS", "3"),
                ("VOXDASH_CONNECT_TIMEOUT_SECS", "soon"),
                ("VOXDASH_LOG_JSON", "1"),
            ]),
        );

        assert_eq!(config.call.endpoint, "http://from-env");
        assert_eq!(config.call.auth_token.as_deref(), Some("env_secret"));
        assert_eq!(config.call.register_timeout_secs, 3);
        assert_eq!(config.call.connect_timeout_secs, 20);
        assert!(config.logging.json);
    }

    #[test]
    fn debug_output_redacts_the_auth_token() {
        let mut config = Config::default();
        apply_overrides(&mut config, env(&[("VOXDASH_AUTH_TOKEN", "env_secret")]));

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("env_secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
