use serde::Deserialize;
use std::fmt;
use std::time::Duration;

fn default_register_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_max_transcript_entries() -> usize {
    1024
}

/// Settings for registering and driving test calls.
#[derive(Clone, Deserialize)]
pub struct CallConfig {
    /// Call-creation endpoint. Empty disables registration.
    #[serde(default)]
    pub endpoint: String,
    /// Bearer token attached to registration requests.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Upper bound for the registration request. Default: 15.
    #[serde(default = "default_register_timeout_secs")]
    pub register_timeout_secs: u64,
    /// Upper bound for the RTC client to report `started`. Default: 20.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound for the RTC client to confirm `ended` after a local stop.
    /// Default: 5.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Transcript entries kept per session before the oldest are evicted.
    #[serde(default = "default_max_transcript_entries")]
    pub max_transcript_entries: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            auth_token: None,
            register_timeout_secs: default_register_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            max_transcript_entries: default_max_transcript_entries(),
        }
    }
}

impl fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConfig")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("register_timeout_secs", &self.register_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("stop_grace_secs", &self.stop_grace_secs)
            .field("max_transcript_entries", &self.max_transcript_entries)
            .finish()
    }
}

impl CallConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: CallConfig = toml::from_str(r#"endpoint = "http://localhost:8080/v2/create-web-call""#)
            .expect("parse TOML");
        assert!(config.is_enabled());
        assert_eq!(config.auth_token, None);
        assert_eq!(config.register_timeout(), Duration::from_secs(15));
        assert_eq!(config.connect_timeout(), Duration::from_secs(20));
        assert_eq!(config.stop_grace(), Duration::from_secs(5));
        assert_eq!(config.max_transcript_entries, 1024);
    }

    #[test]
    fn empty_endpoint_disables_registration() {
        assert!(!CallConfig::default().is_enabled());
    }

    #[test]
    fn debug_redacts_auth_token() {
        let config = CallConfig::new("http://localhost").with_auth_token("sk_live_secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk_live_secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
