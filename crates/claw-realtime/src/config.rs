//! Client configuration.
//!
//! Configuration for the realtime client, including:
//! - Endpoint selection (explicit address or same-origin default)
//! - Reconnection policy
//! - Heartbeat timing
//! - Lifecycle hooks (code only, never serialized)
//!
//! Files are JSON with camelCase keys, e.g.
//!
//! ```json
//! {
//!   "origin": "https://app.example.com",
//!   "reconnection": { "enabled": true, "delay": 5000, "jitterFactor": 2, "maxAttempts": 10 },
//!   "heartbeat": { "enabled": true, "delay": 10000, "timeout": 35000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::RealtimeError;
use crate::hooks::Hooks;

/// Query parameter carrying the session token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Reconnection behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// Whether retryable closures schedule a new attempt.
    pub enabled: bool,
    /// Base delay before an attempt, in milliseconds.
    pub delay: u64,
    /// Jitter upper bound as a multiple of `delay`.
    pub jitter_factor: f64,
    /// Attempts allowed since the last successful open.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: 5000,
            jitter_factor: 2.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Base delay as a [`Duration`].
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    /// Whether liveness probes are sent at all.
    pub enabled: bool,
    /// Interval between probes, in milliseconds.
    pub delay: u64,
    /// Time without any reply before the connection is forced closed, in milliseconds.
    pub timeout: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: 10_000,
            timeout: 35_000,
        }
    }
}

impl HeartbeatConfig {
    /// Probe interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.delay)
    }

    /// Reply timeout as a [`Duration`].
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

fn default_origin() -> String {
    "http://localhost".to_string()
}

fn default_path() -> String {
    "/ws".to_string()
}

const fn default_secure_port() -> u16 {
    443
}

const fn default_insecure_port() -> u16 {
    80
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Explicit WebSocket address. Overrides the same-origin default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Origin of the hosting application, used to derive the default address.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Path of the WebSocket endpoint on the origin host.
    #[serde(default = "default_path")]
    pub path: String,
    /// Port used when the origin is secure.
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,
    /// Port used when the origin is not secure.
    #[serde(default = "default_insecure_port")]
    pub insecure_port: u16,
    /// Reconnection configuration.
    #[serde(default)]
    pub reconnection: ReconnectConfig,
    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Lifecycle hooks.
    #[serde(skip)]
    pub hooks: Hooks,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: None,
            origin: default_origin(),
            path: default_path(),
            secure_port: default_secure_port(),
            insecure_port: default_insecure_port(),
            reconnection: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            hooks: Hooks::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RealtimeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RealtimeError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, RealtimeError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| RealtimeError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set an explicit WebSocket address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the hosting origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Set the secure and insecure default ports.
    #[must_use]
    pub const fn with_ports(mut self, secure: u16, insecure: u16) -> Self {
        self.secure_port = secure;
        self.insecure_port = insecure;
        self
    }

    /// Set reconnection configuration.
    #[must_use]
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnection = config;
        self
    }

    /// Set heartbeat configuration.
    #[must_use]
    pub fn with_heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    /// Set lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if let Some(address) = &self.address {
            let url = Url::parse(address)
                .map_err(|e| RealtimeError::Config(format!("invalid address '{address}': {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(RealtimeError::Config(
                    "address must start with ws:// or wss://".to_string(),
                ));
            }
        } else {
            self.origin_url()?;
            if !self.path.starts_with('/') {
                return Err(RealtimeError::Config("path must start with '/'".to_string()));
            }
        }

        if !self.reconnection.jitter_factor.is_finite() || self.reconnection.jitter_factor < 0.0 {
            return Err(RealtimeError::Config(
                "reconnection.jitterFactor must be a non-negative number".to_string(),
            ));
        }

        if self.heartbeat.enabled {
            if self.heartbeat.delay == 0 {
                return Err(RealtimeError::Config(
                    "heartbeat.delay must be greater than 0".to_string(),
                ));
            }
            if self.heartbeat.timeout <= self.heartbeat.delay {
                return Err(RealtimeError::Config(
                    "heartbeat.timeout must exceed heartbeat.delay".to_string(),
                ));
            }
            if self.heartbeat.timeout < self.heartbeat.delay.saturating_mul(2) {
                warn!(
                    delay_ms = self.heartbeat.delay,
                    timeout_ms = self.heartbeat.timeout,
                    "heartbeat timeout is less than twice the probe interval"
                );
            }
        }

        Ok(())
    }

    /// Build the transport URL, appending `token` as a query credential.
    ///
    /// Without an explicit address the URL is derived from the origin: `wss`
    /// and the secure port when the origin is secure, `ws` and the insecure
    /// port otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or origin cannot be parsed.
    pub fn endpoint_url(&self, token: Option<&str>) -> Result<Url, RealtimeError> {
        let mut url = match &self.address {
            Some(address) => Url::parse(address)
                .map_err(|e| RealtimeError::Config(format!("invalid address '{address}': {e}")))?,
            None => {
                let origin = self.origin_url()?;
                let secure = matches!(origin.scheme(), "https" | "wss");
                let host = origin
                    .host_str()
                    .ok_or_else(|| RealtimeError::Config("origin has no host".to_string()))?;
                let (scheme, port) = if secure {
                    ("wss", self.secure_port)
                } else {
                    ("ws", self.insecure_port)
                };
                let raw = format!("{scheme}://{host}:{port}{}", self.path);
                Url::parse(&raw)
                    .map_err(|e| RealtimeError::Config(format!("invalid endpoint '{raw}': {e}")))?
            }
        };

        if let Some(token) = token {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }

        Ok(url)
    }

    fn origin_url(&self) -> Result<Url, RealtimeError> {
        let origin = Url::parse(&self.origin)
            .map_err(|e| RealtimeError::Config(format!("invalid origin '{}': {e}", self.origin)))?;
        if !matches!(origin.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(RealtimeError::Config(format!(
                "unsupported origin scheme '{}'",
                origin.scheme()
            )));
        }
        if origin.host_str().is_none() {
            return Err(RealtimeError::Config("origin has no host".to_string()));
        }
        Ok(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.address.is_none());
        assert!(config.reconnection.enabled);
        assert_eq!(config.reconnection.delay(), Duration::from_millis(5000));
        assert!((config.reconnection.jitter_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.reconnection.max_attempts, 10);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval(), Duration::from_millis(10_000));
        assert_eq!(config.heartbeat.reply_timeout(), Duration::from_millis(35_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_json() {
        let config = ClientConfig::from_json("{}").expect("should parse empty config");
        assert_eq!(config.origin, "http://localhost");
        assert_eq!(config.path, "/ws");
        assert_eq!(config.secure_port, 443);
        assert_eq!(config.insecure_port, 80);
    }

    #[test]
    fn test_parse_full_json() {
        let json = r#"{
            "address": "wss://rt.example.com/socket",
            "reconnection": { "enabled": false, "delay": 250, "jitterFactor": 0.5, "maxAttempts": 3 },
            "heartbeat": { "enabled": true, "delay": 1000, "timeout": 4000 }
        }"#;

        let config = ClientConfig::from_json(json).expect("should parse full config");
        assert_eq!(config.address.as_deref(), Some("wss://rt.example.com/socket"));
        assert!(!config.reconnection.enabled);
        assert_eq!(config.reconnection.delay, 250);
        assert_eq!(config.reconnection.max_attempts, 3);
        assert_eq!(config.heartbeat.timeout, 4000);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let json = r#"{ "reconnection": { "maxAttempts": 2 } }"#;
        let config = ClientConfig::from_json(json).expect("should parse");
        assert_eq!(config.reconnection.max_attempts, 2);
        assert_eq!(config.reconnection.delay, 5000);
        assert!(config.reconnection.enabled);
    }

    #[test]
    fn test_from_file() {
        let file = create_temp_config(r#"{ "origin": "https://app.example.com" }"#);
        let config = ClientConfig::from_file(file.path()).expect("should load");
        assert_eq!(config.origin, "https://app.example.com");
    }

    #[test]
    fn test_from_missing_file() {
        let result = ClientConfig::from_file("/nonexistent/path/realtime.json");
        assert!(matches!(result, Err(RealtimeError::Config(_))));
    }

    #[test]
    fn test_invalid_json() {
        let result = ClientConfig::from_json("{ not json");
        assert!(matches!(result, Err(RealtimeError::Config(_))));
    }

    #[test]
    fn test_reject_timeout_not_exceeding_delay() {
        let config = ClientConfig::default().with_heartbeat(HeartbeatConfig {
            enabled: true,
            delay: 10_000,
            timeout: 10_000,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_heartbeat_skips_timing_checks() {
        let config = ClientConfig::default().with_heartbeat(HeartbeatConfig {
            enabled: false,
            delay: 0,
            timeout: 0,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reject_zero_heartbeat_delay() {
        let config = ClientConfig::default().with_heartbeat(HeartbeatConfig {
            enabled: true,
            delay: 0,
            timeout: 100,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_negative_jitter() {
        let config = ClientConfig::default().with_reconnect_config(ReconnectConfig {
            jitter_factor: -0.1,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_non_websocket_address() {
        let config = ClientConfig::default().with_address("https://example.com");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_bad_origin() {
        assert!(ClientConfig::default().with_origin("not a url").validate().is_err());
        assert!(ClientConfig::default().with_origin("ftp://example.com").validate().is_err());
    }

    #[test]
    fn test_should_reconnect() {
        let config = ReconnectConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(config.should_reconnect(0));
        assert!(config.should_reconnect(2));
        assert!(!config.should_reconnect(3));

        let disabled = ReconnectConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!disabled.should_reconnect(0));
    }

    #[test]
    fn test_endpoint_from_insecure_origin() {
        let config = ClientConfig::default()
            .with_origin("http://app.example.com:3000/some/page")
            .with_ports(8443, 8080);

        let url = config.endpoint_url(None).expect("should build url");
        assert_eq!(url.as_str(), "ws://app.example.com:8080/ws");
    }

    #[test]
    fn test_endpoint_from_secure_origin() {
        let config = ClientConfig::default()
            .with_origin("https://app.example.com")
            .with_ports(8443, 8080);

        let url = config.endpoint_url(Some("abc")).expect("should build url");
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.query(), Some("token=abc"));
    }

    #[test]
    fn test_endpoint_default_port_elided() {
        let config = ClientConfig::default().with_origin("https://app.example.com");
        let url = config.endpoint_url(None).expect("should build url");
        assert_eq!(url.as_str(), "wss://app.example.com/ws");
    }

    #[test]
    fn test_explicit_address_overrides_origin() {
        let config = ClientConfig::default()
            .with_origin("https://app.example.com")
            .with_address("ws://127.0.0.1:9000/rt");

        let url = config.endpoint_url(Some("t o/k")).expect("should build url");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(9000));
        let token = url
            .query_pairs()
            .find(|(k, _)| k == TOKEN_QUERY_PARAM)
            .map(|(_, v)| v.into_owned());
        assert_eq!(token.as_deref(), Some("t o/k"));
    }

    #[test]
    fn test_json_roundtrip_skips_hooks() {
        let config = ClientConfig::default().with_origin("https://app.example.com");
        let json = config.to_json_pretty().expect("should serialize");
        assert!(!json.contains("hooks"));

        let parsed = ClientConfig::from_json(&json).expect("should parse");
        assert_eq!(parsed.origin, config.origin);
        assert_eq!(parsed.reconnection, config.reconnection);
        assert_eq!(parsed.heartbeat, config.heartbeat);
    }
}
