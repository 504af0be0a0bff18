//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default backend base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// Default push channel URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";

/// Conversation engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many answers to backend follow-up questions are accepted before
    /// the engine advances past the symptoms phase anyway.
    pub max_follow_ups: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_follow_ups: 3 }
    }
}

/// HTTP / socket gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL the endpoint paths are appended to.
    pub base_url: String,
    /// Upper bound on a single backend call.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Resilient socket client configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    /// Consecutive failures tolerated before the client gives up.
    pub max_attempts: u32,
    /// Delay before each reconnect attempt (fixed backoff).
    pub reconnect_delay: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            max_attempts: 5,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

/// Everything the binary needs, assembled from the environment.
#[derive(Debug, Clone, Default)]
pub struct IntakeConfig {
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
    pub socket: SocketConfig,
    /// Route backend calls over the push channel instead of HTTP.
    pub use_socket: bool,
}

impl IntakeConfig {
    /// Build configuration from `INTAKE_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("INTAKE_API_URL") {
            config.gateway.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("INTAKE_WS_URL") {
            config.socket.url = url;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "INTAKE_REQUEST_TIMEOUT_SECS")? {
            config.gateway.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "INTAKE_RECONNECT_DELAY_SECS")? {
            config.socket.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>(&lookup, "INTAKE_MAX_RECONNECT_ATTEMPTS")? {
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "INTAKE_MAX_RECONNECT_ATTEMPTS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.socket.max_attempts = max;
        }
        if let Some(max) = parse_var::<u32>(&lookup, "INTAKE_MAX_FOLLOW_UPS")? {
            config.engine.max_follow_ups = max;
        }
        if let Some(flag) = parse_var::<bool>(&lookup, "INTAKE_USE_SOCKET")? {
            config.use_socket = flag;
        }

        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = IntakeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.gateway.base_url, DEFAULT_API_URL);
        assert_eq!(config.socket.url, DEFAULT_WS_URL);
        assert_eq!(config.socket.max_attempts, 5);
        assert_eq!(config.socket.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.engine.max_follow_ups, 3);
        assert!(!config.use_socket);
    }

    #[test]
    fn overrides_are_applied() {
        let config = IntakeConfig::from_lookup(lookup_from(&[
            ("INTAKE_API_URL", "http://clinic.local:9000/"),
            ("INTAKE_WS_URL", "ws://clinic.local:9000/ws"),
            ("INTAKE_REQUEST_TIMEOUT_SECS", "5"),
            ("INTAKE_RECONNECT_DELAY_SECS", "1"),
            ("INTAKE_MAX_RECONNECT_ATTEMPTS", "2"),
            ("INTAKE_MAX_FOLLOW_UPS", "0"),
            ("INTAKE_USE_SOCKET", "true"),
        ]))
        .unwrap();

        assert_eq!(config.gateway.base_url, "http://clinic.local:9000");
        assert_eq!(config.socket.url, "ws://clinic.local:9000/ws");
        assert_eq!(config.gateway.request_timeout, Duration::from_secs(5));
        assert_eq!(config.socket.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.socket.max_attempts, 2);
        assert_eq!(config.engine.max_follow_ups, 0);
        assert!(config.use_socket);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = IntakeConfig::from_lookup(lookup_from(&[(
            "INTAKE_REQUEST_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "INTAKE_REQUEST_TIMEOUT_SECS"));
    }

    #[test]
    fn zero_reconnect_attempts_is_rejected() {
        let err = IntakeConfig::from_lookup(lookup_from(&[(
            "INTAKE_MAX_RECONNECT_ATTEMPTS",
            "0",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
