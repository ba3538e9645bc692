//! Gateway configuration loaded from `VAHTI_*` environment variables

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use url::Url;

/// Configuration loading error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable held a value we could not parse
    #[error("invalid value for {var}: {message}")]
    Invalid {
        /// The offending variable name
        var: &'static str,
        /// Why it failed to parse
        message: String,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for development
    Pretty,
    /// JSON lines for log collectors
    Json,
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Externally reachable base URL, used to build plugin locations
    pub base_url: Url,
    /// Liveness ping period; also the initial delay of a plugin's
    /// periodic job
    pub ping_period: Duration,
    /// Token lifetime
    pub token_ttl: Duration,
    /// Timeout for outbound callback requests
    pub callback_timeout: Duration,
    /// Token signing key; generated per process when unset
    pub token_key: Option<Vec<u8>>,
    /// Log output format
    pub log_format: LogFormat,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Proxy endpoint hint surfaced to plugins in the register `env` map
    pub agent_proxy: Option<Url>,
    /// Realm to seed as a builtin plugin at startup
    pub builtin_realm: Option<String>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let http_addr: SocketAddr = parse_or(&lookup, "VAHTI_HTTP_ADDR", "0.0.0.0:8181")?;

        let base_url = match get(&lookup, "VAHTI_BASE_URL") {
            Some(raw) => Url::parse(&raw).map_err(|e| invalid("VAHTI_BASE_URL", e))?,
            // Local default mirrors the listen port
            None => Url::parse(&format!("http://127.0.0.1:{}/", http_addr.port()))
                .map_err(|e| invalid("VAHTI_BASE_URL", e))?,
        };

        let ping_period = duration_secs(&lookup, "VAHTI_PING_PERIOD_SECS", 300)?;
        let token_ttl = duration_secs(&lookup, "VAHTI_TOKEN_TTL_SECS", 600)?;
        let callback_timeout = duration_secs(&lookup, "VAHTI_CALLBACK_TIMEOUT_SECS", 10)?;

        let token_key = match get(&lookup, "VAHTI_TOKEN_KEY") {
            Some(raw) => Some(
                STANDARD
                    .decode(raw.as_bytes())
                    .map_err(|e| invalid("VAHTI_TOKEN_KEY", e))?,
            ),
            None => None,
        };

        let log_format = match get(&lookup, "VAHTI_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "VAHTI_LOG_FORMAT",
                    message: format!("expected \"pretty\" or \"json\", got \"{other}\""),
                })
            }
        };

        let log_level = get(&lookup, "VAHTI_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let agent_proxy = match get(&lookup, "VAHTI_AGENT_PROXY") {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| invalid("VAHTI_AGENT_PROXY", e))?),
            None => None,
        };

        let builtin_realm = get(&lookup, "VAHTI_BUILTIN_REALM");

        Ok(Self {
            http_addr,
            base_url,
            ping_period,
            token_ttl,
            callback_timeout,
            token_key,
            log_format,
            log_level,
            agent_proxy,
            builtin_realm,
        })
    }
}

fn get(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn invalid(var: &'static str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        message: err.to_string(),
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get(lookup, var).unwrap_or_else(|| default.to_string());
    raw.parse().map_err(|e| invalid(var, e))
}

fn duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(lookup, var, &default.to_string())?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8181".parse().unwrap());
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8181/");
        assert_eq!(config.ping_period, Duration::from_secs(300));
        assert_eq!(config.token_ttl, Duration::from_secs(600));
        assert_eq!(config.callback_timeout, Duration::from_secs(10));
        assert!(config.token_key.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_level, "info");
        assert!(config.agent_proxy.is_none());
        assert!(config.builtin_realm.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("VAHTI_HTTP_ADDR", "127.0.0.1:9999"),
            ("VAHTI_BASE_URL", "https://vahti.example.com/"),
            ("VAHTI_PING_PERIOD_SECS", "30"),
            ("VAHTI_LOG_FORMAT", "json"),
            ("VAHTI_AGENT_PROXY", "http://proxy:3128/"),
            ("VAHTI_BUILTIN_REALM", "custom-targets"),
        ])
        .unwrap();

        assert_eq!(config.http_addr.port(), 9999);
        assert_eq!(config.base_url.host_str(), Some("vahti.example.com"));
        assert_eq!(config.ping_period, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.agent_proxy.unwrap().as_str(), "http://proxy:3128/");
        assert_eq!(config.builtin_realm.as_deref(), Some("custom-targets"));
    }

    #[test]
    fn test_token_key_is_base64() {
        let config = config_from(&[("VAHTI_TOKEN_KEY", "c2VjcmV0LWtleQ==")]).unwrap();
        assert_eq!(config.token_key.unwrap(), b"secret-key");

        let err = config_from(&[("VAHTI_TOKEN_KEY", "%%%not-base64%%%")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "VAHTI_TOKEN_KEY",
                ..
            }
        ));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(config_from(&[("VAHTI_HTTP_ADDR", "not-an-addr")]).is_err());
        assert!(config_from(&[("VAHTI_PING_PERIOD_SECS", "soon")]).is_err());
        assert!(config_from(&[("VAHTI_LOG_FORMAT", "xml")]).is_err());
        assert!(config_from(&[("VAHTI_BASE_URL", "::")]).is_err());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("VAHTI_LOG_LEVEL", "  ")]).unwrap();
        assert_eq!(config.log_level, "info");
    }
}
