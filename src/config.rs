use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, Result};

/// Default interval between two admissions, 200ms.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);
/// Default number of work items that may wait in the queue, 10.
pub const DEFAULT_CAPACITY: usize = 10;
/// Default timeout for establishing a connection, 30 seconds.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default TCP keepalive interval, 30 seconds.
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(30);
/// Default user agent, `throttled-client/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("throttled-client/", env!("CARGO_PKG_VERSION"));

/// Serializable dispatcher settings, e.g. loaded from a TOML file.
///
/// ```toml
/// interval = "500ms"
/// capacity = 32
/// timeout = "2m"
///
/// [headers]
/// Accept = "application/json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Minimum interval between two admissions
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum number of queued work items before submitters wait
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Total timeout of a single HTTP call. Unset means no timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Timeout for establishing a connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers sent with every request
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            capacity: default_capacity(),
            timeout: None,
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            headers: HeaderMap::new(),
        }
    }
}

const fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

const fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl DispatcherConfig {
    /// Parse a configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Toml`] if the input is not a valid configuration.
    pub fn from_toml(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Load a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigFile`] if the file cannot be read and
    /// [`ErrorKind::Toml`] if its contents are not a valid configuration.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|e| ErrorKind::ConfigFile(path.to_owned(), e))?;
        Self::from_toml(&contents)
    }

    /// Reject values the dispatcher cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] for a zero interval or a zero
    /// queue capacity.
    pub fn validate(&self) -> Result<()> {
        validate(self.interval, self.capacity)
    }
}

pub(crate) fn validate(interval: Duration, capacity: usize) -> Result<()> {
    if interval.is_zero() {
        return Err(ErrorKind::InvalidConfig(
            "admission interval must not be zero".to_string(),
        ));
    }
    if capacity == 0 {
        return Err(ErrorKind::InvalidConfig(
            "queue capacity must not be zero".to_string(),
        ));
    }
    Ok(())
}

/// Custom deserializer for headers from TOML config format
fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<HeaderMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    let mut header_map = HeaderMap::new();

    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            serde::de::Error::custom(format!("Invalid header value '{value}': {e}"))
        })?;
        header_map.insert(header_name, header_value);
    }

    Ok(header_map)
}

/// Custom serializer for headers to TOML config format
fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    map.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.interval, Duration::from_millis(200));
        assert_eq!(config.capacity, 10);
        assert_eq!(config.timeout, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("throttled-client/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DispatcherConfig::from_toml(
            r#"
            interval = "1s"
            timeout = "90s"

            [headers]
            Accept = "application/json"
            "#,
        )
        .unwrap();

        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers["accept"], "application/json");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = DispatcherConfig::from_toml("concurrency = 4");
        assert!(matches!(result, Err(ErrorKind::Toml(_))));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = DispatcherConfig::from_toml("[headers]\n\"bad header\" = \"x\"");
        assert!(matches!(result, Err(ErrorKind::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = DispatcherConfig {
            interval: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert!(matches!(config.validate(), Err(ErrorKind::InvalidConfig(_))));

        let config = DispatcherConfig {
            capacity: 0,
            ..DispatcherConfig::default()
        };
        assert!(matches!(config.validate(), Err(ErrorKind::InvalidConfig(_))));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = DispatcherConfig {
            interval: Duration::from_millis(250),
            capacity: 3,
            ..DispatcherConfig::default()
        };
        config
            .headers
            .insert("x-api-key", HeaderValue::from_static("secret"));

        let toml = toml::to_string(&config).unwrap();
        let deserialized: DispatcherConfig = toml::from_str(&toml).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "capacity = 64").unwrap();

        let config = DispatcherConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.capacity, 64);

        let missing = DispatcherConfig::load_from_file(Path::new("/does/not/exist.toml"));
        assert!(matches!(missing, Err(ErrorKind::ConfigFile(..))));
    }
}
