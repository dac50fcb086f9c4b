//! Per-instance cache configuration.
//!
//! | Setting          | Default | Env var               |
//! |------------------|---------|-----------------------|
//! | TTL              | 1 hour  | `HTTP_CACHE_TTL_SECS` |
//! | Rescue mode      | off     | `HTTP_CACHE_RESCUE`   |
//! | Diagnostic logs  | on      | `HTTP_CACHE_LOGGING`  |

use std::env;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Settings fixed when an [`HttpCache`](crate::cache::HttpCache) is built.
///
/// Deserializes from `{"ttl_secs": 600, "rescue": true, "enable_logging": false}`;
/// every field is optional.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use readthrough::cache::CacheConfig;
///
/// let config = CacheConfig::default()
///     .with_ttl(Duration::from_secs(600))
///     .with_rescue(true);
///
/// assert_eq!(config.ttl(), Duration::from_secs(600));
/// assert!(config.is_rescue());
/// assert!(config.logging_enabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "ttl_secs", deserialize_with = "duration_from_secs")]
    ttl: Duration,
    rescue: bool,
    enable_logging: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            rescue: false,
            enable_logging: true,
        }
    }
}

impl CacheConfig {
    /// Reads `HTTP_CACHE_TTL_SECS`, `HTTP_CACHE_RESCUE`, and
    /// `HTTP_CACHE_LOGGING`. Missing or unparsable values keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let ttl = lookup("HTTP_CACHE_TTL_SECS")
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.ttl);
        let rescue = lookup("HTTP_CACHE_RESCUE")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.rescue);
        let enable_logging = lookup("HTTP_CACHE_LOGGING")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.enable_logging);

        Self {
            ttl,
            rescue,
            enable_logging,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// When `true`, store write failures are logged and swallowed instead of
    /// failing the request.
    #[must_use]
    pub fn with_rescue(mut self, rescue: bool) -> Self {
        self.rescue = rescue;
        self
    }

    #[must_use]
    pub fn with_logging(mut self, enable_logging: bool) -> Self {
        self.enable_logging = enable_logging;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_rescue(&self) -> bool {
        self.rescue
    }

    pub fn logging_enabled(&self) -> bool {
        self.enable_logging
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}
