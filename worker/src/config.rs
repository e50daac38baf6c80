//! Worker configuration
//!
//! Configuration is loaded from environment variables.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::overlay::FetchConfig;

/// Main worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Initial fetch configuration, used until the first `init` request
    pub fetch: FetchSettings,

    /// Mask decoding configuration
    pub decode: DecodeConfig,

    /// Transport configuration
    pub transport: TransportConfig,
}

/// Fetch defaults applied before any `init` request
#[derive(Debug, Clone, Default)]
pub struct FetchSettings {
    /// Origin serving `/media`; masks are read from disk when unset
    pub origin: Option<String>,
    /// URL path prefix between origin and `/media`
    pub path_prefix: String,
}

/// Mask decoding configuration
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Timeout for a single mask fetch
    pub fetch_timeout: Duration,
    /// Maximum encoded or inflated mask size in bytes
    pub max_mask_bytes: u64,
}

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            fetch: FetchSettings::default(),
            decode: DecodeConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_mask_bytes: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl FetchSettings {
    pub fn to_fetch_config(&self) -> FetchConfig {
        FetchConfig {
            origin: self.origin.clone(),
            headers: BTreeMap::new(),
            path_prefix: self.path_prefix.clone(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Fetch config
        if let Ok(origin) = env::var("FETCH_ORIGIN")
            && !origin.is_empty()
        {
            config.fetch.origin = Some(origin);
        }
        if let Ok(prefix) = env::var("PATH_PREFIX") {
            config.fetch.path_prefix = prefix;
        }

        // Decode config
        if let Ok(val) = env::var("FETCH_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.decode.fetch_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("MAX_MASK_BYTES_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.decode.max_mask_bytes = mb * 1024 * 1024;
        }

        // Transport config
        if let Ok(val) = env::var("WS_MAX_MESSAGE_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.transport.max_message_size = mb * 1024 * 1024;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8090);
        assert!(config.fetch.origin.is_none());
        assert_eq!(config.decode.max_mask_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.decode.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_fetch_settings_seed_fetch_config() {
        let settings = FetchSettings {
            origin: Some("http://localhost:5151".to_string()),
            path_prefix: "/app".to_string(),
        };
        let fetch = settings.to_fetch_config();
        assert_eq!(fetch.origin.as_deref(), Some("http://localhost:5151"));
        assert_eq!(fetch.path_prefix, "/app");
        assert!(fetch.headers.is_empty());
    }
}
