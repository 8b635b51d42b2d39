// Signaling client configuration
// Logging can only be switched off in debug builds

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use serde::Deserialize;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // on in debug builds

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // off in release builds

// Extra switches for debug builds
#[cfg(debug_assertions)]
pub mod dev {
    // set to false to silence logging in debug builds
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

pub const DEFAULT_SIGNAL_URL: &str = "http://localhost:8080";

/// Route appended to the base URL for offer submission
pub const WATCH_ROUTE: &str = "/api/watch";

pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

pub const ENV_URL: &str = "WATCH_SIGNAL_URL";
pub const ENV_GATHER_TIMEOUT: &str = "WATCH_SIGNAL_GATHER_TIMEOUT_SECS";
pub const ENV_REQUEST_TIMEOUT: &str = "WATCH_SIGNAL_REQUEST_TIMEOUT_SECS";

/// Settings for one signaling client and the peers it negotiates for
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Signaling base URL, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Upper bound on waiting for the end-of-candidates sentinel
    #[serde(with = "secs")]
    pub gather_timeout: Duration,
    /// Upper bound on one signaling round trip
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SIGNAL_URL.to_string(),
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ice_servers: default_ice_servers(),
        }
    }
}

impl SignalConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `WATCH_SIGNAL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_URL) {
            config.base_url = url;
        }
        if let Some(t) = parse_secs(ENV_GATHER_TIMEOUT, lookup(ENV_GATHER_TIMEOUT))? {
            config.gather_timeout = t;
        }
        if let Some(t) = parse_secs(ENV_REQUEST_TIMEOUT, lookup(ENV_REQUEST_TIMEOUT))? {
            config.request_timeout = t;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::InvalidConfig("base_url cannot be empty".into()));
        }
        if self.gather_timeout.is_zero() {
            return Err(Error::InvalidConfig("gather_timeout must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig("request_timeout must be non-zero".into()));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_STUN_SERVERS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig {
            id: format!("default-stun-{i}"),
            r#type: "stun".into(),
            url: (*url).into(),
            username: None,
            credential: None,
        })
        .collect()
}

fn parse_secs(key: &str, raw: Option<String>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|s| Some(Duration::from_secs(s)))
        .map_err(|_| Error::InvalidConfig(format!("{key} must be whole seconds, got '{raw}'")))
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
