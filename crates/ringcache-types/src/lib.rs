//! Shared types and configuration for ringcache.
//!
//! This crate defines the types used across the workspace:
//! node addressing ([`NodeUrl`]), routing keys ([`RoutingKey`]),
//! expiry normalization ([`Expiry`]), and configuration
//! ([`ControlStoreConfig`], [`CacheSettings`], [`PoolConfig`], [`RetryConfig`]).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Name of the hash record in the control store holding the ring topology.
///
/// Fields are virtual-node hashes (decimal strings), values are node URLs.
pub const HASH_RING_KEY: &str = "HASH_RING_MAP";

/// Default entry lifetime when a caller does not pass a timeout.
pub const DEFAULT_TIMEOUT_SECS: i64 = 300;

/// Default port of a shard or control node.
pub const DEFAULT_PORT: u16 = 6379;

/// URL scheme used for node addresses.
pub const NODE_URL_SCHEME: &str = "redis";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A node URL could not be parsed.
    #[error("invalid node url {url:?}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The cache key prefix is empty. Every deployment must use its own prefix.
    #[error("cache key prefix must be set and unique per project")]
    EmptyPrefix,
}

// ---------------------------------------------------------------------------
// Node addressing
// ---------------------------------------------------------------------------

/// Address of a single store node: `scheme://[:password@]host:port/db`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeUrl {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Database index selected after connecting.
    pub db: u32,
    /// Optional password sent with `AUTH`.
    pub password: Option<String>,
}

impl NodeUrl {
    /// Build a node URL from its parts. An empty password is treated as none.
    pub fn new(host: impl Into<String>, port: u16, db: u32, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidUrl {
            url: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix(NODE_URL_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| invalid("expected redis:// scheme"))?;

        let (auth, rest) = match rest.rsplit_once('@') {
            Some((auth, rest)) => (Some(auth), rest),
            None => (None, rest),
        };
        // Only the `:password` form is used; a user name, if present, is ignored.
        let password = auth
            .map(|a| a.split_once(':').map_or(a, |(_, pw)| pw).to_string())
            .filter(|p| !p.is_empty());

        let (hostport, db) = match rest.split_once('/') {
            Some((hp, db)) if !db.is_empty() => {
                let db = db.parse::<u32>().map_err(|_| invalid("bad database index"))?;
                (hp, db)
            }
            Some((hp, _)) => (hp, 0),
            None => (rest, 0),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (hostport, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            db,
            password,
        })
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.password {
            Some(pw) => write!(
                f,
                "{NODE_URL_SCHEME}://:{pw}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => write!(f, "{NODE_URL_SCHEME}://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl fmt::Debug for NodeUrl {
    // Never print the password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = if self.password.is_some() { ":***@" } else { "" };
        write!(
            f,
            "NodeUrl({NODE_URL_SCHEME}://{auth}{}:{}/{})",
            self.host, self.port, self.db
        )
    }
}

impl Serialize for NodeUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Routing keys
// ---------------------------------------------------------------------------

/// A key used only to pick a shard. Strings are used as-is, integers are
/// converted to their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoutingKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoutingKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for RoutingKey {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

macro_rules! routing_key_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for RoutingKey {
                fn from(n: $t) -> Self {
                    Self(n.to_string())
                }
            }
        )*
    };
}

routing_key_from_int!(i32, i64, u32, u64, usize);

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// How long a stored entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Never expires (stored with plain `SET`).
    Persist,
    /// Expires after the given number of seconds (stored with `SETEX`).
    Seconds(u64),
}

impl Expiry {
    /// Normalize a caller-supplied timeout.
    ///
    /// `None` falls back to `default`; any value `<= 0` means "never expire".
    pub fn from_timeout(timeout: Option<i64>, default: i64) -> Self {
        let secs = timeout.unwrap_or(default);
        if secs <= 0 {
            Self::Persist
        } else {
            Self::Seconds(secs as u64)
        }
    }

    /// The lifetime as a duration, or `None` when the entry persists.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Persist => None,
            Self::Seconds(s) => Some(Duration::from_secs(*s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for the control store holding the ring record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlStoreConfig {
    /// Control node host.
    pub host: String,
    /// Control node port.
    pub port: u16,
    /// Database index.
    pub db: u32,
    /// Optional password; empty means none.
    pub password: Option<String>,
}

impl Default for ControlStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            db: 0,
            password: None,
        }
    }
}

impl ControlStoreConfig {
    /// The control node's URL.
    pub fn url(&self) -> NodeUrl {
        NodeUrl::new(self.host.clone(), self.port, self.db, self.password.clone())
    }
}

/// Cache-level settings shared by the client and the decorators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Prefix prepended to cache keys. Mandatory and project-unique.
    pub key_prefix: String,
    /// Lifetime in seconds used when a caller passes no timeout.
    pub default_timeout: Option<i64>,
    /// Surface backend errors from decorated calls instead of failing open.
    pub debug: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            default_timeout: None,
            debug: false,
        }
    }
}

impl CacheSettings {
    /// Settings with the given prefix and defaults elsewhere.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Effective default timeout (configured value or 300 s).
    pub fn default_timeout(&self) -> i64 {
        self.default_timeout
            .filter(|t| *t != 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Reject settings that cannot be served with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        Ok(())
    }
}

/// Per-node connection pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept per node address.
    pub max_idle: usize,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read/write timeout in milliseconds.
    pub io_timeout_ms: u64,
    /// Resend a command once on a fresh connection after a timeout.
    pub retry_on_timeout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 5_000,
            retry_on_timeout: false,
        }
    }
}

impl PoolConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// I/O timeout as a duration.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Bounded retry settings for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
