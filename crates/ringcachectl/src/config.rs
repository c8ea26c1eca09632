//! TOML configuration for `ringcachectl`.
//!
//! Every section is optional. A missing file (no `--config`) yields the
//! defaults, except that the cache key prefix has none: commands that go
//! through the cache client need `[cache] key_prefix` set.

use std::path::Path;

use anyhow::Context;
use ringcache_types::{CacheSettings, ControlStoreConfig, PoolConfig, RetryConfig};
use serde::Deserialize;

/// Virtual nodes per node when `[ring] vnodes` is not set.
const DEFAULT_VNODES: u32 = 160;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Control store holding the ring record.
    pub control: ControlStoreConfig,
    /// Cache client settings.
    pub cache: CacheSettings,
    /// Per-node connection pools.
    pub pool: PoolConfig,
    /// Retries for transient store errors.
    pub retry: RetryConfig,
    /// Ring administration.
    pub ring: RingSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[ring]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Virtual nodes placed for each added node.
    pub vnodes: Option<u32>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse config {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective virtual nodes per added node.
    pub fn vnodes(&self) -> u32 {
        self.ring.vnodes.filter(|n| *n > 0).unwrap_or(DEFAULT_VNODES)
    }

    /// Effective default entry lifetime in seconds.
    pub fn default_timeout(&self) -> i64 {
        self.cache.default_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[control]
host = "10.0.0.2"
port = 6380
db = 2
password = "s3cret"

[cache]
key_prefix = "shop:"
default_timeout = 60
debug = true

[pool]
max_idle = 4
connect_timeout_ms = 500
io_timeout_ms = 1000
retry_on_timeout = true

[retry]
attempts = 5
delay_ms = 100

[ring]
vnodes = 64

[log]
level = "debug"
"#;

        let config = CliConfig::from_toml(toml).unwrap();
        assert_eq!(config.control.host, "10.0.0.2");
        assert_eq!(config.control.port, 6380);
        assert_eq!(config.control.url().to_string(), "redis://:s3cret@10.0.0.2:6380/2");
        assert_eq!(config.cache.key_prefix, "shop:");
        assert_eq!(config.default_timeout(), 60);
        assert!(config.cache.debug);
        assert_eq!(config.pool.max_idle, 4);
        assert!(config.pool.retry_on_timeout);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay_ms, 100);
        assert_eq!(config.vnodes(), 64);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = CliConfig::from_toml("").unwrap();
        assert_eq!(config.control, ControlStoreConfig::default());
        assert_eq!(config.control.url().to_string(), "redis://127.0.0.1:6379/0");
        assert!(config.cache.key_prefix.is_empty());
        assert!(config.cache.validate().is_err());
        assert_eq!(config.default_timeout(), 300);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.vnodes(), DEFAULT_VNODES);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[cache]
key_prefix = "app:"

[control]
host = "control.internal"
"#;
        let config = CliConfig::from_toml(toml).unwrap();
        assert_eq!(config.cache.key_prefix, "app:");
        assert!(config.cache.validate().is_ok());
        assert_eq!(config.control.host, "control.internal");
        // Unspecified fields and sections get defaults.
        assert_eq!(config.control.port, 6379);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_zero_vnodes_falls_back_to_default() {
        let config = CliConfig::from_toml("[ring]\nvnodes = 0\n").unwrap();
        assert_eq!(config.vnodes(), DEFAULT_VNODES);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ringcache.toml");
        std::fs::write(
            &path,
            r#"
[control]
port = 7777

[cache]
key_prefix = "file:"
"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.control.port, 7777);
        assert_eq!(config.cache.key_prefix, "file:");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config.vnodes(), DEFAULT_VNODES);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[control]\nport = \"not a number\"\n").unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
    }
}
