//! Configuration surface: a layered `Config` (file defaults overridden by CLI
//! flags, overridden by environment) split across focused submodules, the way
//! the upstream proxy's `config/mod.rs` organises its own concerns rather
//! than keeping everything in one file.

pub mod cli;
pub mod rate_limit;
pub mod server;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use cli::Args;
pub use rate_limit::RateLimitConfig;
pub use server::ServerConfig;
pub use watch::WatchConfig;

/// Root directory path, HTTP port, trace buffer size, default template
/// engine, rate-limiter TTL, watcher debounce, server timeouts, log level —
/// every knob named in §6 Configuration, with defaults for all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub trace_capacity: usize,
    pub default_engine: Option<String>,
    pub log_level: String,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub watch: WatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("."),
            trace_capacity: 1000,
            default_engine: None,
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Config {
    /// Loads a config file if given, then overlays CLI/env flags from `args`.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path).with_context(|| format!("loading config file {path}"))?
        } else {
            Config::default()
        };

        if let Some(root) = &args.root {
            config.root = PathBuf::from(root);
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(capacity) = args.trace_capacity {
            config.trace_capacity = capacity;
        }
        if let Some(engine) = &args.default_engine {
            config.default_engine = Some(engine.clone());
        }
        if let Some(ttl) = args.rate_limit_ttl_secs {
            config.rate_limit.ttl_secs = ttl;
        }
        if let Some(debounce) = args.watch_debounce_ms {
            config.watch.debounce_ms = debounce;
        }
        if let Some(secs) = args.read_timeout_secs {
            config.server.read_timeout_secs = secs;
        }
        if let Some(secs) = args.write_timeout_secs {
            config.server.write_timeout_secs = secs;
        }
        if let Some(secs) = args.idle_timeout_secs {
            config.server.idle_timeout_secs = secs;
        }
        if let Some(secs) = args.shutdown_timeout_secs {
            config.server.shutdown_timeout_secs = secs;
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path}"))?;
        let config: Config =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {path}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid server config: {e}"))?;
        if self.trace_capacity == 0 {
            anyhow::bail!("trace_capacity must be non-zero");
        }
        if !self.root.exists() {
            anyhow::bail!("root directory {:?} does not exist", self.root);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_with_existing_root_validates() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.root = dir.path().to_path_buf();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_root_fails_validation() {
        let mut cfg = Config::default();
        cfg.root = PathBuf::from("/definitely/does/not/exist/anywhere");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cli_flags_override_file_defaults() {
        let dir = tempdir().unwrap();
        let args = Args {
            root: Some(dir.path().to_string_lossy().to_string()),
            config: None,
            port: Some(9090),
            trace_capacity: None,
            default_engine: None,
            rate_limit_ttl_secs: None,
            watch_debounce_ms: None,
            read_timeout_secs: None,
            write_timeout_secs: None,
            idle_timeout_secs: None,
            shutdown_timeout_secs: None,
            log_level: None,
        };
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.server.port, 9090);
    }
}
