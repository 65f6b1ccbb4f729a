//! Configuration for the tile watcher.
//!
//! Settings are layered, later sources winning:
//! - Default values
//! - TOML configuration file (`$TILEWATCH_CONFIG`, else `./tilewatch.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TILEWATCH_` and use double
//! underscores to separate nested levels:
//! - `TILEWATCH_WEBROOT=/srv/web` sets `webroot`
//! - `TILEWATCH_SERVER__PORT=9000` sets `server.port`
//! - `TILEWATCH_WATCH__DEBOUNCE_MS=1000` sets `watch.debounce_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::broadcast::BroadcastScope;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TILEWATCH_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tilewatch.toml";

const ENV_PREFIX: &str = "TILEWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Renderer webroot containing `maps/<dataset>/tiles`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webroot: Option<PathBuf>,

    /// WebSocket server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// File watching settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route events per dataset, or send everything to everyone
    #[serde(default)]
    pub scope: BroadcastScope,

    /// Queued frames per subscriber; a full queue holds up dispatch
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// How long a subscriber's queue may stay full before it is dropped
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long open connections get to close during shutdown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Debounce window for tile writes
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every module
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `tilewatch::broadcast = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_subscriber_buffer() -> usize {
    64
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_debounce_ms() -> u64 {
    crate::watcher::DEFAULT_DEBOUNCE_MS
}
fn default_log_level() -> String {
    "error".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            scope: BroadcastScope::default(),
            subscriber_buffer: default_subscriber_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Map a `-v` count to a level: error, warn, info, debug.
    pub fn level_for_verbosity(verbosity: u8) -> &'static str {
        match verbosity {
            0 => "error",
            1 => "warn",
            2 => "info",
            _ => "debug",
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    ///
    /// A missing file is not an error; defaults and env apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["config"])
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.server.send_timeout_ms)
    }

    /// Shutdown drain timeout as a duration.
    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.server.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.webroot.is_none());
        assert_eq!(settings.server.bind, "0.0.0.0");
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.server.scope, BroadcastScope::Partitioned);
        assert_eq!(settings.watch.debounce_ms, 5000);
        assert_eq!(settings.logging.default, "error");
    }

    #[test]
    fn test_load_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
webroot = "/srv/bluemap/web"

[server]
bind = "127.0.0.1"
port = 9001
scope = "unscoped"
send_timeout_ms = 750

[watch]
debounce_ms = 250

[logging]
default = "info"

[logging.modules]
"tilewatch::broadcast" = "debug"
"#,
            )?;

            let settings = Settings::load_from("custom.toml").map_err(|e| *e)?;
            assert_eq!(settings.webroot, Some(PathBuf::from("/srv/bluemap/web")));
            assert_eq!(settings.server.bind, "127.0.0.1");
            assert_eq!(settings.server.port, 9001);
            assert_eq!(settings.server.scope, BroadcastScope::Unscoped);
            assert_eq!(settings.server.send_timeout_ms, 750);
            assert_eq!(settings.watch.debounce_ms, 250);
            assert_eq!(settings.logging.default, "info");
            assert_eq!(settings.logging.modules["tilewatch::broadcast"], "debug");
            Ok(())
        });
    }

    #[test]
    fn test_partial_config() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "[server]\nport = 7000\n")?;

            let settings = Settings::load().map_err(|e| *e)?;

            // Modified value
            assert_eq!(settings.server.port, 7000);
            // Defaults still present
            assert_eq!(settings.server.bind, "0.0.0.0");
            assert_eq!(settings.server.subscriber_buffer, 64);
            assert_eq!(settings.send_timeout(), std::time::Duration::from_secs(5));
            assert_eq!(settings.watch.debounce_ms, 5000);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load().map_err(|e| *e)?;
            assert_eq!(settings.server.port, 8765);
            Ok(())
        });
    }

    #[test]
    fn test_layered_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "layered.toml",
                "webroot = \"/from/file\"\n[server]\nport = 7000\nbind = \"127.0.0.1\"\n",
            )?;
            jail.set_env(CONFIG_ENV, "layered.toml");
            jail.set_env("TILEWATCH_SERVER__PORT", "9999");
            jail.set_env("TILEWATCH_WATCH__DEBOUNCE_MS", "10");
            jail.set_env("TILEWATCH_SERVER__SCOPE", "unscoped");

            let settings = Settings::load().map_err(|e| *e)?;

            // Environment variable overrides config file
            assert_eq!(settings.server.port, 9999);
            assert_eq!(settings.watch.debounce_ms, 10);
            assert_eq!(settings.server.scope, BroadcastScope::Unscoped);
            // Config file value used when no env var
            assert_eq!(settings.server.bind, "127.0.0.1");
            assert_eq!(settings.webroot, Some(PathBuf::from("/from/file")));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_scope_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "[server]\nscope = \"global\"\n")?;
            assert!(Settings::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LoggingConfig::level_for_verbosity(0), "error");
        assert_eq!(LoggingConfig::level_for_verbosity(1), "warn");
        assert_eq!(LoggingConfig::level_for_verbosity(2), "info");
        assert_eq!(LoggingConfig::level_for_verbosity(3), "debug");
        assert_eq!(LoggingConfig::level_for_verbosity(9), "debug");
    }
}
