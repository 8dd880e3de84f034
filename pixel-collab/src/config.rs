//! Process configuration read from the environment.
//!
//! | Variable                   | Default        |
//! |----------------------------|----------------|
//! | `HOST`                     | `0.0.0.0`      |
//! | `PORT`                     | `8080`         |
//! | `PIXEL_STORE`              | `rocks`        |
//! | `PIXEL_STORE_PATH`         | `pixel_data`   |
//! | `PIXEL_STORE_SYNC`         | `true`         |
//! | `PIXEL_GRID_WIDTH`         | `384`          |
//! | `PIXEL_GRID_HEIGHT`        | `196`          |
//! | `PIXEL_MAX_BODY_BYTES`     | `52428800`     |
//! | `PIXEL_EDIT_COOLDOWN_SECS` | `0` (off)      |
//! | `PIXEL_HEARTBEAT_SECS`     | `30`           |
//!
//! With `PIXEL_STORE=redis` the store connection comes from:
//!
//! | Variable        | Default     |
//! |-----------------|-------------|
//! | `REDISHOST`     | `127.0.0.1` |
//! | `REDISPORT`     | `6379`      |
//! | `REDISUSERNAME` | none        |
//! | `PASSWORD`      | none        |

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::grid::Dimensions;
use crate::server::ServerConfig;
use crate::storage::{RedisConfig, StoreConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which grid store the process opens.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Rocks(StoreConfig),
    Redis(RedisConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub store: StoreBackend,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServerConfig::default();

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&lookup, "PORT", 8080)?;

        let width: usize = parse_or(&lookup, "PIXEL_GRID_WIDTH", defaults.dimensions.width)?;
        let height: usize = parse_or(&lookup, "PIXEL_GRID_HEIGHT", defaults.dimensions.height)?;
        for (key, v) in [("PIXEL_GRID_WIDTH", width), ("PIXEL_GRID_HEIGHT", height)] {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: v.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
        }

        let server = ServerConfig {
            bind_addr: format!("{host}:{port}"),
            dimensions: Dimensions::new(width, height),
            max_body_bytes: parse_or(&lookup, "PIXEL_MAX_BODY_BYTES", defaults.max_body_bytes)?,
            broadcast_capacity: defaults.broadcast_capacity,
            heartbeat_interval_secs: parse_or(
                &lookup,
                "PIXEL_HEARTBEAT_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            edit_cooldown_secs: parse_or(
                &lookup,
                "PIXEL_EDIT_COOLDOWN_SECS",
                defaults.edit_cooldown_secs,
            )?,
        };

        let backend = lookup("PIXEL_STORE").unwrap_or_else(|| "rocks".to_string());
        let store = match backend.to_ascii_lowercase().as_str() {
            "rocks" | "rocksdb" => {
                let mut config = StoreConfig::default();
                if let Some(path) = lookup("PIXEL_STORE_PATH") {
                    config.path = PathBuf::from(path);
                }
                config.sync_writes = parse_or(&lookup, "PIXEL_STORE_SYNC", config.sync_writes)?;
                StoreBackend::Rocks(config)
            }
            "redis" => {
                let mut config = RedisConfig::default();
                if let Some(host) = lookup("REDISHOST").filter(|h| !h.trim().is_empty()) {
                    config.host = host.trim().to_string();
                }
                config.port = parse_or(&lookup, "REDISPORT", config.port)?;
                config.username = lookup("REDISUSERNAME").filter(|u| !u.is_empty());
                config.password = lookup("PASSWORD").filter(|p| !p.is_empty());
                StoreBackend::Redis(config)
            }
            "memory" => StoreBackend::Memory,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "PIXEL_STORE",
                    value: backend,
                    reason: "expected `rocks`, `redis` or `memory`".into(),
                })
            }
        };

        Ok(Self { server, store })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}
