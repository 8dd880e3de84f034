//! Redis-backed grid store.
//!
//! The value is kept exactly as written under its key, so the canvas JSON
//! sits at `pixels` where any other Redis client can read it. Metadata lives
//! beside it at `<key>:meta` (bincode) and is written in the same `MULTI`
//! transaction.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use super::{GridStore, StoreError, StoreMetadata};

/// Connection settings for a Redis server.
#[derive(Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
    pub connect_timeout: Duration,
    /// Read and write timeout per command
    pub io_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

// Keeps the password out of logs
impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl RedisConfig {
    pub fn connection_info(&self) -> ::redis::ConnectionInfo {
        ::redis::ConnectionInfo {
            addr: ::redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: ::redis::RedisConnectionInfo {
                db: self.db,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

pub struct RedisGridStore {
    client: ::redis::Client,
    /// Reused between calls; dropped after a connection-level error so the
    /// next call reconnects.
    conn: Mutex<Option<::redis::Connection>>,
    config: RedisConfig,
}

impl RedisGridStore {
    /// Connect and ping once, so a wrong host or bad credentials fail at
    /// startup rather than on the first edit.
    pub fn open(config: RedisConfig) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(config.connection_info())?;
        let store = Self {
            client,
            conn: Mutex::new(None),
            config,
        };
        store.with_connection(|conn| {
            ::redis::cmd("PING").query::<String>(conn)?;
            Ok(())
        })?;
        log::info!(
            "Connected to Redis at {}:{} (db {})",
            store.config.host,
            store.config.port,
            store.config.db
        );
        Ok(store)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn connect(&self) -> Result<::redis::Connection, StoreError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.config.connect_timeout)?;
        conn.set_read_timeout(Some(self.config.io_timeout))?;
        conn.set_write_timeout(Some(self.config.io_timeout))?;
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut ::redis::Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut slot = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("redis connection poisoned".into()))?;
        if slot.is_none() {
            *slot = Some(self.connect()?);
        }
        let result = match slot.as_mut() {
            Some(conn) => op(conn),
            None => return Err(StoreError::Unavailable("no redis connection".into())),
        };
        if let Err(StoreError::Unavailable(e)) = &result {
            log::warn!("Dropping Redis connection: {e}");
            *slot = None;
        }
        result
    }
}

fn meta_key(key: &str) -> String {
    format!("{key}:meta")
}

impl GridStore for RedisGridStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_connection(|conn| {
            let value: Option<Vec<u8>> = ::redis::cmd("GET").arg(key).query(conn)?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<StoreMetadata, StoreError> {
        let meta_key = meta_key(key);
        self.with_connection(|conn| {
            let previous: Option<Vec<u8>> = ::redis::cmd("GET").arg(&meta_key).query(conn)?;
            let previous = previous.map(|b| StoreMetadata::decode(&b)).transpose()?;
            let meta = StoreMetadata::next(previous.as_ref(), key, value.len(), value.len());
            let encoded = meta.encode()?;

            ::redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(key)
                .arg(value)
                .ignore()
                .cmd("SET")
                .arg(&meta_key)
                .arg(encoded)
                .ignore()
                .query::<()>(conn)?;
            Ok(meta)
        })
    }

    fn metadata(&self, key: &str) -> Result<Option<StoreMetadata>, StoreError> {
        let meta_key = meta_key(key);
        self.with_connection(|conn| {
            let bytes: Option<Vec<u8>> = ::redis::cmd("GET").arg(&meta_key).query(conn)?;
            bytes.map(|b| StoreMetadata::decode(&b)).transpose()
        })
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::DatabaseError(e.to_string())
        }
    }
}
