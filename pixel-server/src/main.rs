//! Pixel canvas server.
//!
//! Loads `.env` if present, reads settings from the environment, opens the
//! grid store, and serves HTTP plus the realtime channel until interrupted.

use std::path::{Path, PathBuf};

use log::{error, info, warn};

use pixel_collab::{Settings, StoreBackend, SyncServer};

/// Load variables from `path`, or from the nearest `.env` when `None`.
/// Variables already set in the process environment win. A missing file is
/// not an error.
fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_file = load_env_file(None);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match env_file {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable .env file: {e}"),
    }

    let settings = Settings::from_env()?;
    let server = match settings.store {
        StoreBackend::Rocks(store_config) => {
            info!("Opening grid store at {}", store_config.path.display());
            SyncServer::with_rocks_store(settings.server, store_config)?
        }
        StoreBackend::Redis(redis_config) => {
            info!("Opening Redis grid store at {}:{}", redis_config.host, redis_config.port);
            SyncServer::with_redis_store(settings.server, redis_config)?
        }
        StoreBackend::Memory => {
            info!("Using in-memory grid store; edits are lost on exit");
            SyncServer::with_memory_store(settings.server)
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Server stopped: {e}");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_env_file(Some(&dir.path().join(".env"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_env_file_sets_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "PIXEL_SERVER_TEST_ENV_FILE=loaded").unwrap();
        drop(file);

        let loaded = load_env_file(Some(&path)).unwrap();
        assert_eq!(loaded.as_deref(), Some(path.as_path()));
        assert_eq!(std::env::var("PIXEL_SERVER_TEST_ENV_FILE").as_deref(), Ok("loaded"));
    }
}
