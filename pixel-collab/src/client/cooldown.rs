//! Client-side edit cooldown and its local persistence.
//!
//! The deadline is written to client-local storage at confirm time, so a
//! restarted client picks up the remaining wait instead of starting fresh.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Reference wait between confirmed edits.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    duration: Duration,
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl Cooldown {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline_after(&self, now: SystemTime) -> SystemTime {
        now + self.duration
    }

    /// Time left until `deadline`, zero once it has passed.
    pub fn remaining(deadline: SystemTime, now: SystemTime) -> Duration {
        deadline.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// Whole seconds shown to the user, rounded up so "0" only appears once
    /// the wait is really over.
    pub fn display_secs(remaining: Duration) -> u64 {
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Error, Debug)]
pub enum CooldownStoreError {
    #[error("Cooldown file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cooldown file is corrupt: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Cooldown store unavailable")]
    Poisoned,
}

/// Client-local durable storage for the cooldown deadline.
pub trait CooldownStore: Send + Sync {
    fn load(&self) -> Result<Option<SystemTime>, CooldownStoreError>;
    fn save(&self, deadline: SystemTime) -> Result<(), CooldownStoreError>;
    fn clear(&self) -> Result<(), CooldownStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CooldownRecord {
    /// Milliseconds since the Unix epoch
    deadline_ms: u64,
}

fn to_epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn from_epoch_ms(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

/// Deadline kept in a small JSON file.
pub struct FileCooldownStore {
    path: PathBuf,
}

impl FileCooldownStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CooldownStore for FileCooldownStore {
    fn load(&self) -> Result<Option<SystemTime>, CooldownStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: CooldownRecord = serde_json::from_slice(&bytes)?;
        Ok(Some(from_epoch_ms(record.deadline_ms)))
    }

    fn save(&self, deadline: SystemTime) -> Result<(), CooldownStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let record = CooldownRecord {
            deadline_ms: to_epoch_ms(deadline),
        };
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&record)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CooldownStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Deadline kept in memory only.
#[derive(Default)]
pub struct MemoryCooldownStore {
    deadline: Mutex<Option<SystemTime>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn load(&self) -> Result<Option<SystemTime>, CooldownStoreError> {
        Ok(*self.deadline.lock().map_err(|_| CooldownStoreError::Poisoned)?)
    }

    fn save(&self, deadline: SystemTime) -> Result<(), CooldownStoreError> {
        *self.deadline.lock().map_err(|_| CooldownStoreError::Poisoned)? = Some(deadline);
        Ok(())
    }

    fn clear(&self) -> Result<(), CooldownStoreError> {
        *self.deadline.lock().map_err(|_| CooldownStoreError::Poisoned)? = None;
        Ok(())
    }
}
