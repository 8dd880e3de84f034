//! Optional server-side edit cooldown, keyed by client IP.
//!
//! The canvas client already enforces its own cooldown; this is the
//! server's copy for deployments that want it. State is in memory only and
//! starts empty after a restart. A zero cooldown disables the check.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct EditThrottle {
    cooldown: Duration,
    last_accepted: Mutex<HashMap<IpAddr, Instant>>,
}

impl EditThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.cooldown.is_zero()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Reserve an edit slot for `ip` at `now`.
    ///
    /// Returns the remaining wait when the previous accepted edit from the
    /// same address is still inside the cooldown.
    pub async fn check(&self, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut last = self.last_accepted.lock().await;
        if let Some(prev) = last.get(&ip) {
            let elapsed = now.saturating_duration_since(*prev);
            if elapsed < self.cooldown {
                return Err(self.cooldown - elapsed);
            }
        }
        last.insert(ip, now);
        Ok(())
    }

    /// Give back a slot taken by [`check`](Self::check) whose edit then failed
    /// to persist, so the client may retry immediately.
    pub async fn release(&self, ip: IpAddr, taken_at: Instant) {
        let mut last = self.last_accepted.lock().await;
        if last.get(&ip) == Some(&taken_at) {
            last.remove(&ip);
        }
    }

    /// Forget addresses whose cooldown has expired.
    pub async fn prune(&self, now: Instant) -> usize {
        let mut last = self.last_accepted.lock().await;
        let before = last.len();
        last.retain(|_, at| now.saturating_duration_since(*at) < self.cooldown);
        before - last.len()
    }

    pub async fn tracked(&self) -> usize {
        self.last_accepted.lock().await.len()
    }
}
