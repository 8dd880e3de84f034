//! Fan-out of grid snapshots to every open realtime channel.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers. Each
//! channel gets an independent receiver; a receiver that falls behind skips
//! straight to newer snapshots, which is safe because every push is a full
//! grid.
//!
//! Alongside the channel the group keeps an explicit registry of open
//! channels so connections can be counted, listed and removed on teardown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::GridPush;

/// One open realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub channel_id: Uuid,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: Instant,
}

impl ChannelInfo {
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            channel_id: Uuid::new_v4(),
            remote_addr,
            connected_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub pushes_sent: u64,
    pub pushes_delivered: u64,
    pub pushes_skipped: u64,
    pub active_channels: usize,
}

/// Lock-free counters for the hot path.
#[derive(Default)]
struct AtomicBroadcastStats {
    pushes_sent: AtomicU64,
    pushes_delivered: AtomicU64,
    pushes_skipped: AtomicU64,
}

pub struct BroadcastGroup {
    sender: broadcast::Sender<GridPush>,
    channels: RwLock<HashMap<Uuid, ChannelInfo>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is how many snapshots may queue per channel before the
    /// oldest are skipped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            atomic_stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Register a channel and return the receiver its connection task drains.
    pub async fn add_channel(&self, info: ChannelInfo) -> broadcast::Receiver<GridPush> {
        let mut channels = self.channels.write().await;
        channels.insert(info.channel_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_channel(&self, channel_id: &Uuid) -> Option<ChannelInfo> {
        self.channels.write().await.remove(channel_id)
    }

    /// Queue a snapshot for every open channel. Returns how many receivers it
    /// was queued for; zero when nobody is connected.
    pub fn broadcast(&self, push: GridPush) -> usize {
        let receivers = self.sender.send(push).unwrap_or(0);
        self.atomic_stats.pushes_sent.fetch_add(1, Ordering::Relaxed);
        receivers
    }

    /// Called by a connection task after a push reached its socket.
    pub fn record_delivered(&self) {
        self.atomic_stats.pushes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by a connection task that lagged and skipped `n` snapshots.
    pub fn record_skipped(&self, n: u64) {
        self.atomic_stats.pushes_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Open channels, oldest first.
    pub async fn channels(&self) -> Vec<ChannelInfo> {
        let mut open: Vec<ChannelInfo> = self.channels.read().await.values().cloned().collect();
        open.sort_by_key(|c| c.connected_at);
        open
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            pushes_sent: self.atomic_stats.pushes_sent.load(Ordering::Relaxed),
            pushes_delivered: self.atomic_stats.pushes_delivered.load(Ordering::Relaxed),
            pushes_skipped: self.atomic_stats.pushes_skipped.load(Ordering::Relaxed),
            active_channels: self.channel_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
