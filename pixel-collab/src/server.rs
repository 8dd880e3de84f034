//! Sync server: owns the canonical grid and mediates every mutation.
//!
//! Architecture:
//! ```text
//! Client A ── GET /fetch-pixels ──┐
//! Client B ── POST /store-pixels ─┤
//!                                 ▼
//!                        ┌────────────────┐  set / get  ┌────────────┐
//!                        │  SyncServer    │ ──────────► │ GridStore  │
//!                        │  cached Grid   │ ◄────────── │ (RocksDB)  │
//!                        └───────┬────────┘             └────────────┘
//!                                │ after a confirmed persist only
//!                                ▼
//!                         BroadcastGroup
//!                      ┌─────────┼─────────┐
//!                      ▼         ▼         ▼
//!                  Client A   Client B  Client C     (realtime channels)
//! ```
//!
//! An edit replaces the whole grid. Writes pass through a single gate, so
//! the store, the cache and the most recent broadcast always hold the same
//! grid: whichever edit persists last wins, in full.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::broadcast::{BroadcastGroup, BroadcastStats, ChannelInfo};
use crate::grid::{Dimensions, Grid, GridError};
use crate::protocol::GridPush;
use crate::storage::{
    GridStore, MemoryGridStore, RedisConfig, RedisGridStore, RocksGridStore, StoreConfig, StoreError,
    GRID_KEY,
};
use crate::throttle::EditThrottle;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Canvas size, fixed for the lifetime of the deployment
    pub dimensions: Dimensions,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Snapshots buffered per realtime channel before older ones are skipped
    pub broadcast_capacity: usize,
    /// Realtime ping interval in seconds (0 = no heartbeat)
    pub heartbeat_interval_secs: u64,
    /// Server-side per-IP edit cooldown in seconds (0 = off)
    pub edit_cooldown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            dimensions: Dimensions::REFERENCE,
            max_body_bytes: 50 * 1024 * 1024,
            broadcast_capacity: 16,
            heartbeat_interval_secs: 30,
            edit_cooldown_secs: 0,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub edits_applied: u64,
    pub edits_rejected: u64,
    pub edits_throttled: u64,
    pub failed_persists: u64,
    pub failed_fetches: u64,
    pub pushes_queued: u64,
    /// Store version of the cached grid (0 = never written)
    pub grid_version: u64,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to retrieve grid: {0}")]
    Retrieval(String),
    #[error("Failed to persist grid: {0}")]
    Persistence(String),
    #[error("Malformed edit: {0}")]
    MalformedEdit(#[from] GridError),
    #[error("Edit cooldown active, retry in {}s", .0.as_secs().max(1))]
    Throttled(Duration),
}

/// Outcome of an accepted edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditReceipt {
    pub version: u64,
    /// Realtime channels the new grid was queued for
    pub receivers: usize,
    /// Cells that differ from the previous canonical grid
    pub changed_cells: usize,
}

/// The canonical grid together with its encoded form and store version.
struct Canonical {
    grid: Grid,
    json: GridPush,
    version: u64,
}

struct Shared {
    config: ServerConfig,
    store: Arc<dyn GridStore>,
    canonical: RwLock<Option<Canonical>>,
    write_gate: Mutex<()>,
    broadcast: BroadcastGroup,
    throttle: EditThrottle,
    stats: RwLock<ServerStats>,
}

/// The sync server. Cloning is cheap; all clones share one canonical grid.
#[derive(Clone)]
pub struct SyncServer {
    inner: Arc<Shared>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, store: Arc<dyn GridStore>) -> Self {
        let broadcast = BroadcastGroup::new(config.broadcast_capacity);
        let throttle = EditThrottle::new(Duration::from_secs(config.edit_cooldown_secs));
        Self {
            inner: Arc::new(Shared {
                config,
                store,
                canonical: RwLock::new(None),
                write_gate: Mutex::new(()),
                broadcast,
                throttle,
                stats: RwLock::new(ServerStats::default()),
            }),
        }
    }

    /// In-memory store; nothing survives a restart.
    pub fn with_memory_store(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(MemoryGridStore::new()))
    }

    /// RocksDB store at the given location.
    pub fn with_rocks_store(config: ServerConfig, store_config: StoreConfig) -> Result<Self, StoreError> {
        let store = RocksGridStore::open(store_config)?;
        Ok(Self::new(config, Arc::new(store)))
    }

    /// Redis store at the given address. Fails if the server can't be reached.
    pub fn with_redis_store(config: ServerConfig, redis_config: RedisConfig) -> Result<Self, StoreError> {
        let store = RedisGridStore::open(redis_config)?;
        Ok(Self::new(config, Arc::new(store)))
    }

    // ─── Grid operations ──────────────────────────────────────────────

    /// Current canonical grid, loading it from the store on first use.
    pub async fn get_grid(&self) -> Result<Grid, SyncError> {
        self.with_canonical(|c| c.grid.clone()).await
    }

    /// Current canonical grid as wire JSON.
    pub async fn get_grid_json(&self) -> Result<GridPush, SyncError> {
        self.with_canonical(|c| c.json.clone()).await
    }

    async fn with_canonical<T>(&self, read: impl Fn(&Canonical) -> T) -> Result<T, SyncError> {
        if let Some(canonical) = self.inner.canonical.read().await.as_ref() {
            return Ok(read(canonical));
        }

        let loaded = match self.load_from_store().await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.inner.stats.write().await.failed_fetches += 1;
                return Err(e);
            }
        };

        let mut slot = self.inner.canonical.write().await;
        // An edit may have been applied while the store read was in flight
        let canonical = slot.get_or_insert(loaded);
        self.inner.stats.write().await.grid_version = canonical.version;
        Ok(read(canonical))
    }

    async fn load_from_store(&self) -> Result<Canonical, SyncError> {
        let dims = self.inner.config.dimensions;
        let store = self.inner.store.clone();
        let (bytes, meta) = tokio::task::spawn_blocking(move || {
            let bytes = store.get(GRID_KEY)?;
            let meta = store.metadata(GRID_KEY)?;
            Ok::<_, StoreError>((bytes, meta))
        })
        .await
        .map_err(|e| SyncError::Retrieval(e.to_string()))?
        .map_err(|e| SyncError::Retrieval(e.to_string()))?;

        let grid = match bytes {
            Some(bytes) => {
                let grid = Grid::from_json(&bytes)
                    .map_err(|e| SyncError::Retrieval(format!("stored grid is unreadable: {e}")))?;
                grid.ensure_dimensions(dims)
                    .map_err(|e| SyncError::Retrieval(format!("stored grid is unusable: {e}")))?;
                grid
            }
            None => {
                log::info!("No stored grid, starting from a blank {dims} canvas");
                Grid::blank(dims)
            }
        };

        let json = GridPush::encode(&grid).map_err(|e| SyncError::Retrieval(e.to_string()))?;
        Ok(Canonical {
            grid,
            json,
            version: meta.map_or(0, |m| m.version),
        })
    }

    /// Replace the canonical grid, persist it, then push it to every channel.
    ///
    /// Nothing is broadcast unless the store confirmed the write.
    pub async fn apply_edit(&self, grid: Grid) -> Result<EditReceipt, SyncError> {
        if let Err(e) = grid.ensure_dimensions(self.inner.config.dimensions) {
            self.inner.stats.write().await.edits_rejected += 1;
            return Err(e.into());
        }
        let push = GridPush::encode(&grid).map_err(|e| SyncError::Persistence(e.to_string()))?;

        let _gate = self.inner.write_gate.lock().await;

        let store = self.inner.store.clone();
        let bytes = push.clone();
        let persisted = tokio::task::spawn_blocking(move || store.set(GRID_KEY, bytes.as_str().as_bytes()))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
            .and_then(|result| result);

        let meta = match persisted {
            Ok(meta) => meta,
            Err(e) => {
                log::error!("Error storing pixels: {e}");
                self.inner.stats.write().await.failed_persists += 1;
                return Err(SyncError::Persistence(e.to_string()));
            }
        };

        let changed_cells = {
            let mut slot = self.inner.canonical.write().await;
            let changed = slot
                .as_ref()
                .map_or(grid.dimensions().cell_count(), |c| c.grid.diff_cells(&grid));
            *slot = Some(Canonical {
                grid,
                json: push.clone(),
                version: meta.version,
            });
            changed
        };

        let receivers = self.inner.broadcast.broadcast(push);

        {
            let mut s = self.inner.stats.write().await;
            s.edits_applied += 1;
            s.pushes_queued += receivers as u64;
            s.grid_version = meta.version;
        }

        log::info!(
            "Stored grid v{} ({changed_cells} cells changed), pushed to {receivers} channels",
            meta.version
        );

        Ok(EditReceipt {
            version: meta.version,
            receivers,
            changed_cells,
        })
    }

    /// [`apply_edit`](Self::apply_edit) behind the optional per-IP cooldown.
    pub async fn apply_edit_from(&self, addr: SocketAddr, grid: Grid) -> Result<EditReceipt, SyncError> {
        let now = Instant::now();
        if let Err(wait) = self.inner.throttle.check(addr.ip(), now).await {
            self.inner.stats.write().await.edits_throttled += 1;
            log::debug!("Throttled edit from {addr}, {}s remaining", wait.as_secs());
            return Err(SyncError::Throttled(wait));
        }

        let result = self.apply_edit(grid).await;
        if result.is_err() {
            self.inner.throttle.release(addr.ip(), now).await;
        }
        result
    }

    /// Load the stored grid ahead of the first request.
    pub async fn recover(&self) -> Result<u64, SyncError> {
        let grid = self.get_grid().await?;
        let version = self.inner.stats.read().await.grid_version;
        log::info!("Recovered {} grid at version {version}", grid.dimensions());
        Ok(version)
    }

    // ─── Realtime channels ────────────────────────────────────────────

    /// Drive one realtime channel until it closes or a send fails.
    ///
    /// A failing channel only ends itself; other channels and the editor's
    /// request are unaffected.
    pub(crate) async fn handle_channel(self, socket: WebSocket, addr: SocketAddr) {
        let info = ChannelInfo::new(Some(addr));
        let channel_id = info.channel_id;
        let mut rx = self.inner.broadcast.add_channel(info).await;

        {
            let mut s = self.inner.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("Client connected: channel {channel_id} from {addr}");

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let heartbeat_secs = self.inner.config.heartbeat_interval_secs;
        let mut heartbeat = (heartbeat_secs > 0).then(|| {
            let mut interval = tokio::time::interval(Duration::from_secs(heartbeat_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        if let Some(interval) = heartbeat.as_mut() {
            interval.reset();
        }

        loop {
            tokio::select! {
                push = rx.recv() => {
                    match push {
                        Ok(push) => {
                            if let Err(e) = ws_sender.send(Message::Text(push.as_str().into())).await {
                                log::debug!("Channel {channel_id} send failed: {e}");
                                break;
                            }
                            self.inner.broadcast.record_delivered();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Channel {channel_id} lagged, skipped {n} snapshots");
                            self.inner.broadcast.record_skipped(n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        // Viewers never send edits over the channel
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("Channel {channel_id} error: {e}");
                            break;
                        }
                    }
                }

                _ = async {
                    match heartbeat.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.inner.broadcast.remove_channel(&channel_id).await;
        {
            let mut s = self.inner.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Client disconnected: channel {channel_id}");
    }

    // ─── Serving ──────────────────────────────────────────────────────

    /// Bind the configured address and serve until the process is stopped.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Err(e) = self.recover().await {
            // Fetches retry the store on their own
            log::warn!("Could not load grid at startup: {e}");
        }

        let listener = TcpListener::bind(&self.inner.config.bind_addr).await?;
        log::info!("Server started at http://{}", listener.local_addr()?);
        self.serve(listener).await?;
        Ok(())
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        if self.inner.throttle.is_enabled() {
            log::info!(
                "Server-side edit cooldown: {}s per address",
                self.inner.throttle.cooldown().as_secs()
            );
            let server = self.clone();
            tokio::spawn(async move {
                let mut every = tokio::time::interval(Duration::from_secs(60));
                loop {
                    every.tick().await;
                    let pruned = server.inner.throttle.prune(Instant::now()).await;
                    if pruned > 0 {
                        log::debug!("Pruned {pruned} expired throttle entries");
                    }
                }
            });
        }

        let app = crate::routes::router(self.clone());
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub async fn stats(&self) -> ServerStats {
        self.inner.stats.read().await.clone()
    }

    pub async fn broadcast_stats(&self) -> BroadcastStats {
        self.inner.broadcast.stats().await
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.broadcast.channel_count().await
    }

    pub async fn channels(&self) -> Vec<ChannelInfo> {
        self.inner.broadcast.channels().await
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.inner.config.bind_addr
    }

    pub fn store(&self) -> &Arc<dyn GridStore> {
        &self.inner.store
    }

    /// Subscribe to pushes without a socket (embedding, tests).
    pub async fn subscribe(&self) -> (uuid::Uuid, broadcast::Receiver<GridPush>) {
        let info = ChannelInfo::new(None);
        let id = info.channel_id;
        (id, self.inner.broadcast.add_channel(info).await)
    }

    pub async fn unsubscribe(&self, channel_id: &uuid::Uuid) {
        self.inner.broadcast.remove_channel(channel_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Color, Edit};
    use crate::storage::StoreMetadata;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn small_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            dimensions: Dimensions::new(8, 4),
            ..ServerConfig::default()
        }
    }

    /// Store whose reads and writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryGridStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl GridStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("read refused".into()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<StoreMetadata, StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("write refused".into()));
            }
            self.inner.set(key, value)
        }

        fn metadata(&self, key: &str) -> Result<Option<StoreMetadata>, StoreError> {
            self.inner.metadata(key)
        }
    }

    fn flaky_server() -> (SyncServer, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        (SyncServer::new(small_config(), store.clone()), store)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.dimensions, Dimensions::REFERENCE);
        assert_eq!(config.max_body_bytes, 50 * 1024 * 1024);
        assert_eq!(config.edit_cooldown_secs, 0);
    }

    #[tokio::test]
    async fn test_empty_store_yields_blank_grid() {
        let server = SyncServer::with_memory_store(small_config());
        let grid = server.get_grid().await.unwrap();
        assert_eq!(grid, Grid::blank(Dimensions::new(8, 4)));
        assert_eq!(server.stats().await.grid_version, 0);
    }

    #[tokio::test]
    async fn test_edit_then_fetch_changes_one_cell() {
        let server = SyncServer::with_memory_store(small_config());
        let before = server.get_grid().await.unwrap();
        let edited = before.with_edit(&Edit::new(5, 3, Color::rgb(10, 20, 30))).unwrap();

        let receipt = server.apply_edit(edited.clone()).await.unwrap();
        assert_eq!(receipt.version, 1);
        assert_eq!(receipt.changed_cells, 1);

        let after = server.get_grid().await.unwrap();
        assert_eq!(after, edited);
        assert_eq!(before.diff_cells(&after), 1);
        assert_eq!(after.get(5, 3), Some(Color::rgb(10, 20, 30)));
    }

    #[tokio::test]
    async fn test_same_grid_twice_is_idempotent() {
        let server = SyncServer::with_memory_store(small_config());
        let grid = Grid::blank(Dimensions::new(8, 4))
            .with_edit(&Edit::new(0, 0, Color::BLACK))
            .unwrap();

        server.apply_edit(grid.clone()).await.unwrap();
        let second = server.apply_edit(grid.clone()).await.unwrap();
        assert_eq!(second.changed_cells, 0);

        let stored = server.store().get(GRID_KEY).unwrap().unwrap();
        assert_eq!(Grid::from_json(&stored).unwrap(), grid);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected_without_persist() {
        let (server, store) = flaky_server();
        let (_, mut rx) = server.subscribe().await;

        let err = server.apply_edit(Grid::blank(Dimensions::new(3, 3))).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedEdit(GridError::DimensionMismatch { .. })));
        assert!(store.get(GRID_KEY).unwrap().is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(server.stats().await.edits_rejected, 1);
    }

    #[tokio::test]
    async fn test_zero_sized_canvas_does_not_panic() {
        let server = SyncServer::with_memory_store(ServerConfig {
            dimensions: Dimensions::new(0, 0),
            ..small_config()
        });
        let grid = server.get_grid().await.unwrap();
        assert_eq!(grid.dimensions(), Dimensions::new(0, 0));
        assert_eq!(server.get_grid_json().await.unwrap().as_str(), "[]");

        let err = server.apply_edit(Grid::blank(Dimensions::new(1, 1))).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedEdit(GridError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers_after_persist() {
        let server = SyncServer::with_memory_store(small_config());
        let mut receivers = Vec::new();
        for _ in 0..3 {
            receivers.push(server.subscribe().await.1);
        }

        let grid = Grid::blank(Dimensions::new(8, 4))
            .with_edit(&Edit::new(1, 1, Color::BLACK))
            .unwrap();
        let receipt = server.apply_edit(grid.clone()).await.unwrap();
        assert_eq!(receipt.receivers, 3);

        for rx in &mut receivers {
            let push = rx.recv().await.unwrap();
            assert_eq!(GridPush::decode(push.as_str()).unwrap(), grid);
            // Exactly one push per edit
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_broadcast() {
        let (server, store) = flaky_server();
        let (_, mut rx) = server.subscribe().await;
        let original = server.get_grid().await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let edited = original.with_edit(&Edit::new(2, 2, Color::BLACK)).unwrap();
        let err = server.apply_edit(edited).await.unwrap_err();

        assert!(matches!(err, SyncError::Persistence(_)));
        assert!(rx.try_recv().is_err());
        // Canonical grid unchanged
        assert_eq!(server.get_grid().await.unwrap(), original);
        assert_eq!(server.stats().await.failed_persists, 1);
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_transient() {
        let (server, store) = flaky_server();
        store.fail_reads.store(true, Ordering::SeqCst);
        assert!(matches!(server.get_grid().await, Err(SyncError::Retrieval(_))));
        assert_eq!(server.stats().await.failed_fetches, 1);

        store.fail_reads.store(false, Ordering::SeqCst);
        assert!(server.get_grid().await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_store_is_retrieval_error() {
        let (server, store) = flaky_server();
        store.inner.set(GRID_KEY, b"{not a grid").unwrap();
        assert!(matches!(server.get_grid().await, Err(SyncError::Retrieval(_))));

        // Right JSON, wrong size
        let other = Grid::blank(Dimensions::new(2, 2)).to_json().unwrap();
        store.inner.set(GRID_KEY, other.as_bytes()).unwrap();
        let err = server.get_grid().await.unwrap_err();
        assert!(err.to_string().contains("unusable"));
    }

    #[tokio::test]
    async fn test_recover_loads_existing_grid() {
        let store = Arc::new(MemoryGridStore::new());
        let grid = Grid::blank(Dimensions::new(8, 4))
            .with_edit(&Edit::new(7, 3, Color::BLACK))
            .unwrap();
        store.set(GRID_KEY, grid.to_json().unwrap().as_bytes()).unwrap();

        let server = SyncServer::new(small_config(), store);
        assert_eq!(server.recover().await.unwrap(), 1);
        assert_eq!(server.get_grid().await.unwrap(), grid);
    }

    #[tokio::test]
    async fn test_concurrent_edits_last_persist_wins_whole_grid() {
        let server = SyncServer::with_memory_store(small_config());
        let base = server.get_grid().await.unwrap();
        let a = base.with_edit(&Edit::new(0, 0, Color::rgb(255, 0, 0))).unwrap();
        let b = base.with_edit(&Edit::new(7, 3, Color::rgb(0, 0, 255))).unwrap();

        let (ra, rb) = tokio::join!(server.apply_edit(a.clone()), server.apply_edit(b.clone()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let winner = if ra.version > rb.version { &a } else { &b };
        let stored = Grid::from_json(&server.store().get(GRID_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(&stored, winner);
        assert_eq!(&server.get_grid().await.unwrap(), winner);
        // Not a cell-wise merge
        assert_eq!(stored.diff_cells(&base), 1);
    }

    #[tokio::test]
    async fn test_throttle_rejects_second_edit() {
        let config = ServerConfig {
            edit_cooldown_secs: 180,
            ..small_config()
        };
        let server = SyncServer::with_memory_store(config);
        let addr: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let grid = Grid::blank(Dimensions::new(8, 4));

        server.apply_edit_from(addr, grid.clone()).await.unwrap();
        let err = server.apply_edit_from(addr, grid).await.unwrap_err();
        assert!(matches!(err, SyncError::Throttled(_)));
        assert_eq!(server.stats().await.edits_throttled, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_channel() {
        let server = SyncServer::with_memory_store(small_config());
        let (id, _rx) = server.subscribe().await;
        assert_eq!(server.channel_count().await, 1);
        server.unsubscribe(&id).await;
        assert_eq!(server.channel_count().await, 0);
    }
}
