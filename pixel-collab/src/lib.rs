//! # pixel-collab — Shared pixel canvas with realtime fan-out
//!
//! Many clients view and edit one fixed-size grid of colored cells. Every
//! accepted edit replaces the whole grid and is pushed to every connected
//! client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   GET /fetch-pixels    ┌─────────────┐
//! │ CanvasClient │ ─────────────────────► │ SyncServer  │
//! │ (per user)   │   POST /store-pixels   │ (central)   │
//! └──────┬───────┘ ─────────────────────► └──────┬──────┘
//!        │  ▲                                    │
//!        │  │  WebSocket push (grid JSON)  ┌─────┴─────┐
//!        │  └──────────────────────────────┤ Broadcast │
//!        ▼                                 │ Group     │
//! ┌──────────────┐                         └───────────┘
//! │ Cooldown     │                         ┌───────────┐
//! │ (local file) │                         │ GridStore │
//! └──────────────┘                         │ (RocksDB  │
//!                                          │  or Redis)│
//!                                          └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`grid`] — Grid, color and edit types
//! - [`protocol`] — HTTP bodies, push payloads, route paths
//! - [`storage`] — Grid stores: RocksDB + LZ4, Redis, in-memory
//! - [`broadcast`] — Realtime channel registry and fan-out
//! - [`server`] — Sync server: fetch, edit, push
//! - [`client`] — Canvas client with edit cooldown
//! - [`config`] — Environment settings

pub mod grid;
pub mod protocol;
pub mod storage;
pub mod broadcast;
pub mod throttle;
pub mod server;
pub mod client;
pub mod config;
mod routes;

// Re-exports for convenience
pub use grid::{Color, Dimensions, Edit, Grid, GridError};
pub use protocol::{GridPush, ProtocolError, StorePixelsRequest};
pub use storage::{
    GridStore, MemoryGridStore, RedisConfig, RedisGridStore, RocksGridStore, StoreConfig,
    StoreError, StoreMetadata,
};
pub use broadcast::{BroadcastGroup, BroadcastStats, ChannelInfo};
pub use throttle::EditThrottle;
pub use server::{EditReceipt, ServerConfig, ServerStats, SyncError, SyncServer};
pub use client::{
    CanvasClient, CanvasEvent, ClientConfig, ClientError, ConnectionState, Cooldown,
    CooldownStore, FileCooldownStore, MemoryCooldownStore, Phase,
};
pub use config::{ConfigError, Settings, StoreBackend};
