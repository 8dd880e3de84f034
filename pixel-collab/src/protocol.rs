//! Wire protocol shared by the sync server and the canvas client.
//!
//! ```text
//! GET  /fetch-pixels   ──►  200  [["#FFFFFF", …], …]        (Grid JSON)
//!                           500  store unavailable
//! POST /store-pixels   ──►  200  edit persisted + broadcast
//!      { "pixels": Grid }   400  malformed grid
//!                           429  server-side cooldown (when enabled)
//!                           500  persist failed, nothing broadcast
//! WS   / or /ws        ◄──  text frame: Grid JSON, after every accepted edit
//! ```
//!
//! Pushes carry the whole grid rather than a cell delta, so a viewer that
//! misses one push is fully caught up by the next.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::grid::Grid;

pub const FETCH_PIXELS_PATH: &str = "/fetch-pixels";
pub const STORE_PIXELS_PATH: &str = "/store-pixels";
pub const REALTIME_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/health";

/// Body of `POST /store-pixels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePixelsRequest {
    pub pixels: Grid,
}

/// Short plain-text acknowledgement bodies.
pub const STORED_OK: &str = "Pixels stored successfully";
pub const STORE_FAILED: &str = "Error storing pixels";
pub const FETCH_FAILED: &str = "Error fetching pixels";

/// A pre-serialized grid snapshot, encoded once per broadcast and shared by
/// every receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPush(Arc<str>);

impl GridPush {
    pub fn encode(grid: &Grid) -> Result<Self, ProtocolError> {
        let json = serde_json::to_string(grid)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self(Arc::from(json)))
    }

    pub fn decode(text: &str) -> Result<Grid, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProtocolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProtocolError::Timeout
        } else {
            ProtocolError::Transport(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ProtocolError::ConnectionClosed,
            other => ProtocolError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Color, Dimensions, Edit};

    #[test]
    fn test_push_carries_plain_grid_json() {
        let grid = Grid::blank(Dimensions::new(2, 1));
        let push = GridPush::encode(&grid).unwrap();
        assert_eq!(push.as_str(), r##"[["#FFFFFF","#FFFFFF"]]"##);
        assert_eq!(GridPush::decode(push.as_str()).unwrap(), grid);
    }

    #[test]
    fn test_push_clones_share_buffer() {
        let push = GridPush::encode(&Grid::blank(Dimensions::new(8, 8))).unwrap();
        let other = push.clone();
        assert!(std::ptr::eq(push.as_str(), other.as_str()));
    }

    #[test]
    fn test_store_request_shape() {
        let grid = Grid::blank(Dimensions::new(2, 2))
            .with_edit(&Edit::new(0, 1, Color::BLACK))
            .unwrap();
        let body = serde_json::to_value(StorePixelsRequest { pixels: grid.clone() }).unwrap();
        assert_eq!(body["pixels"][1][0], "#000000");

        let parsed: StorePixelsRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.pixels, grid);
    }

    #[test]
    fn test_store_request_rejects_bad_color() {
        let body = r##"{"pixels":[["#FFFFFF","nope"]]}"##;
        assert!(serde_json::from_str::<StorePixelsRequest>(body).is_err());
    }

    #[test]
    fn test_decode_invalid_push() {
        assert!(matches!(
            GridPush::decode("not json"),
            Err(ProtocolError::DeserializationError(_))
        ));
    }
}
