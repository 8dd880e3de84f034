//! Canvas client: fetches the grid, follows realtime pushes, and submits
//! edits subject to a local cooldown.
//!
//! Provides:
//! - Grid fetch over HTTP, keeping the last known grid when it fails
//! - A realtime reader task that replaces the local grid on every push
//! - Single-cell edits, applied optimistically and submitted as a whole grid
//! - A cooldown that survives restarts through a [`CooldownStore`]

pub mod cooldown;
pub mod state;

use futures_util::StreamExt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub use cooldown::{
    Cooldown, CooldownStore, CooldownStoreError, FileCooldownStore, MemoryCooldownStore,
    DEFAULT_COOLDOWN,
};
pub use state::{CanvasState, GridUpdate, Phase, Selection, Tick};

use crate::grid::{Color, Dimensions, Grid, GridError};
use crate::protocol::{
    GridPush, ProtocolError, StorePixelsRequest, FETCH_PIXELS_PATH, REALTIME_PATH,
    STORE_PIXELS_PATH,
};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No cell selected")]
    NoSelection,
    #[error("Cooldown active, {}s remaining", secs_left(.remaining))]
    CooldownActive { remaining: Duration },
    #[error("An edit is already being submitted")]
    SubmitInFlight,
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] CooldownStoreError),
}

fn secs_left(remaining: &Duration) -> u64 {
    Cooldown::display_secs(*remaining)
}

/// Realtime connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the canvas client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasEvent {
    /// Realtime channel open
    Connected,
    /// Realtime channel lost
    Disconnected,
    /// The local grid now shows a server snapshot
    GridReplaced,
    /// A push arrived mid-submit and will be applied when it finishes
    PushDeferred,
    /// Seconds left on the cooldown
    CooldownTick(u64),
    /// Confirmation is enabled again
    CooldownExpired,
    /// Fetch failed; the last known grid stays on screen
    FetchFailed(String),
    /// Submit failed; the cooldown still stands
    SubmitFailed(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Canvas size the deployment serves
    pub dimensions: Dimensions,
    /// Wait between confirmed edits
    pub cooldown: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::REFERENCE,
            cooldown: DEFAULT_COOLDOWN,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CanvasClient {
    /// Server origin, e.g. `http://127.0.0.1:8080`
    base_url: String,
    http: reqwest::Client,
    state: Arc<Mutex<CanvasState>>,
    cooldown_store: Arc<dyn CooldownStore>,
    connection: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<CanvasEvent>,
    event_rx: Option<mpsc::Receiver<CanvasEvent>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

impl CanvasClient {
    pub fn new(
        base_url: impl Into<String>,
        config: ClientConfig,
        cooldown_store: Arc<dyn CooldownStore>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ProtocolError::from)?;
        let (event_tx, event_rx) = mpsc::channel(256);
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            http,
            state: Arc::new(Mutex::new(CanvasState::new(
                config.dimensions,
                Cooldown::new(config.cooldown),
            ))),
            cooldown_store,
            connection: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            reader: StdMutex::new(None),
            ticker: StdMutex::new(None),
        })
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CanvasEvent>> {
        self.event_rx.take()
    }

    /// Open the realtime channel, then restore the cooldown and fetch.
    ///
    /// Subscribing first means no push can slip in between the fetch and
    /// the subscription.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.connect().await?;
        self.load().await
    }

    /// Restore a persisted cooldown and fetch the current grid.
    pub async fn load(&self) -> Result<(), ClientError> {
        if let Err(e) = self.restore_cooldown().await {
            log::warn!("Ignoring unreadable cooldown state: {e}");
        }
        self.fetch_grid().await.map(|_| ())
    }

    /// Resume the countdown from the persisted deadline, if any.
    pub async fn restore_cooldown(&self) -> Result<Duration, ClientError> {
        let deadline = self.cooldown_store.load()?;
        let remaining = self
            .state
            .lock()
            .await
            .restore_cooldown(deadline, SystemTime::now());
        if remaining.is_zero() {
            if deadline.is_some() {
                self.cooldown_store.clear()?;
            }
        } else {
            log::info!("Resuming cooldown, {}s left", Cooldown::display_secs(remaining));
            self.start_countdown();
        }
        Ok(remaining)
    }

    /// Fetch the grid and show it. On failure the last known grid stays.
    pub async fn fetch_grid(&self) -> Result<GridUpdate, ClientError> {
        let fetched = match self.fetch_remote().await {
            Ok(grid) => grid,
            Err(e) => {
                log::warn!("Fetching grid failed: {e}");
                emit(&self.event_tx, CanvasEvent::FetchFailed(e.to_string()));
                return Err(e);
            }
        };
        let update = self.state.lock().await.apply_server_grid(fetched)?;
        emit(&self.event_tx, update_event(update));
        Ok(update)
    }

    async fn fetch_remote(&self) -> Result<Grid, ClientError> {
        let url = format!("{}{}", self.base_url, FETCH_PIXELS_PATH);
        let response = self.http.get(url).send().await.map_err(ProtocolError::from)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProtocolError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let bytes = response.bytes().await.map_err(ProtocolError::from)?;
        Ok(Grid::from_json(&bytes)?)
    }

    /// Connect the realtime channel.
    ///
    /// Spawns a reader task that applies each pushed grid.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.disconnect().await;
        *self.connection.write().await = ConnectionState::Connecting;

        let url = realtime_url(&self.base_url);
        let mut ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                *self.connection.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::from(e).into());
            }
        };

        *self.connection.write().await = ConnectionState::Connected;
        emit(&self.event_tx, CanvasEvent::Connected);
        log::info!("Realtime channel open: {url}");

        let state = self.state.clone();
        let connection = self.connection.clone();
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let grid = match GridPush::decode(text.as_str()) {
                            Ok(grid) => grid,
                            Err(e) => {
                                log::warn!("Ignoring malformed push: {e}");
                                continue;
                            }
                        };
                        match state.lock().await.apply_server_grid(grid) {
                            Ok(update) => emit(&event_tx, update_event(update)),
                            Err(e) => log::warn!("Ignoring push: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Pongs to server pings are queued by tungstenite itself
                    _ => {}
                }
            }

            *connection.write().await = ConnectionState::Disconnected;
            emit(&event_tx, CanvasEvent::Disconnected);
        });

        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
        Ok(())
    }

    /// Drop the realtime channel, if open.
    pub async fn disconnect(&self) {
        let handle = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(handle) = handle {
            handle.abort();
            *self.connection.write().await = ConnectionState::Disconnected;
        }
    }

    /// Reopen the realtime channel and re-fetch, since pushes sent while
    /// disconnected are never replayed.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.connect().await?;
        self.fetch_grid().await.map(|_| ())
    }

    pub async fn select(&self, x: usize, y: usize) -> Result<Color, ClientError> {
        self.state.lock().await.select(x, y)
    }

    pub async fn stage_color(&self, color: Color) -> Result<(), ClientError> {
        self.state.lock().await.stage_color(color)
    }

    pub async fn cancel(&self) {
        self.state.lock().await.cancel();
    }

    /// Confirm the staged color: apply it locally, start the cooldown, and
    /// submit the whole grid.
    ///
    /// The cooldown stands even when the submit fails. The optimistic edit
    /// stays until the next push or fetch replaces it.
    ///
    /// The submit runs on its own task, so dropping this future does not
    /// leave the client stuck in [`Phase::Submitting`].
    pub async fn confirm(&self) -> Result<(), ClientError> {
        let (grid, deadline) = {
            let mut state = self.state.lock().await;
            let grid = state.confirm(SystemTime::now())?;
            (grid, state.cooldown_deadline())
        };

        if let Some(deadline) = deadline {
            if let Err(e) = self.cooldown_store.save(deadline) {
                log::warn!("Could not persist cooldown deadline: {e}");
            }
        }
        self.start_countdown();

        let http = self.http.clone();
        let url = format!("{}{}", self.base_url, STORE_PIXELS_PATH);
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            let result = submit(&http, url, grid).await;

            if state.lock().await.finish_submit().is_some() {
                emit(&event_tx, CanvasEvent::GridReplaced);
            }

            result.inspect_err(|e| {
                log::warn!("Submitting edit failed: {e}");
                emit(&event_tx, CanvasEvent::SubmitFailed(e.to_string()));
            })
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // The task owns the submitting flag; make sure it is released
                self.state.lock().await.finish_submit();
                Err(ProtocolError::Transport(format!("submit task failed: {e}")).into())
            }
        }
    }

    fn start_countdown(&self) {
        let state = self.state.clone();
        let store = self.cooldown_store.clone();
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                let tick = state.lock().await.tick(SystemTime::now());
                match tick {
                    Tick::Remaining(secs) => emit(&event_tx, CanvasEvent::CooldownTick(secs)),
                    Tick::Expired => {
                        if let Err(e) = store.clear() {
                            log::warn!("Could not clear cooldown deadline: {e}");
                        }
                        emit(&event_tx, CanvasEvent::CooldownExpired);
                        break;
                    }
                    Tick::Idle => break,
                }
            }
        });

        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(old) = ticker.replace(handle) {
                old.abort();
            }
        }
    }

    /// Snapshot of the local grid.
    pub async fn grid(&self) -> Grid {
        self.state.lock().await.grid().clone()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase(SystemTime::now())
    }

    pub async fn selection(&self) -> Option<Selection> {
        self.state.lock().await.selection()
    }

    pub async fn remaining_cooldown(&self) -> Duration {
        self.state
            .lock()
            .await
            .remaining_cooldown(SystemTime::now())
    }

    pub async fn can_confirm(&self) -> bool {
        self.state.lock().await.can_confirm(SystemTime::now())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection.read().await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for CanvasClient {
    fn drop(&mut self) {
        for slot in [&mut self.reader, &mut self.ticker] {
            if let Ok(handle) = slot.get_mut() {
                if let Some(handle) = handle.take() {
                    handle.abort();
                }
            }
        }
    }
}

async fn submit(http: &reqwest::Client, url: String, pixels: Grid) -> Result<(), ClientError> {
    let response = http
        .post(url)
        .json(&StorePixelsRequest { pixels })
        .send()
        .await
        .map_err(ProtocolError::from)?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProtocolError::Status {
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Events are dropped rather than awaited when nobody is draining them.
fn emit(tx: &mpsc::Sender<CanvasEvent>, event: CanvasEvent) {
    if let Err(e) = tx.try_send(event) {
        log::debug!("Dropping canvas event: {e}");
    }
}

fn update_event(update: GridUpdate) -> CanvasEvent {
    match update {
        GridUpdate::Applied => CanvasEvent::GridReplaced,
        GridUpdate::Deferred => CanvasEvent::PushDeferred,
    }
}

/// `http(s)://host` becomes `ws(s)://host/ws`.
fn realtime_url(base_url: &str) -> String {
    let origin = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{origin}{REALTIME_PATH}")
}
