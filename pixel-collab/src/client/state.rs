//! Edit-submission state machine for one canvas client.
//!
//! ```text
//!            select(x, y)              confirm(now)
//!  Viewing ───────────────► Editing ───────────────► Submitting
//!     ▲                       │  ▲                       │ finish_submit()
//!     │        cancel()       │  │ select(x, y)          ▼
//!     └───────────────────────┘  └──────────────────  Cooldown ── deadline ──► Viewing
//! ```
//!
//! Pure state: every time-dependent call takes `now` explicitly and nothing
//! here touches the network or disk.

use std::time::{Duration, SystemTime};

use super::cooldown::Cooldown;
use super::ClientError;
use crate::grid::{Color, Dimensions, Edit, Grid, GridError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Viewing,
    Editing,
    Submitting,
    Cooldown,
}

/// The selected cell and the color staged for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub x: usize,
    pub y: usize,
    pub staged: Color,
}

/// What happened to a grid received from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridUpdate {
    Applied,
    /// Held until the in-flight submit finishes
    Deferred,
}

/// Result of a once-per-second countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No cooldown running
    Idle,
    /// Seconds left, for display
    Remaining(u64),
    /// The cooldown just ended; confirmation is enabled again
    Expired,
}

#[derive(Debug, Clone)]
pub struct CanvasState {
    grid: Grid,
    selection: Option<Selection>,
    submitting: bool,
    pending: Option<Grid>,
    cooldown: Cooldown,
    deadline: Option<SystemTime>,
}

impl CanvasState {
    /// Start on a blank grid, as a client does before its first fetch.
    pub fn new(dims: Dimensions, cooldown: Cooldown) -> Self {
        Self {
            grid: Grid::blank(dims),
            selection: None,
            submitting: false,
            pending: None,
            cooldown,
            deadline: None,
        }
    }

    pub fn phase(&self, now: SystemTime) -> Phase {
        if self.submitting {
            Phase::Submitting
        } else if !self.remaining_cooldown(now).is_zero() {
            Phase::Cooldown
        } else if self.selection.is_some() {
            Phase::Editing
        } else {
            Phase::Viewing
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Select a cell and stage its current color.
    pub fn select(&mut self, x: usize, y: usize) -> Result<Color, ClientError> {
        if self.submitting {
            return Err(ClientError::SubmitInFlight);
        }
        let dims = self.grid.dimensions();
        let current = self.grid.get(x, y).ok_or(GridError::OutOfBounds {
            x,
            y,
            width: dims.width,
            height: dims.height,
        })?;
        self.selection = Some(Selection { x, y, staged: current });
        Ok(current)
    }

    /// Change the staged color. The grid itself is untouched.
    pub fn stage_color(&mut self, color: Color) -> Result<(), ClientError> {
        let selection = self.selection.as_mut().ok_or(ClientError::NoSelection)?;
        selection.staged = color;
        Ok(())
    }

    /// Drop the selection without editing.
    pub fn cancel(&mut self) {
        self.selection = None;
    }

    /// Commit the staged color locally and start the cooldown.
    ///
    /// Returns the full grid to submit. The cooldown starts here, whatever
    /// happens to the submit afterwards.
    pub fn confirm(&mut self, now: SystemTime) -> Result<Grid, ClientError> {
        if self.submitting {
            return Err(ClientError::SubmitInFlight);
        }
        let remaining = self.remaining_cooldown(now);
        if !remaining.is_zero() {
            return Err(ClientError::CooldownActive { remaining });
        }
        let selection = self.selection.ok_or(ClientError::NoSelection)?;

        let next = self
            .grid
            .with_edit(&Edit::new(selection.x, selection.y, selection.staged))?;
        self.grid = next.clone();
        self.selection = None;
        self.submitting = true;
        self.deadline = Some(self.cooldown.deadline_after(now));
        Ok(next)
    }

    /// The submit round-trip ended, successfully or not. Applies any grid
    /// pushed while it was in flight and returns it.
    pub fn finish_submit(&mut self) -> Option<&Grid> {
        self.submitting = false;
        let pending = self.pending.take()?;
        self.grid = pending;
        Some(&self.grid)
    }

    /// Take a grid from the server (fetch or realtime push).
    pub fn apply_server_grid(&mut self, grid: Grid) -> Result<GridUpdate, ClientError> {
        grid.ensure_dimensions(self.grid.dimensions())?;
        if self.submitting {
            self.pending = Some(grid);
            return Ok(GridUpdate::Deferred);
        }
        self.grid = grid;
        Ok(GridUpdate::Applied)
    }

    /// Resume a cooldown recorded before a restart. Returns the time left.
    pub fn restore_cooldown(&mut self, deadline: Option<SystemTime>, now: SystemTime) -> Duration {
        let remaining = deadline.map_or(Duration::ZERO, |d| Cooldown::remaining(d, now));
        // A deadline further out than one full cooldown came from a bad clock
        let remaining = remaining.min(self.cooldown.duration());
        self.deadline = (!remaining.is_zero()).then(|| now + remaining);
        remaining
    }

    pub fn cooldown_deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    pub fn remaining_cooldown(&self, now: SystemTime) -> Duration {
        self.deadline
            .map_or(Duration::ZERO, |d| Cooldown::remaining(d, now))
    }

    pub fn can_confirm(&self, now: SystemTime) -> bool {
        !self.submitting && self.selection.is_some() && self.remaining_cooldown(now).is_zero()
    }

    /// Seconds to show on the confirm button.
    pub fn countdown(&self, now: SystemTime) -> u64 {
        Cooldown::display_secs(self.remaining_cooldown(now))
    }

    /// Advance the countdown display. Reports `Expired` exactly once.
    pub fn tick(&mut self, now: SystemTime) -> Tick {
        match self.deadline {
            None => Tick::Idle,
            Some(deadline) => {
                let remaining = Cooldown::remaining(deadline, now);
                if remaining.is_zero() {
                    self.deadline = None;
                    Tick::Expired
                } else {
                    Tick::Remaining(Cooldown::display_secs(remaining))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECS_180: Duration = Duration::from_secs(180);

    fn state() -> CanvasState {
        CanvasState::new(Dimensions::new(6, 4), Cooldown::new(SECS_180))
    }

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn at(secs: u64) -> SystemTime {
        t0() + Duration::from_secs(secs)
    }

    #[test]
    fn test_initial_phase_is_viewing() {
        let mut s = state();
        assert_eq!(s.phase(t0()), Phase::Viewing);
        assert!(!s.can_confirm(t0()));
        assert_eq!(s.tick(t0()), Tick::Idle);
    }

    #[test]
    fn test_select_stages_current_color() {
        let mut s = state();
        s.apply_server_grid(
            Grid::blank(Dimensions::new(6, 4))
                .with_edit(&Edit::new(2, 1, Color::BLACK))
                .unwrap(),
        )
        .unwrap();

        assert_eq!(s.select(2, 1).unwrap(), Color::BLACK);
        assert_eq!(s.phase(t0()), Phase::Editing);
        assert_eq!(s.selection().unwrap().staged, Color::BLACK);
    }

    #[test]
    fn test_select_out_of_bounds() {
        let mut s = state();
        assert!(matches!(
            s.select(6, 0),
            Err(ClientError::Grid(GridError::OutOfBounds { .. }))
        ));
        assert!(s.selection().is_none());
    }

    #[test]
    fn test_staging_does_not_touch_grid() {
        let mut s = state();
        assert!(matches!(s.stage_color(Color::BLACK), Err(ClientError::NoSelection)));

        s.select(0, 0).unwrap();
        s.stage_color(Color::BLACK).unwrap();
        assert_eq!(s.grid().get(0, 0), Some(Color::WHITE));
        assert_eq!(s.selection().unwrap().staged, Color::BLACK);
    }

    #[test]
    fn test_confirm_replaces_exactly_one_cell() {
        let mut s = state();
        let before = s.grid().clone();
        s.select(5, 3).unwrap();
        s.stage_color(Color::rgb(1, 2, 3)).unwrap();

        let submitted = s.confirm(t0()).unwrap();
        assert_eq!(before.diff_cells(&submitted), 1);
        assert_eq!(submitted.get(5, 3), Some(Color::rgb(1, 2, 3)));
        // Optimistically applied
        assert_eq!(s.grid(), &submitted);
        assert_eq!(s.phase(t0()), Phase::Submitting);
        assert_eq!(s.cooldown_deadline(), Some(at(180)));
    }

    #[test]
    fn test_confirm_without_selection() {
        let mut s = state();
        assert!(matches!(s.confirm(t0()), Err(ClientError::NoSelection)));
        assert!(s.cooldown_deadline().is_none());
    }

    #[test]
    fn test_second_confirm_inside_cooldown_rejected() {
        let mut s = state();
        s.select(0, 0).unwrap();
        s.confirm(t0()).unwrap();
        s.finish_submit();
        assert_eq!(s.phase(at(1)), Phase::Cooldown);

        s.select(1, 1).unwrap();
        match s.confirm(at(179)) {
            Err(ClientError::CooldownActive { remaining }) => {
                assert_eq!(remaining, Duration::from_secs(1))
            }
            other => panic!("Expected cooldown rejection, got {other:?}"),
        }
        // Selection survives the rejection
        assert!(s.selection().is_some());

        assert!(s.can_confirm(at(180)));
        assert!(s.confirm(at(180)).is_ok());
        assert_eq!(s.cooldown_deadline(), Some(at(360)));
    }

    #[test]
    fn test_confirm_while_submitting_rejected() {
        let mut s = state();
        s.select(0, 0).unwrap();
        s.confirm(t0()).unwrap();
        assert!(matches!(s.select(1, 1), Err(ClientError::SubmitInFlight)));
        assert!(matches!(s.confirm(at(500)), Err(ClientError::SubmitInFlight)));
    }

    #[test]
    fn test_push_replaces_grid_but_keeps_staged_color() {
        let mut s = state();
        s.select(4, 2).unwrap();
        s.stage_color(Color::BLACK).unwrap();

        let pushed = Grid::blank(Dimensions::new(6, 4))
            .with_edit(&Edit::new(0, 0, Color::rgb(9, 9, 9)))
            .unwrap();
        assert_eq!(s.apply_server_grid(pushed.clone()).unwrap(), GridUpdate::Applied);
        assert_eq!(s.grid(), &pushed);
        assert_eq!(s.selection().unwrap().staged, Color::BLACK);
    }

    #[test]
    fn test_push_during_submit_is_deferred() {
        let mut s = state();
        s.select(0, 0).unwrap();
        s.stage_color(Color::BLACK).unwrap();
        let optimistic = s.confirm(t0()).unwrap();

        let pushed = Grid::blank(Dimensions::new(6, 4))
            .with_edit(&Edit::new(3, 3, Color::BLACK))
            .unwrap();
        assert_eq!(s.apply_server_grid(pushed.clone()).unwrap(), GridUpdate::Deferred);
        assert_eq!(s.grid(), &optimistic);

        assert_eq!(s.finish_submit(), Some(&pushed));
        assert_eq!(s.grid(), &pushed);
        assert_eq!(s.finish_submit(), None);
    }

    #[test]
    fn test_push_with_wrong_dimensions_rejected() {
        let mut s = state();
        let err = s.apply_server_grid(Grid::blank(Dimensions::new(2, 2))).unwrap_err();
        assert!(matches!(err, ClientError::Grid(GridError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_restore_cooldown_after_reload() {
        let mut s = state();
        // Deadline recorded at T+180, reload at T+90
        let remaining = s.restore_cooldown(Some(at(180)), at(90));
        assert_eq!(remaining, Duration::from_secs(90));
        assert_eq!(s.countdown(at(90)), 90);
        assert_eq!(s.phase(at(90)), Phase::Cooldown);
    }

    #[test]
    fn test_restore_expired_cooldown() {
        let mut s = state();
        assert_eq!(s.restore_cooldown(Some(at(180)), at(400)), Duration::ZERO);
        assert!(s.cooldown_deadline().is_none());
        assert_eq!(s.restore_cooldown(None, at(400)), Duration::ZERO);
    }

    #[test]
    fn test_restore_clamps_future_deadline() {
        let mut s = state();
        let remaining = s.restore_cooldown(Some(at(100_000)), t0());
        assert_eq!(remaining, SECS_180);
    }

    #[test]
    fn test_tick_counts_down_then_expires_once() {
        let mut s = state();
        s.select(0, 0).unwrap();
        s.confirm(t0()).unwrap();
        s.finish_submit();

        assert_eq!(s.tick(at(1)), Tick::Remaining(179));
        assert_eq!(s.tick(t0() + Duration::from_millis(179_500)), Tick::Remaining(1));
        assert_eq!(s.tick(at(180)), Tick::Expired);
        assert_eq!(s.tick(at(181)), Tick::Idle);
        assert_eq!(s.phase(at(181)), Phase::Viewing);
    }
}
