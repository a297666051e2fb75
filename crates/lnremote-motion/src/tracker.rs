use std::fmt;
use std::time::Duration;

use lnremote_protocol::{Axis, Frame, SpeedMode};
use lnremote_session::FrameObserver;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::TrackerConfig;

/// Latest known state of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisState {
    /// Last reported position in µm; `None` until the first report.
    pub position: Option<f64>,
    /// Last velocity stage sent to the device.
    pub velocity: Option<u8>,
    pub speed_mode: SpeedMode,
    pub enabled: bool,
    pub moving: bool,
    /// Set while moving without a recent report; the position is unknown.
    pub stale: bool,
    /// Number of position reports applied so far.
    pub reports: u64,
    /// Last report or optimistic motion update.
    pub updated_at: Option<Instant>,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            position: None,
            velocity: None,
            speed_mode: SpeedMode::Slow,
            enabled: true,
            moving: false,
            stale: false,
            reports: 0,
            updated_at: None,
        }
    }
}

impl AxisState {
    /// Position if it can be trusted.
    pub fn known_position(&self) -> Option<f64> {
        if self.stale {
            None
        } else {
            self.position
        }
    }
}

/// Snapshot of every axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackedState {
    axes: [AxisState; 3],
}

impl TrackedState {
    pub fn axis(&self, axis: Axis) -> &AxisState {
        &self.axes[axis.index()]
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        &mut self.axes[axis.index()]
    }

    /// Axes whose state is stale.
    pub fn stale_axes(&self) -> Vec<Axis> {
        Axis::ALL
            .into_iter()
            .filter(|axis| self.axis(*axis).stale)
            .collect()
    }

    pub fn any_stale(&self) -> bool {
        self.axes.iter().any(|state| state.stale)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &AxisState)> {
        Axis::ALL.into_iter().map(|axis| (axis, self.axis(axis)))
    }
}

/// Advisory raised when a moving axis stops reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaleStateWarning {
    pub axis: Axis,
    /// Time since the last report or motion command.
    pub silent_for: Duration,
    pub last_position: Option<f64>,
}

impl fmt::Display for StaleStateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "axis {} moving without a position report for {:?}",
            self.axis, self.silent_for
        )
    }
}

/// Single source of truth for where the manipulator is.
///
/// Updated from device notifications (as a [`FrameObserver`]) and from
/// optimistic updates made when commands are issued. Readers get cheap
/// snapshots or a [`watch`] receiver that fires on every change.
#[derive(Debug)]
pub struct AxisTracker {
    state: watch::Sender<TrackedState>,
    config: TrackerConfig,
}

impl AxisTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let (state, _) = watch::channel(TrackedState::default());
        Self { state, config }
    }

    /// Apply one device frame. Only position reports change state.
    pub fn apply(&self, frame: &Frame) {
        match *frame {
            Frame::PositionReport {
                axis,
                position,
                moving,
                enabled,
            } => {
                trace!(axis = %axis, position, moving, "position report");
                let now = Instant::now();
                self.state.send_modify(|state| {
                    let entry = state.axis_mut(axis);
                    if entry.stale {
                        debug!(axis = %axis, position, "stale axis reconciled");
                    }
                    entry.position = Some(position);
                    entry.moving = moving;
                    entry.enabled = enabled;
                    entry.stale = false;
                    entry.reports += 1;
                    entry.updated_at = Some(now);
                });
            }
            Frame::Heartbeat => trace!("heartbeat"),
            Frame::CommandAck { .. } | Frame::CommandNack { .. } => {}
        }
    }

    /// Latest known state of `axis`. Never blocks on the device.
    pub fn read(&self, axis: Axis) -> AxisState {
        *self.state.borrow().axis(axis)
    }

    pub fn snapshot(&self) -> TrackedState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<TrackedState> {
        self.state.subscribe()
    }

    /// Optimistically flag `axis` as moving before the device confirms.
    pub fn mark_moving(&self, axis: Axis) {
        let now = Instant::now();
        self.state.send_modify(|state| {
            let entry = state.axis_mut(axis);
            entry.moving = true;
            entry.updated_at = Some(now);
        });
    }

    /// Withdraw an optimistic moving flag after the command failed.
    pub fn clear_moving(&self, axis: Axis) {
        self.state.send_if_modified(|state| {
            let entry = state.axis_mut(axis);
            let changed = entry.moving || entry.stale;
            entry.moving = false;
            entry.stale = false;
            changed
        });
    }

    pub fn note_velocity(&self, axis: Axis, mode: SpeedMode, stage: u8) {
        self.state.send_modify(|state| {
            let entry = state.axis_mut(axis);
            entry.velocity = Some(stage);
            entry.speed_mode = mode;
        });
    }

    pub fn note_speed_mode(&self, axis: Axis, mode: SpeedMode) {
        self.state
            .send_modify(|state| state.axis_mut(axis).speed_mode = mode);
    }

    pub fn note_enabled(&self, axis: Axis, enabled: bool) {
        self.state
            .send_modify(|state| state.axis_mut(axis).enabled = enabled);
    }

    /// Flag moving axes that have been silent longer than `stale_after`.
    ///
    /// Returns a warning for each axis that became stale on this call.
    pub fn check_staleness(&self, now: Instant) -> Vec<StaleStateWarning> {
        let stale_after = self.config.stale_after;
        let mut warnings = Vec::new();
        self.state.send_if_modified(|state| {
            for axis in Axis::ALL {
                let entry = state.axis_mut(axis);
                if !entry.moving || entry.stale {
                    continue;
                }
                let silent_for = entry
                    .updated_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if silent_for > stale_after {
                    entry.stale = true;
                    warnings.push(StaleStateWarning {
                        axis,
                        silent_for,
                        last_position: entry.position,
                    });
                }
            }
            !warnings.is_empty()
        });
        for warning in &warnings {
            warn!(axis = %warning.axis, silent_for = ?warning.silent_for, "stale axis state");
        }
        warnings
    }
}

impl Default for AxisTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl FrameObserver for AxisTracker {
    fn observe(&self, frame: &Frame) {
        self.apply(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(axis: Axis, position: f64, moving: bool) -> Frame {
        Frame::PositionReport {
            axis,
            position,
            moving,
            enabled: true,
        }
    }

    #[test]
    fn position_is_last_reported_value() {
        let tracker = AxisTracker::default();
        let sequence = [3.0, -7.5, 120.25, 119.0, 119.0, 0.0];
        for (i, position) in sequence.iter().enumerate() {
            tracker.apply(&report(Axis::Y, *position, i + 1 < sequence.len()));
            assert_eq!(tracker.read(Axis::Y).position, Some(*position));
        }
        assert!(!tracker.read(Axis::Y).moving);
        assert_eq!(tracker.read(Axis::Y).reports, sequence.len() as u64);
        assert_eq!(tracker.read(Axis::X).position, None);
    }

    #[test]
    fn reports_only_touch_their_axis() {
        let tracker = AxisTracker::default();
        tracker.apply(&report(Axis::X, 40.0, false));
        tracker.apply(&report(Axis::Z, -3.0, true));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.axis(Axis::X).position, Some(40.0));
        assert_eq!(snapshot.axis(Axis::Y).position, None);
        assert_eq!(snapshot.axis(Axis::Z).position, Some(-3.0));
        assert!(snapshot.axis(Axis::Z).moving);
    }

    #[test]
    fn optimistic_moving_reconciled_by_report() {
        let tracker = AxisTracker::default();
        tracker.apply(&report(Axis::X, 10.0, false));

        tracker.mark_moving(Axis::X);
        assert!(tracker.read(Axis::X).moving);

        tracker.apply(&report(Axis::X, 10.0, false));
        assert!(!tracker.read(Axis::X).moving);
    }

    #[test]
    fn clear_moving_withdraws_optimistic_flag() {
        let tracker = AxisTracker::default();
        tracker.mark_moving(Axis::Z);
        tracker.clear_moving(Axis::Z);
        assert!(!tracker.read(Axis::Z).moving);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_moving_axis_becomes_stale_once() {
        let tracker = AxisTracker::new(TrackerConfig {
            stale_after: Duration::from_millis(500),
        });
        tracker.apply(&report(Axis::X, 10.0, true));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(tracker.check_staleness(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        let warnings = tracker.check_staleness(Instant::now());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].axis, Axis::X);
        assert_eq!(warnings[0].last_position, Some(10.0));
        assert!(tracker.read(Axis::X).stale);
        assert_eq!(tracker.read(Axis::X).known_position(), None);

        // Already flagged.
        assert!(tracker.check_staleness(Instant::now()).is_empty());

        tracker.apply(&report(Axis::X, 12.0, true));
        assert!(!tracker.snapshot().any_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_axes_never_go_stale() {
        let tracker = AxisTracker::default();
        tracker.apply(&report(Axis::Y, 1.0, false));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.check_staleness(Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn watch_fires_on_report() {
        let tracker = AxisTracker::default();
        let mut rx = tracker.watch();
        tracker.apply(&report(Axis::Z, 5.0, false));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().axis(Axis::Z).position, Some(5.0));
    }
}
