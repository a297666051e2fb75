use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lnremote_protocol::{Axis, Command, CommandKind, SpeedMode};
use lnremote_session::{Ack, Notifications, Session, SessionError, SessionState};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MotionConfig;
use crate::error::{MotionError, Result};
use crate::maneuver::{plan, ManeuverHandle, ManeuverKind, ManeuverState, ManeuverStep, StepTarget};
use crate::safety::{evaluate, evaluate_step, is_inside_sample, SafetyVerdict};
use crate::tracker::{AxisState, AxisTracker, TrackedState};

const MAX_VELOCITY_STAGE: u8 = 15;

/// The single active-maneuver slot.
struct ActiveManeuver {
    id: u64,
    kind: ManeuverKind,
    cancel: CancellationToken,
    /// Held here while waiting for confirmation; moved to the runner on start.
    awaiting: Option<watch::Sender<ManeuverState>>,
}

struct Inner {
    session: Arc<Session>,
    tracker: Arc<AxisTracker>,
    config: MotionConfig,
    surface: Mutex<Option<f64>>,
    active: Mutex<Option<ActiveManeuver>>,
    next_id: AtomicU64,
}

/// Outbound control API for one manipulator.
///
/// Holds the session it drives and the tracker fed by that session. Cloning
/// is cheap and every clone shares the same active-maneuver slot.
#[derive(Clone)]
pub struct Manipulator {
    inner: Arc<Inner>,
}

impl Manipulator {
    /// Attach to `session` and start tracking its reports.
    pub fn new(session: Arc<Session>, config: MotionConfig) -> Self {
        let tracker = Arc::new(AxisTracker::new(config.tracker.clone()));
        session.add_observer(tracker.clone());
        Self {
            inner: Arc::new(Inner {
                session,
                tracker,
                config,
                surface: Mutex::new(None),
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn tracker(&self) -> &Arc<AxisTracker> {
        &self.inner.tracker
    }

    pub fn config(&self) -> &MotionConfig {
        &self.inner.config
    }

    /// Latest tracked state of `axis`.
    pub fn read(&self, axis: Axis) -> AxisState {
        self.inner.tracker.read(axis)
    }

    /// Latest tracked state of every axis.
    pub fn positions(&self) -> TrackedState {
        self.inner.tracker.snapshot()
    }

    /// Position reports and heartbeats, for display.
    pub fn notifications(&self) -> Notifications {
        self.inner.session.subscribe()
    }

    pub fn set_surface_reference(&self, position: f64) {
        info!(position, "surface reference set");
        *self.inner.surface.lock() = Some(position);
    }

    pub fn clear_surface_reference(&self) {
        *self.inner.surface.lock() = None;
    }

    pub fn surface_reference(&self) -> Option<f64> {
        *self.inner.surface.lock()
    }

    async fn send(&self, axis: Axis, kind: CommandKind) -> Result<Ack> {
        Ok(self.inner.session.send(Command::new(axis, kind)).await?)
    }

    pub async fn enable_axis(&self, axis: Axis) -> Result<()> {
        self.send(axis, CommandKind::Enable).await?;
        self.inner.tracker.note_enabled(axis, true);
        Ok(())
    }

    pub async fn disable_axis(&self, axis: Axis) -> Result<()> {
        self.send(axis, CommandKind::Disable).await?;
        self.inner.tracker.note_enabled(axis, false);
        Ok(())
    }

    /// Select velocity stage `stage` (1..=15) for `mode`.
    ///
    /// Fast stages on the depth axis are refused while the pipette is inside
    /// the sample.
    pub async fn set_velocity(&self, axis: Axis, stage: u8, mode: SpeedMode) -> Result<()> {
        if !(1..=MAX_VELOCITY_STAGE).contains(&stage) {
            return Err(MotionError::InvalidVelocity(stage));
        }
        let limits = &self.inner.config.limits;
        if axis == limits.depth_axis && stage > limits.inside_sample_max_velocity {
            let depth = self.read(axis).known_position();
            if let (Some(depth), Some(surface)) = (depth, self.surface_reference()) {
                if is_inside_sample(depth, surface, limits.surface_epsilon) {
                    return Err(MotionError::Blocked(format!(
                        "velocity stage {stage} exceeds {} while inside sample",
                        limits.inside_sample_max_velocity
                    )));
                }
            }
        }
        self.send(axis, CommandKind::SetVelocity { mode, stage }).await?;
        self.inner.tracker.note_velocity(axis, mode, stage);
        Ok(())
    }

    pub async fn set_speed_mode(&self, axis: Axis, mode: SpeedMode) -> Result<()> {
        self.send(axis, CommandKind::SetSpeedMode(mode)).await?;
        self.inner.tracker.note_speed_mode(axis, mode);
        Ok(())
    }

    fn check_direct_move(&self, axis: Axis) -> Result<AxisState> {
        if self.inner.active.lock().is_some() {
            return Err(MotionError::Busy);
        }
        let state = self.read(axis);
        if state.moving {
            return Err(MotionError::AxisMoving(axis));
        }
        Ok(state)
    }

    fn check_depth_limit(&self, axis: Axis, target: f64) -> Result<()> {
        let limits = &self.inner.config.limits;
        if axis == limits.depth_axis && !limits.depth_in_range(target) {
            return Err(MotionError::LimitExceeded {
                axis,
                target,
                min: limits.depth_min,
                max: limits.depth_max,
            });
        }
        Ok(())
    }

    /// Move `axis` by `delta` µm at its current speed mode.
    pub async fn move_relative(&self, axis: Axis, delta: f64) -> Result<Ack> {
        let state = self.check_direct_move(axis)?;
        if axis == self.inner.config.limits.depth_axis {
            let position = state
                .known_position()
                .ok_or_else(|| MotionError::Blocked("depth position unknown".into()))?;
            self.check_depth_limit(axis, position + delta)?;
        }
        let mode = state.speed_mode;
        self.send_move(axis, CommandKind::MoveRelative { delta, mode })
            .await
    }

    /// Move `axis` to `target` µm at its current speed mode.
    pub async fn move_absolute(&self, axis: Axis, target: f64) -> Result<Ack> {
        let state = self.check_direct_move(axis)?;
        self.check_depth_limit(axis, target)?;
        let mode = state.speed_mode;
        self.send_move(axis, CommandKind::MoveAbsolute { target, mode })
            .await
    }

    /// Send a motion command with an optimistic moving flag that is withdrawn
    /// if the command fails.
    async fn send_move(&self, axis: Axis, kind: CommandKind) -> Result<Ack> {
        self.inner.tracker.mark_moving(axis);
        match self.send(axis, kind).await {
            Ok(ack) => Ok(ack),
            Err(err) => {
                self.inner.tracker.clear_moving(axis);
                Err(err)
            }
        }
    }

    pub async fn stop(&self, axis: Axis) -> Result<()> {
        self.send(axis, CommandKind::Stop).await?;
        Ok(())
    }

    /// Stop every axis, returning the first failure after trying all of them.
    pub async fn stop_all(&self) -> Result<()> {
        self.stop_axes(&Axis::ALL).await
    }

    async fn stop_axes(&self, axes: &[Axis]) -> Result<()> {
        let mut first_err = None;
        for &axis in axes {
            if let Err(err) = self.stop(axis).await {
                warn!(axis = %axis, error = %err, "stop failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Request a position report for `axis`.
    pub async fn poll(&self, axis: Axis) -> Result<()> {
        self.send(axis, CommandKind::Poll).await?;
        Ok(())
    }

    /// Poll every axis and wait until each has reported.
    pub async fn refresh(&self) -> Result<TrackedState> {
        let mut rx = self.inner.tracker.watch();
        let baseline = self.positions();
        for axis in Axis::ALL {
            self.poll(axis).await?;
        }
        let after = self.inner.session.config().command_timeout;
        let fresh = |state: &TrackedState| {
            Axis::ALL
                .iter()
                .all(|axis| state.axis(*axis).reports > baseline.axis(*axis).reports)
        };
        let refreshed = match tokio::time::timeout(after, rx.wait_for(fresh)).await {
            Ok(Ok(state)) => Ok(*state),
            _ => Err(MotionError::NoReport { after }),
        };
        refreshed
    }

    /// Poll all axes every `interval` until the returned [`Poller`] is
    /// stopped or dropped, or the session disconnects.
    pub fn spawn_poller(&self, interval: Duration) -> Poller {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for axis in Axis::ALL {
                    match this.poll(axis).await {
                        Ok(()) => {}
                        Err(MotionError::Session(err)) if err.is_disconnect() => {
                            warn!("poller stopped: session disconnected");
                            return;
                        }
                        Err(err) => warn!(axis = %axis, error = %err, "poll failed"),
                    }
                }
                this.inner.tracker.check_staleness(Instant::now());
            }
            debug!("poller stopped");
        });
        Poller { cancel, task }
    }

    /// Start a maneuver.
    ///
    /// Returns [`MotionError::Busy`] if another maneuver is active. When the
    /// safety policy asks for confirmation the handle starts in
    /// `Requested { warning: Some(..) }` and nothing moves until
    /// [`confirm_maneuver`](Self::confirm_maneuver).
    pub fn start_maneuver(&self, kind: ManeuverKind) -> Result<ManeuverHandle> {
        let mut active = self.inner.active.lock();
        if active.is_some() {
            return Err(MotionError::Busy);
        }

        let surface = self.surface_reference();
        let limits = &self.inner.config.limits;
        match kind {
            ManeuverKind::Approach { target } => {
                self.check_depth_limit(limits.depth_axis, target)?
            }
            ManeuverKind::Retract | ManeuverKind::MoveAway if surface.is_none() => {
                return Err(MotionError::NoSurfaceReference)
            }
            _ => {}
        }

        self.inner.tracker.check_staleness(Instant::now());
        let state = self.inner.tracker.snapshot();
        for step in plan(&kind, &state, surface, &self.inner.config) {
            if state.axis(step.axis).moving {
                return Err(MotionError::AxisMoving(step.axis));
            }
        }

        let verdict = evaluate(&kind, &state, surface, limits);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(ManeuverState::Requested { warning: None });
        let handle = ManeuverHandle::new(id, kind, rx);
        let cancel = CancellationToken::new();

        match verdict {
            SafetyVerdict::Block(reason) => {
                warn!(maneuver = %kind, reason = %reason, "maneuver blocked");
                return Err(MotionError::Blocked(reason));
            }
            SafetyVerdict::WarnRequireConfirm(reason) => {
                info!(maneuver = %kind, id, reason = %reason, "maneuver awaiting confirmation");
                tx.send_replace(ManeuverState::Requested {
                    warning: Some(reason),
                });
                *active = Some(ActiveManeuver {
                    id,
                    kind,
                    cancel,
                    awaiting: Some(tx),
                });
            }
            SafetyVerdict::Allow => {
                *active = Some(ActiveManeuver {
                    id,
                    kind,
                    cancel: cancel.clone(),
                    awaiting: None,
                });
                self.launch(id, kind, tx, cancel);
            }
        }
        Ok(handle)
    }

    /// Proceed with a maneuver that is waiting for confirmation.
    pub fn confirm_maneuver(&self, handle: &ManeuverHandle) -> Result<()> {
        let mut active = self.inner.active.lock();
        let slot = match active.as_mut() {
            Some(slot) if slot.id == handle.id() => slot,
            _ => return Err(MotionError::NotAwaitingConfirmation),
        };
        let tx = slot
            .awaiting
            .take()
            .ok_or(MotionError::NotAwaitingConfirmation)?;
        let (id, kind, cancel) = (slot.id, slot.kind, slot.cancel.clone());

        // State may have changed while the caller deliberated.
        self.inner.tracker.check_staleness(Instant::now());
        let verdict = evaluate(
            &kind,
            &self.inner.tracker.snapshot(),
            self.surface_reference(),
            &self.inner.config.limits,
        );
        if let SafetyVerdict::Block(reason) = verdict {
            *active = None;
            tx.send_replace(ManeuverState::Failed(reason.clone()));
            warn!(maneuver = %kind, id, reason = %reason, "confirmed maneuver blocked");
            return Err(MotionError::Blocked(reason));
        }

        info!(maneuver = %kind, id, "maneuver confirmed");
        self.launch(id, kind, tx, cancel);
        Ok(())
    }

    /// Abort a maneuver and wait for it to wind down.
    ///
    /// Affected axes are sent a stop before the slot is released. Aborting a
    /// maneuver that already finished returns its terminal state.
    pub async fn abort_maneuver(&self, handle: &ManeuverHandle) -> Result<ManeuverState> {
        {
            let mut active = self.inner.active.lock();
            if let Some(slot) = active.as_mut().filter(|slot| slot.id == handle.id()) {
                match slot.awaiting.take() {
                    Some(tx) => {
                        *active = None;
                        tx.send_replace(ManeuverState::Aborted("cancelled before start".into()));
                        info!(maneuver = %handle.kind(), id = handle.id(), "maneuver aborted");
                        return Ok(handle.state());
                    }
                    None => slot.cancel.cancel(),
                }
            }
        }
        Ok(handle.wait().await)
    }

    fn launch(
        &self,
        id: u64,
        kind: ManeuverKind,
        tx: watch::Sender<ManeuverState>,
        cancel: CancellationToken,
    ) {
        let steps = plan(
            &kind,
            &self.inner.tracker.snapshot(),
            self.surface_reference(),
            &self.inner.config,
        );
        tx.send_replace(ManeuverState::InProgress {
            step: 0,
            of: steps.len(),
        });
        info!(maneuver = %kind, id, steps = steps.len(), "maneuver started");
        let generation = self.inner.session.link_generation();
        let this = self.clone();
        tokio::spawn(async move {
            this.run(id, kind, steps, generation, tx, cancel).await
        });
    }

    async fn run(
        self,
        id: u64,
        kind: ManeuverKind,
        steps: Vec<ManeuverStep>,
        generation: u64,
        tx: watch::Sender<ManeuverState>,
        cancel: CancellationToken,
    ) {
        let session = &self.inner.session;
        let mut link = session.state_changes();
        // A replaced link counts as lost even if the watch only shows the new state.
        let link_lost = |state: &SessionState| {
            *state == SessionState::Disconnected || session.link_generation() != generation
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => ManeuverState::Aborted("cancelled".into()),
            _ = link.wait_for(link_lost) => {
                ManeuverState::Aborted("session disconnected".into())
            }
            outcome = self.execute(&steps, &tx) => outcome,
        };

        if !matches!(outcome, ManeuverState::Completed) {
            let mut affected: Vec<Axis> = steps.iter().map(|step| step.axis).collect();
            affected.sort();
            affected.dedup();
            // Best effort; a dead link has already stopped talking to the device.
            let _ = self.stop_axes(&affected).await;
            // A step cut off mid-send leaves its optimistic flag behind. Stale
            // axes keep theirs: their position is still unknown.
            for &axis in &affected {
                if !self.read(axis).stale {
                    self.inner.tracker.clear_moving(axis);
                }
            }
        }

        {
            let mut active = self.inner.active.lock();
            if active.as_ref().is_some_and(|slot| slot.id == id) {
                *active = None;
            }
        }

        match &outcome {
            ManeuverState::Completed => info!(maneuver = %kind, id, "maneuver completed"),
            other => warn!(maneuver = %kind, id, state = %other, "maneuver ended"),
        }
        tx.send_replace(outcome);
    }

    async fn execute(
        &self,
        steps: &[ManeuverStep],
        tx: &watch::Sender<ManeuverState>,
    ) -> ManeuverState {
        let of = steps.len();
        for (index, step) in steps.iter().enumerate() {
            tx.send_replace(ManeuverState::InProgress { step: index, of });

            self.inner.tracker.check_staleness(Instant::now());
            let verdict = evaluate_step(
                step,
                &self.inner.tracker.snapshot(),
                self.surface_reference(),
                &self.inner.config.limits,
            );
            if let SafetyVerdict::Block(reason) = verdict {
                return ManeuverState::Failed(reason);
            }

            let target = match step.target {
                StepTarget::Absolute(target) => target,
                StepTarget::Offset(offset) => match self.read(step.axis).known_position() {
                    Some(position) => position + offset,
                    None => {
                        return ManeuverState::Failed(format!(
                            "axis {} position unknown",
                            step.axis
                        ))
                    }
                },
            };

            debug!(step = index, axis = %step.axis, target, "maneuver step");
            let kind = CommandKind::MoveAbsolute {
                target,
                mode: step.mode,
            };
            if let Err(err) = self.send_move(step.axis, kind).await {
                return terminal_for(err);
            }
            if let Err(state) = self.settle(step.axis, target).await {
                return state;
            }
        }
        ManeuverState::Completed
    }

    /// Wait until `axis` is idle within tolerance of `target`.
    ///
    /// Only reports applied after the move was acknowledged can prove the
    /// axis stopped short; earlier ones may predate the move.
    async fn settle(&self, axis: Axis, target: f64) -> std::result::Result<(), ManeuverState> {
        let config = &self.inner.config;
        let mut rx = self.inner.tracker.watch();
        let baseline = self.read(axis).reports;
        let deadline = Instant::now() + config.settle_timeout;
        let mut ticker =
            tokio::time::interval_at(Instant::now() + config.poll_interval, config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let state = *rx.borrow_and_update().axis(axis);
            if state.stale {
                return Err(ManeuverState::Failed(format!(
                    "axis {axis} position unknown: no reports while moving"
                )));
            }
            if let (false, Some(position)) = (state.moving, state.position) {
                if (position - target).abs() <= config.position_tolerance {
                    return Ok(());
                }
                if state.reports > baseline {
                    return Err(ManeuverState::Failed(format!(
                        "axis {axis} stopped at {position:.2}um, target {target:.2}um"
                    )));
                }
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ManeuverState::Aborted("tracker closed".into()));
                    }
                }
                _ = ticker.tick() => {
                    self.inner.tracker.check_staleness(Instant::now());
                    if let Err(err) = self.poll(axis).await {
                        return Err(terminal_for(err));
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ManeuverState::Failed(format!(
                        "axis {axis} did not settle within {:?}",
                        config.settle_timeout
                    )));
                }
            }
        }
    }
}

/// Disconnects abort; every other failure fails the maneuver.
fn terminal_for(err: MotionError) -> ManeuverState {
    match err {
        MotionError::Session(SessionError::Disconnected) => {
            ManeuverState::Aborted("session disconnected".into())
        }
        other => ManeuverState::Failed(other.to_string()),
    }
}

impl std::fmt::Debug for Manipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manipulator")
            .field("session", &self.inner.session)
            .field("surface", &self.surface_reference())
            .finish_non_exhaustive()
    }
}

/// Background position poller started by [`Manipulator::spawn_poller`].
///
/// Stops when dropped.
#[derive(Debug)]
pub struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Poller {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the current round to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
