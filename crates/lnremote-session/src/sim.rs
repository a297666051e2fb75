//! In-process emulation of a three-axis SM10 control unit.
//!
//! Used for the `dummy` connection and for end-to-end tests. The device runs
//! on the far end of an in-memory duplex stream, acknowledges commands,
//! rejects moves on disabled axes, moves axes at a finite speed while sending
//! position reports, and answers polls with an ACK followed by a report.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lnremote_protocol::{
    Axis, CodecConfig, Command, CommandKind, DeviceCodec, Frame, NackReason, SpeedMode,
};
use lnremote_transport::DeviceStream;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::session::Session;

const MAX_VELOCITY_STAGE: u8 = 15;

/// Behaviour of the simulated unit.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Axis speed in µm/s at velocity stage 15 in fast mode.
    pub max_speed: f64,
    /// Fraction of `max_speed` used in slow mode.
    pub slow_factor: f64,
    /// Motion integration step.
    pub tick: Duration,
    /// Heartbeat period; `None` disables heartbeats.
    pub heartbeat: Option<Duration>,
    /// Starting positions (µm) for X, Y, Z.
    pub initial_positions: [f64; 3],
    /// Whether axes start powered.
    pub start_enabled: bool,
    pub codec: CodecConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_speed: 4000.0,
            slow_factor: 0.25,
            tick: Duration::from_millis(50),
            heartbeat: Some(Duration::from_secs(1)),
            initial_positions: [0.0; 3],
            start_enabled: true,
            codec: CodecConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimAxis {
    position: f64,
    target: f64,
    moving: bool,
    enabled: bool,
    stage: u8,
    mode: SpeedMode,
}

impl SimAxis {
    fn report(&self, axis: Axis) -> Frame {
        Frame::PositionReport {
            axis,
            position: self.position,
            moving: self.moving,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug)]
struct SimState {
    axes: [SimAxis; 3],
    received: Vec<Command>,
    drop_responses: bool,
    mute_reports: bool,
}

/// Handle to a running simulated device.
///
/// Dropping the handle (or calling [`disconnect`](Self::disconnect)) closes
/// the device end of the stream.
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
    task: JoinHandle<()>,
}

impl SimulatedDevice {
    /// Run the device on `stream`.
    pub fn spawn(stream: DeviceStream, config: SimConfig) -> Self {
        let axis = |position: f64| SimAxis {
            position,
            target: position,
            moving: false,
            enabled: config.start_enabled,
            stage: MAX_VELOCITY_STAGE,
            mode: SpeedMode::Slow,
        };
        let [x, y, z] = config.initial_positions;
        let state = Arc::new(Mutex::new(SimState {
            axes: [axis(x), axis(y), axis(z)],
            received: Vec::new(),
            drop_responses: false,
            mute_reports: false,
        }));
        let task = tokio::spawn(run(stream, config, Arc::clone(&state)));
        Self { state, task }
    }

    /// Start a device and a session connected to it.
    pub async fn connect(config: SimConfig, session_config: SessionConfig) -> (Session, Self) {
        let (host, device) = DeviceStream::memory_pair(4096);
        let device = Self::spawn(device, config);
        (Session::with_stream(host, session_config).await, device)
    }

    /// Silently swallow commands (no ACK, no effect) while set.
    pub fn set_drop_responses(&self, drop: bool) {
        self.state.lock().drop_responses = drop;
    }

    /// Suppress position reports while set.
    pub fn set_mute_reports(&self, mute: bool) {
        self.state.lock().mute_reports = mute;
    }

    /// Ground-truth position of `axis`.
    pub fn position(&self, axis: Axis) -> f64 {
        self.state.lock().axes[axis.index()].position
    }

    /// Every command received so far, in order.
    pub fn received(&self) -> Vec<Command> {
        self.state.lock().received.clone()
    }

    /// Drop the link.
    pub fn disconnect(&self) {
        self.task.abort();
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(stream: DeviceStream, config: SimConfig, state: Arc<Mutex<SimState>>) {
    let mut framed = Framed::new(stream, DeviceCodec::new(config.codec.clone()));
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat_every = config
        .heartbeat
        .map(|period| (period.as_millis() / config.tick.as_millis().max(1)).max(1) as u64);
    let mut ticks: u64 = 0;

    loop {
        let outgoing = tokio::select! {
            item = framed.next() => match item {
                Some(Ok(Ok(command))) => handle(&state, command),
                Some(Ok(Err(err))) => {
                    debug!(error = %err, "simulator discarded unit");
                    Vec::new()
                }
                Some(Err(_)) | None => break,
            },
            _ = ticker.tick() => {
                ticks += 1;
                let mut frames = advance(&state, &config);
                if heartbeat_every.is_some_and(|n| ticks % n == 0) {
                    frames.push(Frame::Heartbeat);
                }
                frames
            }
        };
        for frame in outgoing {
            if framed.send(frame).await.is_err() {
                return;
            }
        }
    }
    debug!("simulated device stopped");
}

fn handle(state: &Mutex<SimState>, command: Command) -> Vec<Frame> {
    let mut state = state.lock();
    state.received.push(command);
    if state.drop_responses {
        trace!(%command, "dropping command");
        return Vec::new();
    }

    let seq = command.seq;
    let mute = state.mute_reports;
    let axis = &mut state.axes[command.axis.index()];
    let nack = |reason| vec![Frame::CommandNack { seq, reason }];
    let mut out = vec![Frame::CommandAck { seq }];

    match command.kind {
        CommandKind::MoveAbsolute { target, mode }
        | CommandKind::MoveRelative {
            delta: target,
            mode,
        } => {
            if !axis.enabled {
                return nack(NackReason::AxisDisabled);
            }
            axis.target = match command.kind {
                CommandKind::MoveRelative { .. } => axis.position + target,
                _ => target,
            };
            axis.mode = mode;
            axis.moving = axis.target != axis.position;
            if !mute {
                out.push(axis.report(command.axis));
            }
        }
        CommandKind::SetVelocity { mode, stage } => {
            if !(1..=MAX_VELOCITY_STAGE).contains(&stage) {
                return nack(NackReason::InvalidArgument);
            }
            axis.stage = stage;
            axis.mode = mode;
        }
        CommandKind::SetSpeedMode(mode) => axis.mode = mode,
        CommandKind::Enable => axis.enabled = true,
        CommandKind::Disable => {
            axis.enabled = false;
            axis.target = axis.position;
            axis.moving = false;
        }
        CommandKind::Stop => {
            axis.target = axis.position;
            axis.moving = false;
            if !mute {
                out.push(axis.report(command.axis));
            }
        }
        CommandKind::Poll => {
            if !mute {
                out.push(axis.report(command.axis));
            }
        }
    }
    out
}

fn advance(state: &Mutex<SimState>, config: &SimConfig) -> Vec<Frame> {
    let mut state = state.lock();
    let mute = state.mute_reports;
    let dt = config.tick.as_secs_f64();
    let mut out = Vec::new();

    for axis in Axis::ALL {
        let sim = &mut state.axes[axis.index()];
        if !sim.moving {
            continue;
        }
        let mode_factor = match sim.mode {
            SpeedMode::Fast => 1.0,
            SpeedMode::Slow => config.slow_factor,
        };
        let step = config.max_speed * mode_factor * f64::from(sim.stage)
            / f64::from(MAX_VELOCITY_STAGE)
            * dt;
        let remaining = sim.target - sim.position;
        if remaining.abs() <= step {
            sim.position = sim.target;
            sim.moving = false;
        } else {
            sim.position += step.copysign(remaining);
        }
        if !mute {
            out.push(sim.report(axis));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    async fn device(config: SimConfig) -> (Session, SimulatedDevice) {
        SimulatedDevice::connect(config, SessionConfig::default()).await
    }

    #[tokio::test(start_paused = true)]
    async fn moves_at_finite_speed_and_reports() {
        let (session, sim) = device(SimConfig::default()).await;
        let mut notifications = session.subscribe();

        session
            .send(Command::new(
                Axis::Y,
                CommandKind::MoveAbsolute {
                    target: 500.0,
                    mode: SpeedMode::Fast,
                },
            ))
            .await
            .unwrap();

        loop {
            if let Some(Frame::PositionReport {
                axis: Axis::Y,
                position,
                moving: false,
                ..
            }) = notifications.next().await
            {
                assert_eq!(position, 500.0);
                break;
            }
        }
        assert_eq!(sim.position(Axis::Y), 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_moves_on_disabled_axis() {
        let (session, sim) = device(SimConfig::default()).await;

        session
            .send(Command::new(Axis::X, CommandKind::Disable))
            .await
            .unwrap();
        let result = session
            .send(Command::new(
                Axis::X,
                CommandKind::MoveRelative {
                    delta: 10.0,
                    mode: SpeedMode::Slow,
                },
            ))
            .await;

        assert!(matches!(
            result,
            Err(SessionError::Rejected {
                reason: NackReason::AxisDisabled,
                ..
            })
        ));
        assert_eq!(sim.position(Axis::X), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_answers_with_ack_then_report() {
        let config = SimConfig {
            initial_positions: [12.5, 0.0, 0.0],
            heartbeat: None,
            ..SimConfig::default()
        };
        let (session, _sim) = device(config).await;
        let mut notifications = session.subscribe();

        session
            .send(Command::new(Axis::X, CommandKind::Poll))
            .await
            .unwrap();
        assert_eq!(
            notifications.next().await,
            Some(Frame::PositionReport {
                axis: Axis::X,
                position: 12.5,
                moving: false,
                enabled: true,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_responses_time_out() {
        let (session, sim) = device(SimConfig::default()).await;
        sim.set_drop_responses(true);

        let result = session
            .send(Command::new(Axis::Z, CommandKind::Enable))
            .await;
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert_eq!(sim.received().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_closes_session() {
        let (session, sim) = device(SimConfig::default()).await;
        sim.disconnect();
        session
            .state_changes()
            .wait_for(|s| *s == crate::SessionState::Disconnected)
            .await
            .unwrap();
    }
}
