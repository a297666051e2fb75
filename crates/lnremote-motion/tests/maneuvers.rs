//! End-to-end maneuver tests against the simulated control unit.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lnremote_motion::{
    evaluate, ManeuverKind, ManeuverState, Manipulator, MotionConfig, MotionError, SafetyVerdict,
};
use lnremote_protocol::{Axis, Command, CommandKind, Frame, SpeedMode};
use lnremote_session::{SessionConfig, SessionError, SimConfig, SimulatedDevice};
use lnremote_transport::DeviceStream;

const TOLERANCE: f64 = 0.5;

async fn rig_unpolled(initial: [f64; 3]) -> (Manipulator, SimulatedDevice) {
    let sim_config = SimConfig {
        initial_positions: initial,
        ..SimConfig::default()
    };
    let (session, sim) = SimulatedDevice::connect(sim_config, SessionConfig::default()).await;
    let manipulator = Manipulator::new(Arc::new(session), MotionConfig::default());
    (manipulator, sim)
}

async fn rig(initial: [f64; 3]) -> (Manipulator, SimulatedDevice) {
    let (manipulator, sim) = rig_unpolled(initial).await;
    manipulator.refresh().await.expect("initial refresh");
    (manipulator, sim)
}

fn moves(commands: &[Command]) -> Vec<(Axis, f64)> {
    commands
        .iter()
        .filter_map(|cmd| match cmd.kind {
            CommandKind::MoveAbsolute { target, .. } => Some((cmd.axis, target)),
            _ => None,
        })
        .collect()
}

fn assert_near(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("position known");
    assert!(
        (actual - expected).abs() <= TOLERANCE,
        "expected {expected} +/- {TOLERANCE}, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn move_away_from_inside_sample_retracts_then_withdraws() {
    let (manipulator, sim) = rig([40.0, 0.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);

    let verdict = evaluate(
        &ManeuverKind::MoveAway,
        &manipulator.positions(),
        manipulator.surface_reference(),
        &manipulator.config().limits,
    );
    assert_eq!(verdict, SafetyVerdict::WarnRequireConfirm("inside sample".into()));

    let before = sim.received().len();
    let handle = manipulator.start_maneuver(ManeuverKind::MoveAway).unwrap();
    assert_eq!(
        handle.state(),
        ManeuverState::Requested {
            warning: Some("inside sample".into())
        }
    );

    // Nothing moves before confirmation.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(moves(&sim.received()[before..]).is_empty());

    manipulator.confirm_maneuver(&handle).unwrap();
    assert_eq!(handle.wait().await, ManeuverState::Completed);

    let issued = moves(&sim.received()[before..]);
    assert_eq!(issued, vec![(Axis::X, 100.0), (Axis::Y, 10_000.0)]);
    assert_near(manipulator.read(Axis::X).position, 100.0);
    assert_near(manipulator.read(Axis::Y).position, 10_000.0);
}

#[tokio::test(start_paused = true)]
async fn move_away_above_surface_skips_retract() {
    let (manipulator, sim) = rig([150.0, 20.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);

    let before = sim.received().len();
    let handle = manipulator.start_maneuver(ManeuverKind::MoveAway).unwrap();
    assert_eq!(handle.wait().await, ManeuverState::Completed);

    assert_eq!(moves(&sim.received()[before..]), vec![(Axis::Y, 10_020.0)]);
    assert_near(manipulator.read(Axis::X).position, 150.0);
}

#[tokio::test(start_paused = true)]
async fn second_maneuver_is_rejected_while_one_is_active() {
    let (manipulator, sim) = rig([0.0, 0.0, 0.0]).await;

    let first = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -20_000.0 })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let state_before = first.state();
    assert!(matches!(state_before, ManeuverState::InProgress { .. }));

    for kind in [ManeuverKind::Return, ManeuverKind::Approach { target: 5.0 }] {
        assert!(matches!(
            manipulator.start_maneuver(kind),
            Err(MotionError::Busy)
        ));
    }
    assert!(matches!(
        manipulator.move_absolute(Axis::Y, 10.0).await,
        Err(MotionError::Busy)
    ));
    assert_eq!(first.state(), state_before);

    let before = sim.received().len();
    let end = manipulator.abort_maneuver(&first).await.unwrap();
    assert_eq!(end, ManeuverState::Aborted("cancelled".into()));
    assert!(sim.received()[before..]
        .iter()
        .any(|cmd| cmd.axis == Axis::X && cmd.kind == CommandKind::Stop));

    // Slot released.
    let next = manipulator.start_maneuver(ManeuverKind::Return).unwrap();
    assert_eq!(next.wait().await, ManeuverState::Completed);
}

#[tokio::test(start_paused = true)]
async fn retract_then_approach_to_surface_round_trips() {
    let (manipulator, _sim) = rig([-300.0, 0.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);

    let retract = manipulator.start_maneuver(ManeuverKind::Retract).unwrap();
    assert_eq!(retract.wait().await, ManeuverState::Completed);
    assert_near(manipulator.read(Axis::X).position, 100.0);

    let approach = manipulator
        .start_maneuver(ManeuverKind::Approach { target: 100.0 })
        .unwrap();
    assert_eq!(approach.wait().await, ManeuverState::Completed);
    assert_near(manipulator.read(Axis::X).position, 100.0);
}

#[tokio::test(start_paused = true)]
async fn return_never_commands_the_depth_axis() {
    for initial in [
        [40.0, 500.0, -200.0],
        [100.0, 0.0, 0.0],
        [-2_000.0, -10_000.0, 3_000.0],
        [9_000.0, 1.0, 1.0],
    ] {
        let (manipulator, sim) = rig(initial).await;
        manipulator.set_surface_reference(100.0);

        let before = sim.received().len();
        let handle = manipulator.start_maneuver(ManeuverKind::Return).unwrap();
        assert_eq!(handle.wait().await, ManeuverState::Completed);

        let issued = &sim.received()[before..];
        assert!(!issued.is_empty());
        assert!(
            issued.iter().all(|cmd| cmd.axis != Axis::X),
            "depth axis commanded from {initial:?}"
        );
        assert_eq!(sim.position(Axis::X), initial[0]);
        assert_near(manipulator.read(Axis::Y).position, 0.0);
        assert_near(manipulator.read(Axis::Z).position, 0.0);
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_move_clears_optimistic_moving_flag() {
    let (manipulator, sim) = rig_unpolled([0.0; 3]).await;

    // Six commands so the move gets sequence number 7.
    for axis in Axis::ALL {
        manipulator.enable_axis(axis).await.unwrap();
    }
    for axis in Axis::ALL {
        manipulator.poll(axis).await.unwrap();
    }

    sim.set_drop_responses(true);
    let result = manipulator.move_absolute(Axis::X, 50.0).await;
    assert!(matches!(
        result,
        Err(MotionError::Session(SessionError::Timeout { seq: 7, .. }))
    ));
    assert!(!manipulator.read(Axis::X).moving);
}

#[tokio::test(start_paused = true)]
async fn stale_reports_fail_maneuver_and_block_new_ones() {
    let (manipulator, sim) = rig([0.0, 0.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);
    sim.set_mute_reports(true);

    let handle = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -5_000.0 })
        .unwrap();
    match handle.wait().await {
        ManeuverState::Failed(reason) => assert!(reason.contains("position unknown"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(manipulator.read(Axis::X).stale);

    assert!(matches!(
        manipulator.start_maneuver(ManeuverKind::Return),
        Err(MotionError::Blocked(_))
    ));

    // A fresh report reconciles the tracker.
    sim.set_mute_reports(false);
    manipulator.refresh().await.unwrap();
    assert!(!manipulator.positions().any_stale());
}

#[tokio::test(start_paused = true)]
async fn disconnect_aborts_in_flight_maneuver() {
    let (manipulator, sim) = rig([0.0, 0.0, 0.0]).await;

    let handle = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -20_000.0 })
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    sim.disconnect();

    assert_eq!(
        handle.wait().await,
        ManeuverState::Aborted("session disconnected".into())
    );
    // The slot was released even though the link is gone.
    assert!(!matches!(
        manipulator.start_maneuver(ManeuverKind::Return),
        Err(MotionError::Busy)
    ));
}

#[tokio::test(start_paused = true)]
async fn reconnect_aborts_in_flight_maneuver() {
    let (manipulator, _sim) = rig([0.0, 0.0, 0.0]).await;

    let handle = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -20_000.0 })
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (host, device) = DeviceStream::memory_pair(4096);
    let _replacement = SimulatedDevice::spawn(device, SimConfig::default());
    manipulator.session().reconnect_with(host).await;

    assert_eq!(
        handle.wait().await,
        ManeuverState::Aborted("session disconnected".into())
    );
}

#[tokio::test(start_paused = true)]
async fn abort_during_unacknowledged_move_clears_moving_flag() {
    let (manipulator, sim) = rig([0.0, 0.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);
    sim.set_drop_responses(true);

    let handle = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -5_000.0 })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manipulator.read(Axis::X).moving);

    assert_eq!(
        manipulator.abort_maneuver(&handle).await.unwrap(),
        ManeuverState::Aborted("cancelled".into())
    );
    assert!(!manipulator.read(Axis::X).moving);
    assert!(!manipulator.read(Axis::X).stale);
}

#[tokio::test(start_paused = true)]
async fn external_stop_fails_maneuver() {
    let (manipulator, _sim) = rig([0.0, 0.0, 0.0]).await;

    let handle = manipulator
        .start_maneuver(ManeuverKind::Approach { target: -20_000.0 })
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    manipulator.stop(Axis::X).await.unwrap();

    match handle.wait().await {
        ManeuverState::Failed(reason) => assert!(reason.contains("stopped at"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn nack_fails_maneuver() {
    let (manipulator, _sim) = rig([0.0, 300.0, 0.0]).await;
    manipulator.disable_axis(Axis::Y).await.unwrap();

    let handle = manipulator.start_maneuver(ManeuverKind::Return).unwrap();
    match handle.wait().await {
        ManeuverState::Failed(reason) => assert!(reason.contains("rejected"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn pre_checks_reject_without_starting() {
    let (manipulator, sim) = rig([40.0, 0.0, 0.0]).await;
    let before = sim.received().len();

    assert!(matches!(
        manipulator.start_maneuver(ManeuverKind::Retract),
        Err(MotionError::NoSurfaceReference)
    ));
    assert!(matches!(
        manipulator.start_maneuver(ManeuverKind::MoveAway),
        Err(MotionError::NoSurfaceReference)
    ));
    assert!(matches!(
        manipulator.start_maneuver(ManeuverKind::Approach { target: 1.0e6 }),
        Err(MotionError::LimitExceeded { axis: Axis::X, .. })
    ));
    assert!(matches!(
        manipulator.move_absolute(Axis::X, -1.0e6).await,
        Err(MotionError::LimitExceeded { .. })
    ));

    assert_eq!(sim.received().len(), before);
    let handle = manipulator.start_maneuver(ManeuverKind::Return).unwrap();
    assert_eq!(handle.wait().await, ManeuverState::Completed);
}

#[tokio::test(start_paused = true)]
async fn requested_maneuver_can_be_aborted_or_confirmed_once() {
    let (manipulator, _sim) = rig([40.0, 0.0, 0.0]).await;
    manipulator.set_surface_reference(100.0);

    let handle = manipulator.start_maneuver(ManeuverKind::MoveAway).unwrap();
    let end = manipulator.abort_maneuver(&handle).await.unwrap();
    assert!(matches!(end, ManeuverState::Aborted(_)));
    assert!(matches!(
        manipulator.confirm_maneuver(&handle),
        Err(MotionError::NotAwaitingConfirmation)
    ));

    let handle = manipulator.start_maneuver(ManeuverKind::MoveAway).unwrap();
    manipulator.confirm_maneuver(&handle).unwrap();
    assert!(matches!(
        manipulator.confirm_maneuver(&handle),
        Err(MotionError::NotAwaitingConfirmation)
    ));
    assert_eq!(handle.wait().await, ManeuverState::Completed);
}

#[tokio::test(start_paused = true)]
async fn direct_moves_guard_against_racing_commands() {
    let (manipulator, sim) = rig([0.0, 0.0, 0.0]).await;

    manipulator.set_speed_mode(Axis::Z, SpeedMode::Fast).await.unwrap();
    manipulator.move_absolute(Axis::Z, 2_000.0).await.unwrap();
    assert!(matches!(
        manipulator.move_relative(Axis::Z, 5.0).await,
        Err(MotionError::AxisMoving(Axis::Z))
    ));

    let last_move = sim
        .received()
        .into_iter()
        .rev()
        .find(|cmd| cmd.kind.is_motion())
        .unwrap();
    assert_eq!(
        last_move.kind,
        CommandKind::MoveAbsolute {
            target: 2_000.0,
            mode: SpeedMode::Fast
        }
    );

    let mut notifications = manipulator.notifications();
    loop {
        if let Some(Frame::PositionReport {
            axis: Axis::Z,
            moving: false,
            ..
        }) = notifications.next().await
        {
            break;
        }
    }
    assert_near(manipulator.read(Axis::Z).position, 2_000.0);
    manipulator.move_relative(Axis::Z, -500.0).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn velocity_validation_and_inside_sample_cap() {
    let (manipulator, _sim) = rig([40.0, 0.0, 0.0]).await;

    for stage in [0, 16] {
        assert!(matches!(
            manipulator.set_velocity(Axis::Y, stage, SpeedMode::Fast).await,
            Err(MotionError::InvalidVelocity(s)) if s == stage
        ));
    }

    manipulator.set_velocity(Axis::X, 15, SpeedMode::Fast).await.unwrap();
    manipulator.set_surface_reference(100.0);
    assert!(matches!(
        manipulator.set_velocity(Axis::X, 15, SpeedMode::Fast).await,
        Err(MotionError::Blocked(_))
    ));
    manipulator.set_velocity(Axis::X, 6, SpeedMode::Slow).await.unwrap();
    manipulator.set_velocity(Axis::Y, 15, SpeedMode::Fast).await.unwrap();

    let state = manipulator.read(Axis::X);
    assert_eq!(state.velocity, Some(6));
    assert_eq!(state.speed_mode, SpeedMode::Slow);
}

#[tokio::test(start_paused = true)]
async fn poller_keeps_tracker_fresh() {
    let (manipulator, sim) = rig_unpolled([12.0, -4.0, 7.5]).await;

    let poller = manipulator.spawn_poller(Duration::from_millis(250));
    tokio::time::sleep(Duration::from_secs(1)).await;
    poller.shutdown().await;

    let polls = sim
        .received()
        .iter()
        .filter(|cmd| cmd.kind == CommandKind::Poll)
        .count();
    assert!(polls >= 3 * 4, "only {polls} polls");
    assert_eq!(manipulator.read(Axis::X).position, Some(12.0));
    assert_eq!(manipulator.read(Axis::Y).position, Some(-4.0));
    assert_eq!(manipulator.read(Axis::Z).position, Some(7.5));
}
