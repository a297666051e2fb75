use lnremote::motion::{Manipulator, MotionError};
use tracing::info;

use crate::cmd::connection::Connection;
use crate::cmd::{AxisArgs, Context, MoveArgs, SpeedModeArgs, StopArgs, VelocityArgs};
use crate::exit::{motion_error, CliResult, SUCCESS};
use crate::output::print_ack;

/// Open a connection, run `op`, and close again whatever the outcome.
async fn with_manipulator<F, Fut>(ctx: &Context, op: F) -> CliResult<()>
where
    F: FnOnce(Manipulator) -> Fut,
    Fut: std::future::Future<Output = CliResult<()>>,
{
    let conn = Connection::open(ctx).await?;
    let result = op(conn.manipulator.clone()).await;
    conn.close().await;
    result
}

pub async fn enable(args: AxisArgs, on: bool, ctx: &Context) -> CliResult<i32> {
    let AxisArgs { axis } = args;
    let name = if on { "enable" } else { "disable" };
    with_manipulator(ctx, |m| async move {
        let result = if on {
            m.enable_axis(axis).await
        } else {
            m.disable_axis(axis).await
        };
        result.map_err(|err| motion_error(name, err))
    })
    .await?;
    print_ack(name, Some(axis), ctx.format);
    Ok(SUCCESS)
}

pub async fn velocity(args: VelocityArgs, ctx: &Context) -> CliResult<i32> {
    let VelocityArgs {
        axis,
        stage,
        mode,
        surface,
    } = args;
    // Range errors need no device round trip.
    if !(1..=15).contains(&stage) {
        return Err(motion_error("velocity", MotionError::InvalidVelocity(stage)));
    }
    with_manipulator(ctx, |m| async move {
        if let Some(surface) = surface {
            // The inside-sample cap depends on the current depth.
            m.refresh()
                .await
                .map_err(|err| motion_error("velocity", err))?;
            m.set_surface_reference(surface);
        }
        m.set_velocity(axis, stage, mode.into())
            .await
            .map_err(|err| motion_error("velocity", err))
    })
    .await?;
    print_ack("velocity", Some(axis), ctx.format);
    Ok(SUCCESS)
}

pub async fn speed_mode(args: SpeedModeArgs, ctx: &Context) -> CliResult<i32> {
    let SpeedModeArgs { axis, mode } = args;
    with_manipulator(ctx, |m| async move {
        m.set_speed_mode(axis, mode.into())
            .await
            .map_err(|err| motion_error("speed-mode", err))
    })
    .await?;
    print_ack("speed-mode", Some(axis), ctx.format);
    Ok(SUCCESS)
}

pub async fn move_axis(args: MoveArgs, ctx: &Context) -> CliResult<i32> {
    let MoveArgs {
        axis,
        target,
        relative,
    } = args;
    with_manipulator(ctx, |m| async move {
        m.refresh().await.map_err(|err| motion_error("move", err))?;
        let ack = if relative {
            m.move_relative(axis, target).await
        } else {
            m.move_absolute(axis, target).await
        }
        .map_err(|err| motion_error("move", err))?;
        info!(axis = %axis, target, relative, seq = ack.seq, "move accepted");
        Ok(())
    })
    .await?;
    print_ack("move", Some(axis), ctx.format);
    Ok(SUCCESS)
}

pub async fn stop(args: StopArgs, ctx: &Context) -> CliResult<i32> {
    let StopArgs { axis } = args;
    with_manipulator(ctx, |m| async move {
        match axis {
            Some(axis) => m.stop(axis).await,
            None => m.stop_all().await,
        }
        .map_err(|err| motion_error("stop", err))
    })
    .await?;
    print_ack("stop", axis, ctx.format);
    Ok(SUCCESS)
}
