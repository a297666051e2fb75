use lnremote::motion::{ManeuverKind, ManeuverState, Manipulator};
use tracing::{info, warn};

use crate::cmd::connection::Connection;
use crate::cmd::{ApproachArgs, Context, MoveAwayArgs, SurfaceArgs};
use crate::exit::{motion_error, CliError, CliResult, FAILURE, SAFETY_CHECK_FAILED, SUCCESS};
use crate::output::print_maneuver;

pub async fn approach(args: ApproachArgs, ctx: &Context) -> CliResult<i32> {
    let kind = ManeuverKind::Approach { target: args.depth };
    run(kind, args.surface, false, ctx).await
}

pub async fn retract(args: SurfaceArgs, ctx: &Context) -> CliResult<i32> {
    run(ManeuverKind::Retract, Some(args.surface), false, ctx).await
}

pub async fn move_away(args: MoveAwayArgs, ctx: &Context) -> CliResult<i32> {
    run(ManeuverKind::MoveAway, Some(args.surface.surface), args.yes, ctx).await
}

pub async fn return_lateral(ctx: &Context) -> CliResult<i32> {
    run(ManeuverKind::Return, None, false, ctx).await
}

async fn run(
    kind: ManeuverKind,
    surface: Option<f64>,
    confirmed: bool,
    ctx: &Context,
) -> CliResult<i32> {
    let conn = Connection::open(ctx).await?;
    let result = execute(&conn.manipulator, kind, surface, confirmed, ctx).await;
    conn.close().await;
    result
}

async fn execute(
    manipulator: &Manipulator,
    kind: ManeuverKind,
    surface: Option<f64>,
    confirmed: bool,
    ctx: &Context,
) -> CliResult<i32> {
    let context = kind.to_string();
    manipulator
        .refresh()
        .await
        .map_err(|err| motion_error(&context, err))?;
    if let Some(surface) = surface {
        manipulator.set_surface_reference(surface);
    }

    let handle = manipulator
        .start_maneuver(kind)
        .map_err(|err| motion_error(&context, err))?;

    if let ManeuverState::Requested {
        warning: Some(warning),
    } = handle.state()
    {
        if !confirmed {
            let outcome = manipulator
                .abort_maneuver(&handle)
                .await
                .map_err(|err| motion_error(&context, err))?;
            print_maneuver(kind, &outcome, &manipulator.positions(), ctx.format);
            return Err(CliError::new(
                SAFETY_CHECK_FAILED,
                format!("{context}: {warning}; rerun with --yes to proceed"),
            ));
        }
        info!(maneuver = %kind, warning = %warning, "proceeding after confirmation");
        manipulator
            .confirm_maneuver(&handle)
            .map_err(|err| motion_error(&context, err))?;
    }

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!(maneuver = %kind, "interrupted, aborting");
            manipulator
                .abort_maneuver(&handle)
                .await
                .map_err(|err| motion_error(&context, err))?
        }
    };

    print_maneuver(kind, &outcome, &manipulator.positions(), ctx.format);
    match outcome {
        ManeuverState::Completed => Ok(SUCCESS),
        _ => Ok(FAILURE),
    }
}
