use crate::cmd::connection::Connection;
use crate::cmd::Context;
use crate::exit::{motion_error, CliResult, SUCCESS};
use crate::output::print_status;

pub async fn run(ctx: &Context) -> CliResult<i32> {
    let conn = Connection::open(ctx).await?;
    let result = conn.manipulator.refresh().await;
    let manipulator = conn.manipulator.clone();
    let label = conn.label.clone();
    conn.close().await;

    let state = result.map_err(|err| motion_error("status", err))?;
    print_status(&state, &label, manipulator.surface_reference(), ctx.format);
    Ok(SUCCESS)
}
