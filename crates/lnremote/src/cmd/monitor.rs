use futures_util::StreamExt;
use lnremote::protocol::Frame;
use lnremote::session::SessionState;
use tracing::{info, warn};

use crate::cmd::connection::Connection;
use crate::cmd::{parse_duration, Context, MonitorArgs};
use crate::exit::{CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::print_report;

pub async fn run(args: MonitorArgs, ctx: &Context) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let conn = Connection::open(ctx).await?;
    let manipulator = conn.manipulator.clone();

    let mut reports = manipulator.notifications();
    let mut state = manipulator.session().state_changes();
    let poller = manipulator.spawn_poller(interval);
    info!(interval = ?interval, "monitoring positions");

    let mut printed = 0usize;
    let result = loop {
        if args.count.is_some_and(|count| printed >= count) {
            break Ok(SUCCESS);
        }
        tokio::select! {
            frame = reports.next() => match frame {
                Some(frame @ Frame::PositionReport { .. }) => {
                    print_report(&frame, ctx.format);
                    printed += 1;
                }
                Some(_) => {}
                None => break Err(CliError::new(TRANSPORT_ERROR, "notification stream closed")),
            },
            changed = state.wait_for(|s| *s == SessionState::Disconnected) => {
                if changed.is_ok() {
                    warn!("control unit disconnected");
                }
                break Err(CliError::new(TRANSPORT_ERROR, "control unit disconnected"));
            }
            _ = tokio::signal::ctrl_c() => break Ok(SUCCESS),
        }
    };

    poller.shutdown().await;
    conn.close().await;
    result
}
