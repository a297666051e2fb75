use serde::Serialize;

use crate::cmd::connection::Connection;
use crate::cmd::{ConnectionKind, Context};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    kind: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(ctx: &Context) -> CliResult<i32> {
    let mut checks = vec![compiled_features_check(), serial_ports_check()];
    checks.push(control_unit_check(ctx).await);

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        kind: "doctor",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, ctx.format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("lnremote doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn compiled_features_check() -> CheckResult {
    let mut transports = vec!["tcp", "dummy"];
    if cfg!(feature = "serial") {
        transports.push("serial");
    }
    CheckResult::new("transports", CheckStatus::Info, transports.join(", "))
}

#[cfg(feature = "serial")]
fn serial_ports_check() -> CheckResult {
    match lnremote::transport::list_ports() {
        Ok(ports) if ports.is_empty() => {
            CheckResult::new("serial_ports", CheckStatus::Warn, "no serial ports found")
        }
        Ok(ports) => {
            let listed: Vec<String> = ports
                .iter()
                .map(|port| match &port.serial_number {
                    Some(serial) => format!("{} ({}, serial {serial})", port.name, port.kind),
                    None => format!("{} ({})", port.name, port.kind),
                })
                .collect();
            CheckResult::new("serial_ports", CheckStatus::Info, listed.join("; "))
        }
        Err(err) => CheckResult::new(
            "serial_ports",
            CheckStatus::Warn,
            format!("port enumeration failed: {err}"),
        ),
    }
}

#[cfg(not(feature = "serial"))]
fn serial_ports_check() -> CheckResult {
    CheckResult::new(
        "serial_ports",
        CheckStatus::Skip,
        "serial support not compiled in",
    )
}

async fn control_unit_check(ctx: &Context) -> CheckResult {
    const NAME: &str = "control_unit";
    if ctx.connection.connection == ConnectionKind::Serial
        && ctx.connection.serial.is_none()
        && ctx.connection.device.is_none()
    {
        return CheckResult::new(NAME, CheckStatus::Skip, "no serial number or device configured");
    }

    let conn = match Connection::open(ctx).await {
        Ok(conn) => conn,
        Err(err) => return CheckResult::new(NAME, CheckStatus::Fail, err.to_string()),
    };
    let label = conn.label.clone();
    let result = conn.manipulator.refresh().await;
    conn.close().await;

    match result {
        Ok(state) if state.any_stale() => CheckResult::new(
            NAME,
            CheckStatus::Warn,
            format!("{label}: reachable, but axis state is stale"),
        ),
        Ok(_) => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!("{label}: all axes reported"),
        ),
        Err(err) => CheckResult::new(NAME, CheckStatus::Fail, format!("{label}: {err}")),
    }
}
