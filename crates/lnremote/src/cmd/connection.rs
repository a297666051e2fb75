use std::sync::Arc;
use std::time::Duration;

use lnremote::motion::{Manipulator, MotionConfig};
use lnremote::session::{Session, SessionConfig, SimConfig, SimulatedDevice};
use lnremote::transport::Endpoint;
use tracing::{debug, info};

use crate::cmd::{ConnectionArgs, ConnectionKind, Context};
use crate::exit::{session_error, CliError, CliResult, USAGE};

impl ConnectionArgs {
    /// Resolve the endpoint; `None` selects the simulated unit.
    pub fn endpoint(&self) -> CliResult<Option<Endpoint>> {
        match self.connection {
            ConnectionKind::Dummy => Ok(None),
            ConnectionKind::Serial => match (&self.device, &self.serial) {
                (Some(path), _) => Ok(Some(Endpoint::SerialPath {
                    path: path.clone(),
                    baud_rate: self.baud_rate,
                })),
                (None, Some(serial_number)) => Ok(Some(Endpoint::Serial {
                    serial_number: serial_number.clone(),
                    baud_rate: self.baud_rate,
                })),
                (None, None) => Err(CliError::new(
                    USAGE,
                    "serial connection needs --serial or --device (or LNREMOTE_SERIAL)",
                )),
            },
            ConnectionKind::Tcp => match &self.host {
                Some(host) => Ok(Some(Endpoint::tcp(host.clone(), self.port))),
                None => Err(CliError::new(
                    USAGE,
                    "tcp connection needs --host (or LNREMOTE_IP)",
                )),
            },
        }
    }
}

/// An open manipulator plus whatever keeps its device alive.
pub struct Connection {
    pub manipulator: Manipulator,
    pub label: String,
    // Dropping the simulated unit stops it.
    _device: Option<SimulatedDevice>,
}

impl Connection {
    pub async fn open(ctx: &Context) -> CliResult<Self> {
        let session_config = session_config(ctx.timeout);
        let (session, device, label) = match ctx.connection.endpoint()? {
            Some(endpoint) => {
                let label = endpoint.to_string();
                let session = Session::open(endpoint, session_config)
                    .await
                    .map_err(|err| session_error("connect", err))?;
                (session, None, label)
            }
            None => {
                let (session, device) =
                    SimulatedDevice::connect(SimConfig::default(), session_config).await;
                (session, Some(device), "dummy".to_string())
            }
        };
        info!(endpoint = %label, "connected");

        Ok(Self {
            manipulator: Manipulator::new(Arc::new(session), MotionConfig::default()),
            label,
            _device: device,
        })
    }

    pub async fn close(self) {
        self.manipulator.session().close().await;
        debug!(endpoint = %self.label, "connection closed");
    }
}

fn session_config(command_timeout: Duration) -> SessionConfig {
    SessionConfig::default().with_command_timeout(command_timeout)
}
