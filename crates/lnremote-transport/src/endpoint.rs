use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
#[cfg(not(feature = "serial"))]
use crate::error::TransportError;
use crate::stream::DeviceStream;

/// Default SM10 serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// Default TCP port of the control unit's ethernet interface.
pub const DEFAULT_TCP_PORT: u16 = 10_001;

/// Where a control unit can be reached.
///
/// Selection and addressing come from the caller's configuration; this crate
/// only knows how to open each kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// USB serial adapter identified by its serial number.
    Serial { serial_number: String, baud_rate: u32 },
    /// Serial port identified by its OS path.
    SerialPath { path: String, baud_rate: u32 },
    /// TCP/IP interface.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Convenience constructor for a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Convenience constructor for a serial endpoint at the default baud rate.
    pub fn serial(serial_number: impl Into<String>) -> Self {
        Self::Serial {
            serial_number: serial_number.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial {
                serial_number,
                baud_rate,
            } => write!(f, "serial#{serial_number}@{baud_rate}"),
            Endpoint::SerialPath { path, baud_rate } => write!(f, "{path}@{baud_rate}"),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

/// Open a stream to `endpoint`.
///
/// `timeout` bounds TCP connection establishment; serial ports open
/// synchronously.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<DeviceStream> {
    info!(%endpoint, "connecting to control unit");
    match endpoint {
        Endpoint::Tcp { host, port } => crate::tcp::connect(host, *port, timeout).await,
        #[cfg(feature = "serial")]
        Endpoint::Serial {
            serial_number,
            baud_rate,
        } => {
            let path = crate::serial::find_port(serial_number)?;
            crate::serial::open(&path, *baud_rate)
        }
        #[cfg(feature = "serial")]
        Endpoint::SerialPath { path, baud_rate } => crate::serial::open(path, *baud_rate),
        #[cfg(not(feature = "serial"))]
        Endpoint::Serial { .. } | Endpoint::SerialPath { .. } => {
            let _ = timeout;
            Err(TransportError::SerialUnsupported)
        }
    }
}
