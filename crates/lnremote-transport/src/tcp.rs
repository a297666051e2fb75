use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::DeviceStream;

/// Connect to a control unit's TCP/IP interface.
///
/// Nagle is disabled: commands are a few bytes long and latency matters more
/// than throughput on this link.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<DeviceStream> {
    let endpoint = format!("{host}:{port}");
    let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { endpoint, source }),
        Err(_) => return Err(TransportError::ConnectTimeout { endpoint, timeout }),
    };
    stream.set_nodelay(true)?;
    debug!(%endpoint, "connected over tcp");
    Ok(DeviceStream::from_tcp(stream, format!("tcp://{endpoint}")))
}
