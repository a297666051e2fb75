use std::time::Duration;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open or connect to the endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// The endpoint did not accept the connection in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// No serial port reports the requested USB serial number.
    #[error("no serial port with serial number {serial_number} (is the control unit connected?)")]
    PortNotFound { serial_number: String },

    /// Serial port enumeration or configuration failed.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Serial endpoints were requested but the crate was built without them.
    #[error("serial transport not compiled in (enable the `serial` feature)")]
    SerialUnsupported,

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
