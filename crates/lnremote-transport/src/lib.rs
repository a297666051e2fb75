//! Byte-stream transports for manipulator control units.
//!
//! Provides a unified async stream over the links a Luigs & Neumann control
//! unit can be reached through:
//! - USB serial adapters, located by their serial number
//! - TCP/IP (the control unit's ethernet option)
//! - In-memory duplex pipes (simulation and tests)
//!
//! This is the lowest layer of lnremote. It knows nothing about the wire
//! protocol; everything else builds on top of the [`DeviceStream`] type.

pub mod endpoint;
pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;

pub use endpoint::{connect, Endpoint, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT};
pub use error::{Result, TransportError};
pub use stream::DeviceStream;

#[cfg(feature = "serial")]
pub use serial::{find_port, list_ports, PortSummary};
