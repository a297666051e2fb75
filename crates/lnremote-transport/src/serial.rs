use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortType, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::DeviceStream;

/// Summary of a serial port visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    /// OS port name (`/dev/ttyUSB0`, `COM3`, ...).
    pub name: String,
    /// USB serial number, when the port is a USB adapter that reports one.
    pub serial_number: Option<String>,
    /// Port kind (`usb`, `pci`, `bluetooth`, `unknown`).
    pub kind: &'static str,
}

fn port_kind(port_type: &SerialPortType) -> &'static str {
    match port_type {
        SerialPortType::UsbPort(_) => "usb",
        SerialPortType::PciPort => "pci",
        SerialPortType::BluetoothPort => "bluetooth",
        SerialPortType::Unknown => "unknown",
    }
}

/// List serial ports known to the OS.
pub fn list_ports() -> Result<Vec<PortSummary>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let serial_number = match &port.port_type {
                SerialPortType::UsbPort(info) => info.serial_number.clone(),
                _ => None,
            };
            PortSummary {
                kind: port_kind(&port.port_type),
                name: port.port_name,
                serial_number,
            }
        })
        .collect())
}

/// Find the port whose USB adapter reports `serial_number`.
pub fn find_port(serial_number: &str) -> Result<String> {
    list_ports()?
        .into_iter()
        .find(|port| port.serial_number.as_deref() == Some(serial_number))
        .map(|port| {
            debug!(port = %port.name, serial_number, "found control unit port");
            port.name
        })
        .ok_or_else(|| TransportError::PortNotFound {
            serial_number: serial_number.to_string(),
        })
}

/// Open a serial port at `baud_rate`, 8N1, no flow control.
///
/// Must be called from within a tokio runtime.
pub fn open(path: &str, baud_rate: u32) -> Result<DeviceStream> {
    let stream = tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|err| TransportError::Connect {
            endpoint: path.to_string(),
            source: std::io::Error::other(err.to_string()),
        })?;
    info!(port = path, baud_rate, "opened serial port");
    Ok(DeviceStream::from_serial(stream, format!("serial://{path}")))
}
