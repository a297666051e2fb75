use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A connected device stream. Implements `AsyncRead + AsyncWrite`.
///
/// This is the fundamental I/O type returned by transport operations.
/// The protocol layer treats every variant identically.
pub struct DeviceStream {
    inner: DeviceStreamInner,
    label: String,
}

enum DeviceStreamInner {
    Tcp(TcpStream),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream),
    Memory(DuplexStream),
}

impl DeviceStream {
    pub(crate) fn from_tcp(stream: TcpStream, label: String) -> Self {
        Self {
            inner: DeviceStreamInner::Tcp(stream),
            label,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn from_serial(stream: tokio_serial::SerialStream, label: String) -> Self {
        Self {
            inner: DeviceStreamInner::Serial(stream),
            label,
        }
    }

    /// Create a connected pair of in-memory streams.
    ///
    /// Bytes written to one end are readable from the other. `capacity` bounds
    /// the number of bytes buffered in each direction.
    pub fn memory_pair(capacity: usize) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(capacity);
        (
            Self {
                inner: DeviceStreamInner::Memory(left),
                label: "memory:host".to_string(),
            },
            Self {
                inner: DeviceStreamInner::Memory(right),
                label: "memory:device".to_string(),
            },
        )
    }

    /// Human-readable description of the link (port name, address, ...).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            DeviceStreamInner::Tcp(_) => "tcp",
            #[cfg(feature = "serial")]
            DeviceStreamInner::Serial(_) => "serial",
            DeviceStreamInner::Memory(_) => "memory",
        }
    }
}

impl AsyncRead for DeviceStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "serial")]
            DeviceStreamInner::Serial(stream) => Pin::new(stream).poll_read(cx, buf),
            DeviceStreamInner::Memory(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DeviceStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "serial")]
            DeviceStreamInner::Serial(stream) => Pin::new(stream).poll_write(cx, buf),
            DeviceStreamInner::Memory(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "serial")]
            DeviceStreamInner::Serial(stream) => Pin::new(stream).poll_flush(cx),
            DeviceStreamInner::Memory(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "serial")]
            DeviceStreamInner::Serial(stream) => Pin::new(stream).poll_shutdown(cx),
            DeviceStreamInner::Memory(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("type", &self.transport_name())
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn memory_pair_is_bidirectional() {
        let (mut host, mut device) = DeviceStream::memory_pair(64);

        host.write_all(b"\x16\x01\x01").await.unwrap();
        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x16\x01\x01");

        device.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn memory_pair_reports_eof_after_drop() {
        let (mut host, device) = DeviceStream::memory_pair(64);
        drop(device);

        let mut buf = [0u8; 8];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn debug_shows_transport_type() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let (host, _device) = DeviceStream::memory_pair(8);
        let text = format!("{host:?}");
        assert!(text.contains("memory"));
        assert_eq!(host.label(), "memory:host");
    }
}
