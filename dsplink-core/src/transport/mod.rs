//! Byte-stream endpoints the link can run over.
//!
//! A transport moves opaque bytes; framing lives in [`crate::codec`].
//! Supporting a new kind of endpoint is one new [`Transport`] impl.

pub mod fake;
#[cfg(feature = "serial")]
pub mod serial;

use crate::error::TransportError;

pub use fake::{FakeDevice, FakeTransport};
#[cfg(feature = "serial")]
pub use serial::{PortInfo, SerialTransport, list_ports};

/// An endpoint owned by exactly one thread at a time.
///
/// The link keeps it parked while disconnected and moves it onto the
/// dispatcher thread for the length of a session.
pub trait Transport: Send {
    /// Open `port`. Opening an open transport reopens it.
    fn open(&mut self, port: &str) -> Result<(), TransportError>;

    /// Close the endpoint. Closing a closed transport does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is available. `Ok(0)` means nothing arrived within
    /// the transport's read timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        (**self).open(port)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }
}
