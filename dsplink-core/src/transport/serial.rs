//! Serial / USB-CDC transport.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::Transport;

pub struct SerialTransport {
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout,
            port: None,
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        self.close();
        let opened = serialport::new(port, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        info!(port, baud = self.baud_rate, "serial port opened");
        self.port = Some(opened);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port()?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// Enumerate the host's serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(usb) => format!(
            "usb {:04x}:{:04x} {}",
            usb.vid,
            usb.pid,
            usb.product.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_port_reports_not_open() {
        let mut transport = SerialTransport::new(115_200, Duration::from_millis(10));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write_all(b"x"),
            Err(TransportError::NotOpen)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.read(&mut buf),
            Err(TransportError::NotOpen)
        ));
    }

    #[test]
    fn describes_port_kinds() {
        assert_eq!(describe(&SerialPortType::PciPort), "pci");
        assert_eq!(describe(&SerialPortType::Unknown), "unknown");
    }
}
