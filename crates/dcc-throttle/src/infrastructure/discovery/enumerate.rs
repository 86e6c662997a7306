//! Serial port enumeration.

use thiserror::Error;
use tokio_serial::SerialPortType;
use tracing::trace;

use crate::application::station::PortInfo;

/// Errors raised by port discovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The OS refused to list serial ports.
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(String),

    /// The configured port is not attached.
    #[error("configured port {0} is not available")]
    PortUnavailable(String),
}

/// Lists the serial ports currently attached.
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError>;
}

/// [`PortEnumerator`] backed by the OS serial port list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortEnumerator;

impl PortEnumerator for SerialPortEnumerator {
    fn list_ports(&self) -> Result<Vec<PortInfo>, DiscoveryError> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| DiscoveryError::Enumerate(e.to_string()))?;

        let mut infos: Vec<PortInfo> = ports
            .into_iter()
            .map(|p| {
                let serial_number = match p.port_type {
                    SerialPortType::UsbPort(usb) => usb.serial_number,
                    _ => None,
                };
                PortInfo {
                    path: p.port_name,
                    serial_number,
                }
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));

        trace!(count = infos.len(), "enumerated serial ports");
        Ok(infos)
    }
}
