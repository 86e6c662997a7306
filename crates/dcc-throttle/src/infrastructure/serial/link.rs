//! Opening the byte stream to the command station.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};
use tracing::debug;

/// Baud rate of the NCE USB interface.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Any bidirectional byte stream usable as a command-station link.
pub trait SerialLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialLink for T {}

pub type BoxedLink = Box<dyn SerialLink>;

/// Opens links by port path.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<BoxedLink>;
}

/// Opens real serial ports, 8 data bits, no parity, one stop bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialLinkOpener;

#[async_trait]
impl LinkOpener for SerialLinkOpener {
    async fn open(&self, port: &str, baud_rate: u32) -> io::Result<BoxedLink> {
        debug!(port, baud_rate, "opening serial port");
        let builder = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);
        let stream = SerialStream::open(&builder)?;
        Ok(Box::new(stream))
    }
}
