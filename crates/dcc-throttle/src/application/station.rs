//! The command-station port.
//!
//! The serial session in `infrastructure::serial` implements
//! [`CommandStation`]; use cases only ever see the trait.

use std::time::Duration;

use async_trait::async_trait;
use dcc_core::protocol::{parse_ack, parse_cv_read};
use dcc_core::{Frame, ReplyCode, ReplyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while talking to the command station.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No link is open.  Only strict sends and requests report this.
    #[error("command station is not connected")]
    NotConnected,

    /// Another request is still waiting for its reply.
    #[error("another command-station operation is already in progress")]
    OperationPending,

    /// The station did not reply in time.
    #[error("command station did not reply within {0:?}")]
    HardwareTimeout(Duration),

    /// The handle belongs to a session that has since been replaced.
    #[error("session handle is stale; the link was reopened")]
    StaleSession,

    /// The link closed while a reply was outstanding.
    #[error("link to the command station closed")]
    LinkClosed,

    /// The serial port could not be opened.
    #[error("failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on the open link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The station answered with an error status.
    #[error("command station rejected the command: {0}")]
    StationRejected(ReplyCode),

    /// The reply did not have the expected shape.
    #[error("malformed reply: {0}")]
    MalformedReply(ReplyError),
}

impl From<ReplyError> for TransportError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::StationRejected(code) => TransportError::StationRejected(code),
            other => TransportError::MalformedReply(other),
        }
    }
}

/// Connection state published by the session.
///
/// Replaced as a whole on every change, so readers never observe a
/// half-updated pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub programming_track_enabled: bool,
}

/// One entry of the serial port snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

/// Raw reply bytes of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReply(Vec<u8>);

impl OperationReply {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Interprets the reply as a single status byte.
    ///
    /// # Errors
    ///
    /// [`TransportError::StationRejected`] for a non-`'!'` status,
    /// [`TransportError::MalformedReply`] for an empty reply.
    pub fn ack(&self) -> Result<(), TransportError> {
        match self.0.last() {
            Some(&status) => Ok(parse_ack(status)?),
            None => Err(TransportError::MalformedReply(ReplyError::Truncated {
                expected: 1,
                got: 0,
            })),
        }
    }

    /// Interprets the reply as `[value, status]` from a CV read.
    ///
    /// # Errors
    ///
    /// Same as [`OperationReply::ack`].
    pub fn cv_value(&self) -> Result<u8, TransportError> {
        Ok(parse_cv_read(&self.0)?)
    }
}

/// Everything the use cases need from a command station.
///
/// # Send semantics
///
/// - [`send`](CommandStation::send) is for routine commands.  While
///   disconnected it succeeds without writing, so a throttle can be set up
///   before the hardware is plugged in.
/// - [`send_strict`](CommandStation::send_strict) is for user-initiated safety
///   actions and fails with [`TransportError::NotConnected`] instead.
/// - [`request`](CommandStation::request) writes a frame and waits for its
///   reply.  Only one request may be outstanding at a time.
#[async_trait]
pub trait CommandStation: Send + Sync {
    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Writes `frame` if connected; no-op otherwise.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Writes `frame`, failing when disconnected.
    async fn send_strict(&self, frame: Frame) -> Result<(), TransportError>;

    /// Writes `frame` and returns its reply.
    async fn request(&self, frame: Frame) -> Result<OperationReply, TransportError>;
}
