//! Command-station reply bytes.
//!
//! Every command is answered with one ASCII status byte.  A service-mode CV
//! read is answered with the CV value followed by the status byte.

use std::fmt;

use thiserror::Error;

/// Status byte returned by the command station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    /// `'!'`
    Ok,
    /// `'0'`: command not supported by this station.
    NotSupported,
    /// `'1'`: address out of range.
    AddressOutOfRange,
    /// `'2'`: op code out of range.
    OpcodeOutOfRange,
    /// `'3'`: CV or data out of range, or no acknowledgement from the
    /// decoder on the programming track.
    DataOutOfRange,
    /// `'4'`: byte count out of range.
    ByteCountOutOfRange,
    /// Anything else.
    Unknown(u8),
}

impl ReplyCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'!' => ReplyCode::Ok,
            b'0' => ReplyCode::NotSupported,
            b'1' => ReplyCode::AddressOutOfRange,
            b'2' => ReplyCode::OpcodeOutOfRange,
            b'3' => ReplyCode::DataOutOfRange,
            b'4' => ReplyCode::ByteCountOutOfRange,
            other => ReplyCode::Unknown(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == ReplyCode::Ok
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyCode::Ok => f.write_str("ok"),
            ReplyCode::NotSupported => f.write_str("command not supported"),
            ReplyCode::AddressOutOfRange => f.write_str("address out of range"),
            ReplyCode::OpcodeOutOfRange => f.write_str("op code out of range"),
            ReplyCode::DataOutOfRange => f.write_str("data out of range or no decoder ack"),
            ReplyCode::ByteCountOutOfRange => f.write_str("byte count out of range"),
            ReplyCode::Unknown(byte) => write!(f, "unknown reply 0x{byte:02X}"),
        }
    }
}

/// Errors produced while interpreting reply bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The station answered with a non-`'!'` status.
    #[error("command station rejected the command: {0}")]
    StationRejected(ReplyCode),

    /// Fewer bytes than the command's reply length.
    #[error("truncated reply: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// Interprets a single status byte.
///
/// # Errors
///
/// Returns [`ReplyError::StationRejected`] for any status other than `'!'`.
pub fn parse_ack(byte: u8) -> Result<(), ReplyError> {
    match ReplyCode::from_byte(byte) {
        ReplyCode::Ok => Ok(()),
        code => Err(ReplyError::StationRejected(code)),
    }
}

/// Interprets the `[value, status]` reply of a service-mode CV read.
///
/// # Errors
///
/// Returns [`ReplyError::Truncated`] for fewer than two bytes and
/// [`ReplyError::StationRejected`] when the status is not `'!'`.
pub fn parse_cv_read(bytes: &[u8]) -> Result<u8, ReplyError> {
    match bytes {
        [value, status, ..] => parse_ack(*status).map(|()| *value),
        _ => Err(ReplyError::Truncated {
            expected: 2,
            got: bytes.len(),
        }),
    }
}
