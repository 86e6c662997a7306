//! Validation errors shared by the domain types and the frame codec.

use thiserror::Error;

/// Errors raised when a value cannot be represented on the wire.
///
/// All of these are deterministic: the same input always produces the same
/// error, so callers surface them directly instead of retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Direction text was neither forward nor reverse.
    #[error("invalid direction: {0:?}")]
    InvalidDirection(String),

    /// Address is wider than 14 bits.
    #[error("address {0} is out of range (0..=16383)")]
    AddressOutOfRange(u16),

    /// Speed step above 126.
    #[error("speed {0} is out of range (0..=126)")]
    SpeedOutOfRange(u8),

    /// Function index above F28.
    #[error("function F{0} is out of range (F0..=F28)")]
    FunctionOutOfRange(u8),

    /// Configuration variable number outside 1..=1024.
    #[error("CV {0} is out of range (1..=1024)")]
    CvOutOfRange(u16),
}
