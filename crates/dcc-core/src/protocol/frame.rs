//! Fixed-size command frames and the NCE command classes that carry them.
//!
//! Wire format:
//! ```text
//! [class:1][payload:0..=5]
//! ```
//! There is no length prefix or checksum; the command station knows the
//! payload length from the class byte.

use std::fmt;

/// Maximum payload length of any command this crate emits.
pub const MAX_PAYLOAD: usize = 5;

/// High-byte marker that flags a two-byte (extended) locomotive address.
pub const EXTENDED_ADDRESS_MARKER: u8 = 0xC0;

// ── Locomotive control opcodes (third payload byte of a LocoControl frame) ──

pub const OP_SPEED_REVERSE: u8 = 0x03;
pub const OP_SPEED_FORWARD: u8 = 0x04;
pub const OP_ESTOP_FORWARD: u8 = 0x05;
pub const OP_ESTOP_REVERSE: u8 = 0x06;
pub const OP_FUNCTIONS_0_4: u8 = 0x07;
pub const OP_FUNCTIONS_5_8: u8 = 0x08;
pub const OP_FUNCTIONS_9_12: u8 = 0x09;
pub const OP_FUNCTIONS_13_20: u8 = 0x15;
pub const OP_FUNCTIONS_21_28: u8 = 0x16;

// ── Accessory opcodes ───────────────────────────────────────────────────────

pub const OP_ACCESSORY_NORMAL: u8 = 0x03;
pub const OP_ACCESSORY_REVERSE: u8 = 0x04;

/// The command byte that precedes the payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandClass {
    /// Switch the programming track into service mode.
    EnterProgramming = 0x9E,
    /// Return the programming track to normal operation.
    ExitProgramming = 0x9F,
    /// Locomotive speed, direction, emergency stop and function groups.
    LocoControl = 0xA2,
    /// Service-mode (programming track) CV write.
    ServiceWrite = 0xA8,
    /// Service-mode (programming track) CV read.
    ServiceRead = 0xA9,
    /// Accessory (turnout, signal) decoder command.
    Accessory = 0xAD,
    /// Operations-mode ("programming on the main") CV write.
    OpsProgram = 0xAE,
}

impl CommandClass {
    /// The class byte.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Number of reply bytes the command station sends for this class.
    ///
    /// Every command is acknowledged with a single status byte, except the
    /// CV read which returns the value followed by the status.
    pub fn reply_len(self) -> usize {
        match self {
            CommandClass::ServiceRead => 2,
            _ => 1,
        }
    }
}

/// A single command ready to be written to the command station.
///
/// Frames are small, stack-allocated and `Copy`; building one never
/// allocates.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    class: CommandClass,
    payload: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Frame {
    /// Builds a frame from a class and up to [`MAX_PAYLOAD`] bytes.
    ///
    /// Only the codec constructs frames, and it never passes more than five
    /// bytes, so extra bytes are a programming error and are dropped.
    pub(crate) fn new(class: CommandClass, bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_PAYLOAD, "frame payload too long");
        let len = bytes.len().min(MAX_PAYLOAD);
        let mut payload = [0u8; MAX_PAYLOAD];
        payload[..len].copy_from_slice(&bytes[..len]);
        Self {
            class,
            payload,
            len: len as u8,
        }
    }

    pub fn class(&self) -> CommandClass {
        self.class
    }

    /// The payload bytes, without the class byte.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload[..usize::from(self.len)]
    }

    /// The complete byte sequence written to the serial link.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(1 + usize::from(self.len));
        wire.push(self.class.byte());
        wire.extend_from_slice(self.as_bytes());
        wire
    }

    /// Expected reply length; see [`CommandClass::reply_len`].
    pub fn reply_len(&self) -> usize {
        self.class.reply_len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?}", self.class)?;
        for byte in self.as_bytes() {
            write!(f, " {byte:02X}")?;
        }
        f.write_str(")")
    }
}
