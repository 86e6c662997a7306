//! Locomotive-facing value types: 14-bit addresses, 126-step speed,
//! direction, and the F0–F28 function vector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

// ── Range constants ───────────────────────────────────────────────────────────

/// Largest address representable in the two-byte extended format.
pub const MAX_ADDRESS: u16 = 0x3FFF;

/// Highest speed step in 126-step mode.
pub const MAX_SPEED: u8 = 126;

/// Number of decoder functions, F0 through F28.
pub const FUNCTION_COUNT: usize = 29;

/// Highest configuration variable number accepted by the programmer.
pub const MAX_CV: u16 = 1024;

// ── Address ───────────────────────────────────────────────────────────────────

/// A 14-bit locomotive or accessory address.
///
/// Encoded on the wire as two bytes, high byte first.  Whether the high byte
/// carries the extended-address marker depends on the command, so the
/// marker is applied by the codec and never stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Address(u16);

impl Address {
    /// Creates an address, rejecting values wider than 14 bits.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::AddressOutOfRange`] when `raw > 0x3FFF`.
    pub fn new(raw: u16) -> Result<Self, CodecError> {
        if raw > MAX_ADDRESS {
            return Err(CodecError::AddressOutOfRange(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the raw address number.
    pub fn value(self) -> u16 {
        self.0
    }

    /// Upper six bits of the address, unmarked.
    pub fn high_byte(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Lower eight bits of the address.
    pub fn low_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl TryFrom<u16> for Address {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Address> for u16 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Speed ─────────────────────────────────────────────────────────────────────

/// A speed step in 126-step mode.
///
/// Step 0 is "stop".  Step 1 is reserved by the DCC standard for emergency
/// stop and is only ever produced through the dedicated emergency-stop
/// opcodes, not as a speed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Speed(u8);

impl Speed {
    /// Stopped.
    pub const STOP: Speed = Speed(0);

    /// Creates a speed step.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SpeedOutOfRange`] when `step > 126`.
    pub fn new(step: u8) -> Result<Self, CodecError> {
        if step > MAX_SPEED {
            return Err(CodecError::SpeedOutOfRange(step));
        }
        Ok(Self(step))
    }

    /// Returns the raw step.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Speed {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Speed> for u8 {
    fn from(speed: Speed) -> Self {
        speed.0
    }
}

// ── Direction ─────────────────────────────────────────────────────────────────

/// Travel direction.
///
/// The wire protocol has no "stopped" direction: stop is speed 0 sent with a
/// direction-carrying opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl FromStr for Direction {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" => Ok(Direction::Forward),
            "reverse" | "rev" => Ok(Direction::Reverse),
            _ => Err(CodecError::InvalidDirection(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

// ── Functions ─────────────────────────────────────────────────────────────────

/// Index of a decoder function, F0 through F28.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct FunctionIndex(u8);

impl FunctionIndex {
    /// Creates a function index.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FunctionOutOfRange`] for indices above 28.
    pub fn new(index: u8) -> Result<Self, CodecError> {
        if usize::from(index) >= FUNCTION_COUNT {
            return Err(CodecError::FunctionOutOfRange(index));
        }
        Ok(Self(index))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The wire group this function is transmitted in.
    pub fn group(self) -> FunctionGroup {
        match self.0 {
            0..=4 => FunctionGroup::F0ToF4,
            5..=8 => FunctionGroup::F5ToF8,
            9..=12 => FunctionGroup::F9ToF12,
            13..=20 => FunctionGroup::F13ToF20,
            _ => FunctionGroup::F21ToF28,
        }
    }
}

impl TryFrom<u8> for FunctionIndex {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FunctionIndex> for u8 {
    fn from(index: FunctionIndex) -> Self {
        index.0
    }
}

/// One of the five fixed subsets of F0–F28 that travel together in a single
/// command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionGroup {
    F0ToF4,
    F5ToF8,
    F9ToF12,
    F13ToF20,
    F21ToF28,
}

impl FunctionGroup {
    /// All groups in wire order.
    pub const ALL: [FunctionGroup; 5] = [
        FunctionGroup::F0ToF4,
        FunctionGroup::F5ToF8,
        FunctionGroup::F9ToF12,
        FunctionGroup::F13ToF20,
        FunctionGroup::F21ToF28,
    ];

    /// Function numbers of this group listed by bit position, bit 0 first.
    ///
    /// F0 sits at bit 4 of the first group, after F1–F4.  This mirrors the
    /// historical DCC function-group layout and must not be "fixed".
    pub fn members(self) -> &'static [u8] {
        match self {
            FunctionGroup::F0ToF4 => &[1, 2, 3, 4, 0],
            FunctionGroup::F5ToF8 => &[5, 6, 7, 8],
            FunctionGroup::F9ToF12 => &[9, 10, 11, 12],
            FunctionGroup::F13ToF20 => &[13, 14, 15, 16, 17, 18, 19, 20],
            FunctionGroup::F21ToF28 => &[21, 22, 23, 24, 25, 26, 27, 28],
        }
    }
}

/// The on/off state of all 29 functions of one locomotive.
///
/// This is a plain `Copy` value.  Updating a function produces a new vector
/// via [`FunctionStates::with`]; stored state is replaced wholesale, so a
/// frame being built from one vector can never observe a half-applied update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FunctionStates([bool; FUNCTION_COUNT]);

impl FunctionStates {
    /// All functions off.
    pub fn all_off() -> Self {
        Self::default()
    }

    /// Returns whether function `index` is on.
    pub fn get(&self, index: FunctionIndex) -> bool {
        self.0[usize::from(index.value())]
    }

    /// Returns a copy with function `index` set to `on`.
    #[must_use]
    pub fn with(self, index: FunctionIndex, on: bool) -> Self {
        let mut next = self.0;
        next[usize::from(index.value())] = on;
        Self(next)
    }

    /// Returns the underlying array, F0 first.
    pub fn as_array(&self) -> &[bool; FUNCTION_COUNT] {
        &self.0
    }

    /// Indices of all functions that are currently on.
    pub fn active(&self) -> Vec<u8> {
        (0u8..)
            .zip(self.0.iter())
            .filter_map(|(i, on)| on.then_some(i))
            .collect()
    }
}

/// How a decoder function reacts to the control surface.
///
/// `Toggle` functions latch (press once on, press again off).  `Momentary`
/// functions are on only while held, e.g. a horn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionAction {
    #[default]
    Toggle,
    Momentary,
}

// ── Configuration variables ───────────────────────────────────────────────────

/// A configuration variable number, 1 through 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Cv(u16);

impl Cv {
    /// Creates a CV number.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CvOutOfRange`] outside `1..=1024`.
    pub fn new(number: u16) -> Result<Self, CodecError> {
        if number == 0 || number > MAX_CV {
            return Err(CodecError::CvOutOfRange(number));
        }
        Ok(Self(number))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn high_byte(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn low_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl TryFrom<u16> for Cv {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cv> for u16 {
    fn from(cv: Cv) -> Self {
        cv.0
    }
}

// ── Turnouts ──────────────────────────────────────────────────────────────────

/// Position of a turnout (switch) driven by an accessory decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnoutPosition {
    /// Straight through ("closed").
    Normal,
    /// Diverging ("thrown").
    Reverse,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
