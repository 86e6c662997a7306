//! Frame codec: turns locomotive and accessory intents into command frames.
//!
//! Locomotive control payload:
//! ```text
//! [addrHi | 0xC0][addrLo][op][data]
//! ```
//! Accessory payload (no extended-address marker):
//! ```text
//! [addrHi][addrLo][op][data]
//! ```
//! Operations-mode CV write: `[addrHi][addrLo][cvHi][cvLo][value]`.
//! Service-mode CV read: `[cvHi][cvLo]`; write: `[cvHi][cvLo][value]`.
//!
//! Every function here is pure: the same arguments always produce the same
//! bytes.  Range checking happens when the argument types are constructed,
//! so only the text-parsing entry points can fail.

use tracing::warn;

use crate::domain::locomotive::{
    Address, Cv, Direction, FunctionGroup, FunctionIndex, FunctionStates, Speed, TurnoutPosition,
};
use crate::error::CodecError;
use crate::protocol::frame::{
    CommandClass, Frame, EXTENDED_ADDRESS_MARKER, OP_ACCESSORY_NORMAL, OP_ACCESSORY_REVERSE,
    OP_ESTOP_FORWARD, OP_ESTOP_REVERSE, OP_FUNCTIONS_0_4, OP_FUNCTIONS_13_20,
    OP_FUNCTIONS_21_28, OP_FUNCTIONS_5_8, OP_FUNCTIONS_9_12, OP_SPEED_FORWARD, OP_SPEED_REVERSE,
};

/// Direction as received from a control surface.
///
/// Surfaces send direction as text.  Text that is neither forward nor
/// reverse is kept as-is instead of being rejected so the caller can decide
/// to fall back to a safe stop; see [`encode_speed_with_direction_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionArg {
    Known(Direction),
    Unrecognized(String),
}

impl DirectionArg {
    /// Classifies direction text without failing.
    pub fn parse(text: &str) -> Self {
        match text.parse::<Direction>() {
            Ok(direction) => DirectionArg::Known(direction),
            Err(_) => DirectionArg::Unrecognized(text.to_string()),
        }
    }
}

impl From<Direction> for DirectionArg {
    fn from(direction: Direction) -> Self {
        DirectionArg::Known(direction)
    }
}

// ── Locomotive control ────────────────────────────────────────────────────────

fn loco_frame(address: Address, op: u8, data: u8) -> Frame {
    Frame::new(
        CommandClass::LocoControl,
        &[
            address.high_byte() | EXTENDED_ADDRESS_MARKER,
            address.low_byte(),
            op,
            data,
        ],
    )
}

/// Speed and direction in one frame.
///
/// # Examples
///
/// ```rust
/// use dcc_core::{Address, Direction, Speed};
/// use dcc_core::protocol::encode_speed_and_direction;
///
/// let frame = encode_speed_and_direction(
///     Address::new(1234).unwrap(),
///     Speed::new(80).unwrap(),
///     Direction::Reverse,
/// );
/// assert_eq!(frame.as_bytes(), &[0xC4, 0xD2, 0x03, 80]);
/// ```
pub fn encode_speed_and_direction(address: Address, speed: Speed, direction: Direction) -> Frame {
    let op = match direction {
        Direction::Forward => OP_SPEED_FORWARD,
        Direction::Reverse => OP_SPEED_REVERSE,
    };
    loco_frame(address, op, speed.value())
}

/// Speed with direction given as surface text.
///
/// Unrecognised direction text takes the fallback path: a warning is logged
/// and the frame commands *forward at speed 0* regardless of `speed`, so the
/// locomotive is brought to a controlled stop instead of being driven in a
/// guessed direction.
pub fn encode_speed_with_direction_text(address: Address, speed: Speed, text: &str) -> Frame {
    match DirectionArg::parse(text) {
        DirectionArg::Known(direction) => encode_speed_and_direction(address, speed, direction),
        DirectionArg::Unrecognized(text) => unknown_direction_fallback(address, &text),
    }
}

fn unknown_direction_fallback(address: Address, text: &str) -> Frame {
    warn!(
        address = address.value(),
        direction = text,
        "unrecognised direction, commanding stop"
    );
    loco_frame(address, OP_SPEED_FORWARD, Speed::STOP.value())
}

/// Encodes a direction argument, applying the fallback for unrecognised text.
pub fn encode_speed_with_direction_arg(address: Address, speed: Speed, arg: &DirectionArg) -> Frame {
    match arg {
        DirectionArg::Known(direction) => encode_speed_and_direction(address, speed, *direction),
        DirectionArg::Unrecognized(text) => unknown_direction_fallback(address, text),
    }
}

/// Emergency stop for one locomotive, keeping its direction.
pub fn encode_emergency_stop(address: Address, direction: Direction) -> Frame {
    let op = match direction {
        Direction::Forward => OP_ESTOP_FORWARD,
        Direction::Reverse => OP_ESTOP_REVERSE,
    };
    loco_frame(address, op, 0)
}

/// Emergency stop with direction given as text.
///
/// Unlike the speed command there is no fallback here: a safety command with
/// an unknown direction is refused.
///
/// # Errors
///
/// Returns [`CodecError::InvalidDirection`] when `text` is not a direction.
pub fn encode_emergency_stop_text(address: Address, text: &str) -> Result<Frame, CodecError> {
    let direction = text.parse::<Direction>()?;
    Ok(encode_emergency_stop(address, direction))
}

/// The whole function group containing `index`, read from `states`.
///
/// Decoders replace the complete group on every command, so the frame always
/// carries every member of the group, not just the function that changed.
pub fn encode_function_group(
    address: Address,
    index: FunctionIndex,
    states: &FunctionStates,
) -> Frame {
    let group = index.group();
    let op = match group {
        FunctionGroup::F0ToF4 => OP_FUNCTIONS_0_4,
        FunctionGroup::F5ToF8 => OP_FUNCTIONS_5_8,
        FunctionGroup::F9ToF12 => OP_FUNCTIONS_9_12,
        FunctionGroup::F13ToF20 => OP_FUNCTIONS_13_20,
        FunctionGroup::F21ToF28 => OP_FUNCTIONS_21_28,
    };
    let all = states.as_array();
    let data = group
        .members()
        .iter()
        .enumerate()
        .filter(|(_, &member)| all[usize::from(member)])
        .fold(0u8, |acc, (bit, _)| acc | (1 << bit));
    loco_frame(address, op, data)
}

// ── Accessories ───────────────────────────────────────────────────────────────

/// Raw accessory decoder command.
pub fn encode_accessory_signal(address: Address, opcode: u8, data: u8) -> Frame {
    Frame::new(
        CommandClass::Accessory,
        &[address.high_byte(), address.low_byte(), opcode, data],
    )
}

/// Sets a turnout to `position`.
pub fn encode_turnout(address: Address, position: TurnoutPosition) -> Frame {
    let op = match position {
        TurnoutPosition::Normal => OP_ACCESSORY_NORMAL,
        TurnoutPosition::Reverse => OP_ACCESSORY_REVERSE,
    };
    encode_accessory_signal(address, op, 0)
}

// ── Configuration variables ───────────────────────────────────────────────────

/// Operations-mode write: programs `cv` on the decoder at `address` while it
/// sits on the main track.
pub fn encode_cv_write(address: Address, cv: Cv, value: u8) -> Frame {
    Frame::new(
        CommandClass::OpsProgram,
        &[
            address.high_byte(),
            address.low_byte(),
            cv.high_byte(),
            cv.low_byte(),
            value,
        ],
    )
}

/// Service-mode read of `cv` on the programming track.
pub fn encode_cv_read(cv: Cv) -> Frame {
    Frame::new(CommandClass::ServiceRead, &[cv.high_byte(), cv.low_byte()])
}

/// Service-mode write of `cv` on the programming track.
pub fn encode_cv_write_service(cv: Cv, value: u8) -> Frame {
    Frame::new(
        CommandClass::ServiceWrite,
        &[cv.high_byte(), cv.low_byte(), value],
    )
}

/// Switches the programming track in or out of service mode.
pub fn encode_programming_track(enable: bool) -> Frame {
    let class = if enable {
        CommandClass::EnterProgramming
    } else {
        CommandClass::ExitProgramming
    };
    Frame::new(class, &[])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
