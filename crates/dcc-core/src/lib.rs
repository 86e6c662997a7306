//! # dcc-core
//!
//! Shared library for the DCC throttle containing the command-station frame
//! codec, reply parsing, and the locomotive domain types.
//!
//! This crate has zero dependencies on OS APIs, serial ports, or async
//! runtimes.  Every function in it is synchronous and side-effect free, which
//! is what makes the byte-level behaviour easy to pin down in tests.
//!
//! # Architecture overview (for beginners)
//!
//! Digital Command Control (DCC) drives model locomotives by sending digital
//! packets over the rails.  A *command station* generates those packets; the
//! desktop application talks to the command station over a USB serial link
//! using a compact binary command set (NCE style).
//!
//! - **`domain`** – The values the rest of the system reasons about:
//!   14-bit addresses, 126-step speeds, direction, the 29-entry F0–F28
//!   function vector, and decoder function metadata (toggle or momentary).
//!
//! - **`protocol`** – How those values become bytes.  The codec turns
//!   `(address, speed, direction)` and friends into fixed-size [`Frame`]s,
//!   and the reply module interprets the single-byte status codes the
//!   command station sends back.

pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dcc_core::Address` instead of `dcc_core::domain::locomotive::Address`.
pub use domain::decoder::{DecoderDefinition, FunctionDefinition};
pub use domain::locomotive::{
    Address, Cv, Direction, FunctionAction, FunctionGroup, FunctionIndex, FunctionStates, Speed,
    TurnoutPosition,
};
pub use error::CodecError;
pub use protocol::frame::{CommandClass, Frame};
pub use protocol::reply::{ReplyCode, ReplyError};
