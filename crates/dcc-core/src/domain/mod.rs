//! Domain entities for the DCC throttle.
//!
//! This module contains pure value types with no infrastructure dependencies.
//!
//! # Why validated newtypes? (for beginners)
//!
//! A DCC address is "just a `u16`", but only 14 of those 16 bits fit on the
//! wire.  Wrapping the number in an [`locomotive::Address`] whose only
//! constructor checks the range means every function that receives an
//! `Address` can rely on it being valid; the check happens exactly once, at
//! the edge where untrusted input (config file, UI) enters the system.
//!
//! The same pattern is used for speed steps, function indices and CV numbers.

/// Decoder function metadata (names and toggle/momentary behaviour).
pub mod decoder;

/// Addresses, speed, direction, function vector.
pub mod locomotive;
