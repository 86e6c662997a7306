//! Application layer use cases for the throttle backend.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure value types in `dcc_core`) and the infrastructure (serial ports,
//! config files, the UI bridge).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "toggle the
//!   headlight on locomotive 1234").
//! - **Depend on abstractions** (the [`station::CommandStation`] trait) rather
//!   than the serial port itself, so tests can substitute a recording double.
//! - **Contain no OS calls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`station`** – The command-station port: connection state, the
//!   send/request contract, and transport errors.
//!
//! - **`events`** – Broadcast notifications for the UI (connection changes,
//!   port list changes, throttle updates).
//!
//! - **`throttle_registry`** – Roster entries and the per-locomotive runtime
//!   state (speed, direction, functions), each behind its own lock.
//!
//! - **`dispatch_throttle`** – The single entry point for throttle commands.
//!   This is the most frequently used path: every slider move and function
//!   button press goes through it.
//!
//! - **`program_decoder`** – Programming track control and CV read/write.
//!
//! - **`throw_switch`** – Turnout control through accessory decoders.

pub mod dispatch_throttle;
pub mod events;
pub mod program_decoder;
pub mod station;
pub mod throttle_registry;
pub mod throw_switch;
