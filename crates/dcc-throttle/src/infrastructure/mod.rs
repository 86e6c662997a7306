//! Infrastructure layer for the throttle backend.
//!
//! Contains OS-facing adapters: the serial session to the command station,
//! port discovery and hot-plug monitoring, file-system storage, and the UI
//! command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and `dcc_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod discovery;
pub mod serial;
pub mod storage;
pub mod ui_bridge;
