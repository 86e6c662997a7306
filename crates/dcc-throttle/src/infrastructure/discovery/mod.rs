//! Port discovery and hot-plug monitoring.
//!
//! - `enumerate` lists the serial ports currently present on the machine.
//! - `monitor` watches that list and keeps the session connected to the
//!   configured port: it connects when the port appears, disconnects when it
//!   disappears, and reconnects when the user picks a different port.
//!
//! # Why polling? (for beginners)
//!
//! Operating systems can notify a program when a USB device is plugged in or
//! removed, but every OS does it differently.  The monitor therefore treats
//! OS notifications as optional hints ([`HotplugEvent`]) and also re-checks
//! the port list on a fixed cadence.  Either way the same state machine runs,
//! so a missed notification only delays the reconnect until the next tick.

pub mod enumerate;
pub mod mock;
pub mod monitor;

pub use enumerate::{DiscoveryError, PortEnumerator, SerialPortEnumerator};
pub use mock::StaticPortEnumerator;
pub use monitor::{
    HotplugEvent, MonitorState, MonitorTrigger, PortMonitor, DEFAULT_POLL_INTERVAL,
    TRIGGER_CAPACITY,
};
