//! Serial infrastructure: the link to the command station.
//!
//! - **`link`** opens the raw byte stream.  Production uses `tokio-serial`;
//!   tests substitute an in-memory duplex pipe.
//! - **`session`** owns the open link and implements the
//!   [`CommandStation`](crate::application::station::CommandStation) port on
//!   top of it.
//! - **`mock`** is an in-memory opener for tests and offline runs.

pub mod link;
pub mod mock;
pub mod session;

pub use link::{BoxedLink, LinkOpener, SerialLink, SerialLinkOpener, DEFAULT_BAUD_RATE};
pub use mock::MockLinkOpener;
pub use session::{SessionHandle, SessionTransport, DEFAULT_REQUEST_TIMEOUT};
