//! In-memory link opener for tests and offline runs.
//!
//! Each `open` creates a `tokio::io::duplex` pipe.  The session gets one end;
//! the other end plays the command station and can be taken by the test to
//! read written frames and write replies.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use super::link::{BoxedLink, LinkOpener};

const PIPE_CAPACITY: usize = 256;

/// A [`LinkOpener`] backed by in-memory pipes.
#[derive(Default)]
pub struct MockLinkOpener {
    opened: Mutex<Vec<String>>,
    station_ends: Mutex<Vec<DuplexStream>>,
    refuse: AtomicBool,
}

impl MockLinkOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent opens fail with `PermissionDenied`.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Ports passed to `open`, in order, including refused attempts.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Takes the station end of the most recent link.
    pub fn take_station_end(&self) -> Option<DuplexStream> {
        self.station_ends.lock().ok()?.pop()
    }

    /// Drops every station end still held, as if the cable was pulled.
    pub fn hang_up(&self) {
        if let Ok(mut ends) = self.station_ends.lock() {
            ends.clear();
        }
    }
}

#[async_trait]
impl LinkOpener for MockLinkOpener {
    async fn open(&self, port: &str, _baud_rate: u32) -> io::Result<BoxedLink> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(port.to_string());
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{port} is busy"),
            ));
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        if let Ok(mut ends) = self.station_ends.lock() {
            ends.push(theirs);
        }
        Ok(Box::new(ours))
    }
}
