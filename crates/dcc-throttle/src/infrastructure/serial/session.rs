//! SessionTransport: the one open link to the command station.
//!
//! # Lifecycle
//!
//! ```text
//!            open(port)                       close() / link lost
//! Disconnected ────────► Connected(generation N) ───────────────► Disconnected
//!                            │  open(other port)
//!                            └────────────────► Connected(generation N+1)
//! ```
//!
//! Every `open` and `close` bumps the session *generation*.  A
//! [`SessionHandle`] remembers the generation it was issued for; once the
//! generation moves on the handle is stale and can no longer write.
//!
//! # Replies (for beginners)
//!
//! The command station answers every command with at least one status byte,
//! in the order the commands were written.  Routine sends do not wait for
//! their answer.  Instead each routine write adds its reply length to an
//! *owed* counter, and the background reader task swallows that many bytes
//! before forwarding anything else.  What remains can only belong to a
//! [`SessionTransport::request`], which reads it from a small bounded queue.
//!
//! ```text
//! write speed   owed 0 → 1
//! write 0x9E    (request)
//! read  '!'     owed 1 → 0, swallowed
//! read  '2'     forwarded: the request's reply
//! ```
//!
//! A request holds the link lock until its reply arrives (or times out), so
//! no other frame is written in between.  A timeout resets the owed counter:
//! after a missed reply the count can no longer be trusted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dcc_core::protocol::encode_programming_track;
use dcc_core::{CommandClass, Frame, ReplyCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::application::events::{EventBus, StationEvent};
use crate::application::station::{
    CommandStation, ConnectionState, OperationReply, TransportError,
};
use crate::infrastructure::serial::link::{BoxedLink, LinkOpener};

/// How long a request waits for the station's reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const READ_BUFFER_SIZE: usize = 64;

/// Reply chunks kept for a request.  Unsolicited bytes beyond this are
/// dropped.
const REPLY_QUEUE_CAPACITY: usize = 16;

/// Proof of having opened a particular session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    generation: u64,
    port: String,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

struct Link {
    port: String,
    writer: WriteHalf<BoxedLink>,
    replies: mpsc::Receiver<Vec<u8>>,
    /// Reply bytes still expected for routine sends.
    owed: Arc<AtomicUsize>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Clears the pending-request slot when dropped.
struct PendingGuard<'a>(&'a AtomicBool);

impl<'a> PendingGuard<'a> {
    fn acquire(slot: &'a AtomicBool) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(slot))
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Publishes `next` and emits events for every field that changed.
fn replace_state(
    state: &watch::Sender<ConnectionState>,
    events: &EventBus,
    next: ConnectionState,
) {
    let previous = state.send_replace(next);
    if previous.connected != next.connected {
        events.publish(StationEvent::ConnectionChanged(next.connected));
    }
    if previous.programming_track_enabled != next.programming_track_enabled {
        events.publish(StationEvent::ProgrammingTrackChanged(
            next.programming_track_enabled,
        ));
    }
}

/// Marks the link of `generation` as lost, unless a newer session exists.
fn mark_lost(
    generation: u64,
    current: &AtomicU64,
    state: &watch::Sender<ConnectionState>,
    events: &EventBus,
) {
    let mut previous = ConnectionState::default();
    let changed = state.send_if_modified(|s| {
        if current.load(Ordering::SeqCst) != generation || !s.connected {
            return false;
        }
        previous = *s;
        *s = ConnectionState::default();
        true
    });
    if changed {
        warn!(generation, "command station link lost");
        events.publish(StationEvent::ConnectionChanged(false));
        if previous.programming_track_enabled {
            events.publish(StationEvent::ProgrammingTrackChanged(false));
        }
    }
}

/// Swallows the leading bytes of `bytes` that answer routine sends and
/// returns the rest.
fn settle_routine_replies<'a>(bytes: &'a [u8], owed: &AtomicUsize) -> &'a [u8] {
    let mut settled = 0;
    while settled < bytes.len()
        && owed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    {
        let code = ReplyCode::from_byte(bytes[settled]);
        if !code.is_ok() {
            warn!(%code, "command station rejected a routine command");
        }
        settled += 1;
    }
    &bytes[settled..]
}

async fn read_loop(
    mut reader: ReadHalf<BoxedLink>,
    replies: mpsc::Sender<Vec<u8>>,
    owed: Arc<AtomicUsize>,
    generation: u64,
    current: Arc<AtomicU64>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: EventBus,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(generation, "link reached end of stream");
                break;
            }
            Ok(n) => {
                trace!(bytes = ?&buf[..n], "reply bytes");
                let rest = settle_routine_replies(&buf[..n], &owed);
                if rest.is_empty() {
                    continue;
                }
                match replies.try_send(rest.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        debug!(bytes = ?dropped, "reply queue full, unsolicited bytes dropped");
                    }
                    // Session dropped the receiver: closed on purpose.
                    Err(TrySendError::Closed(_)) => return,
                }
            }
            Err(e) => {
                warn!(generation, "link read error: {e}");
                break;
            }
        }
    }
    mark_lost(generation, &current, &state, &events);
}

async fn read_reply(
    replies: &mut mpsc::Receiver<Vec<u8>>,
    expected: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut reply = Vec::with_capacity(expected);
    while reply.len() < expected {
        match replies.recv().await {
            Some(chunk) => reply.extend_from_slice(&chunk),
            None => return Err(TransportError::LinkClosed),
        }
    }
    reply.truncate(expected);
    Ok(reply)
}

/// The process-wide command-station session.
pub struct SessionTransport {
    opener: Arc<dyn LinkOpener>,
    link: Mutex<Option<Link>>,
    generation: Arc<AtomicU64>,
    pending: AtomicBool,
    state: Arc<watch::Sender<ConnectionState>>,
    events: EventBus,
    request_timeout: Duration,
}

impl SessionTransport {
    pub fn new(opener: Arc<dyn LinkOpener>, events: EventBus) -> Self {
        Self::with_timeout(opener, events, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        opener: Arc<dyn LinkOpener>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            opener,
            link: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            pending: AtomicBool::new(false),
            state: Arc::new(state),
            events,
            request_timeout,
        }
    }

    /// Watches connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Port of the open link, if any.
    pub async fn port(&self) -> Option<String> {
        self.link.lock().await.as_ref().map(|l| l.port.clone())
    }

    /// Opens `port`, replacing and releasing any previous link.
    ///
    /// Previously issued handles become stale whether or not the open
    /// succeeds.
    ///
    /// # Errors
    ///
    /// [`TransportError::OpenFailed`] if the port cannot be opened; the
    /// session is then disconnected.
    pub async fn open(&self, port: &str, baud_rate: u32) -> Result<SessionHandle, TransportError> {
        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            debug!(port = %previous.port, "releasing previous link");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let stream = match self.opener.open(port, baud_rate).await {
            Ok(stream) => stream,
            Err(source) => {
                replace_state(&self.state, &self.events, ConnectionState::default());
                return Err(TransportError::OpenFailed {
                    port: port.to_string(),
                    source,
                });
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);
        let owed = Arc::new(AtomicUsize::new(0));
        let reader = tokio::spawn(read_loop(
            reader,
            tx,
            Arc::clone(&owed),
            generation,
            Arc::clone(&self.generation),
            Arc::clone(&self.state),
            self.events.clone(),
        ));
        *link = Some(Link {
            port: port.to_string(),
            writer,
            replies: rx,
            owed,
            reader,
        });

        replace_state(
            &self.state,
            &self.events,
            ConnectionState {
                connected: true,
                programming_track_enabled: false,
            },
        );
        info!(port, baud_rate, generation, "command station connected");
        Ok(SessionHandle {
            generation,
            port: port.to_string(),
        })
    }

    /// Closes the link.  Safe to call when nothing is open.
    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            info!(port = %previous.port, "command station disconnected");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        replace_state(&self.state, &self.events, ConnectionState::default());
    }

    /// Whether `handle` belongs to the current session.
    pub fn is_current(&self, handle: &SessionHandle) -> bool {
        self.generation.load(Ordering::SeqCst) == handle.generation
    }

    /// Strict send through a specific session.
    ///
    /// # Errors
    ///
    /// [`TransportError::StaleSession`] if the session has been reopened or
    /// closed since `handle` was issued.
    pub async fn send_on(&self, handle: &SessionHandle, frame: Frame) -> Result<(), TransportError> {
        if !self.is_current(handle) {
            return Err(TransportError::StaleSession);
        }
        self.write_frame(frame, true).await
    }

    fn link_lost(&self) {
        mark_lost(
            self.generation.load(Ordering::SeqCst),
            &self.generation,
            &self.state,
            &self.events,
        );
    }

    async fn write_frame(&self, frame: Frame, strict: bool) -> Result<(), TransportError> {
        let mut guard = self.link.lock().await;
        let connected = self.state.borrow().connected;
        let link = match guard.as_mut() {
            Some(link) if connected => link,
            _ if strict => return Err(TransportError::NotConnected),
            _ => {
                debug!(?frame, "not connected, frame skipped");
                return Ok(());
            }
        };

        // Counted before writing: the reply can beat the end of write_all.
        link.owed.fetch_add(frame.reply_len(), Ordering::AcqRel);
        if let Err(e) = write_all(&mut link.writer, &frame.to_wire()).await {
            self.link_lost();
            return Err(e.into());
        }
        trace!(?frame, "frame written");
        Ok(())
    }

    async fn exchange(&self, frame: Frame) -> Result<OperationReply, TransportError> {
        let _pending =
            PendingGuard::acquire(&self.pending).ok_or(TransportError::OperationPending)?;

        let mut guard = self.link.lock().await;
        let connected = self.state.borrow().connected;
        let link = match guard.as_mut() {
            Some(link) if connected => link,
            _ => return Err(TransportError::NotConnected),
        };

        let mut stale = 0usize;
        while let Ok(bytes) = link.replies.try_recv() {
            stale += bytes.len();
        }
        if stale > 0 {
            debug!(stale, "discarded stale reply bytes");
        }

        if let Err(e) = write_all(&mut link.writer, &frame.to_wire()).await {
            self.link_lost();
            return Err(e.into());
        }

        let reply = match tokio::time::timeout(
            self.request_timeout,
            read_reply(&mut link.replies, frame.reply_len()),
        )
        .await
        {
            Ok(reply) => OperationReply::new(reply?),
            Err(_) => {
                warn!(?frame, timeout = ?self.request_timeout, "no reply from command station");
                link.owed.store(0, Ordering::Release);
                self.recover_from_timeout(link, frame).await;
                return Err(TransportError::HardwareTimeout(self.request_timeout));
            }
        };

        let enable = match frame.class() {
            CommandClass::EnterProgramming => Some(true),
            CommandClass::ExitProgramming => Some(false),
            _ => None,
        };
        if let Some(enable) = enable {
            let current = *self.state.borrow();
            if current.connected && reply.ack().is_ok() {
                let next = ConnectionState {
                    programming_track_enabled: enable,
                    ..current
                };
                replace_state(&self.state, &self.events, next);
            }
        }
        drop(guard);

        trace!(?frame, reply = ?reply.bytes(), "request complete");
        Ok(reply)
    }

    /// After an unanswered programming-track toggle the station may or may
    /// not have switched.  An unanswered enter is followed by a best-effort
    /// exit so the hardware matches the flag, which stays off.
    async fn recover_from_timeout(&self, link: &mut Link, frame: Frame) {
        match frame.class() {
            CommandClass::EnterProgramming => {
                let exit = encode_programming_track(false);
                link.owed.fetch_add(exit.reply_len(), Ordering::AcqRel);
                match write_all(&mut link.writer, &exit.to_wire()).await {
                    Ok(()) => warn!("programming track state unknown, exit requested"),
                    Err(e) => {
                        warn!("programming track state unknown, exit failed: {e}");
                        self.link_lost();
                    }
                }
            }
            CommandClass::ExitProgramming => {
                warn!(
                    enabled = self.state.borrow().programming_track_enabled,
                    "programming track state unknown, flag left unchanged"
                );
            }
            _ => {}
        }
    }
}

async fn write_all(writer: &mut WriteHalf<BoxedLink>, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

#[async_trait]
impl CommandStation for SessionTransport {
    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.write_frame(frame, false).await
    }

    async fn send_strict(&self, frame: Frame) -> Result<(), TransportError> {
        self.write_frame(frame, true).await
    }

    async fn request(&self, frame: Frame) -> Result<OperationReply, TransportError> {
        self.exchange(frame).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dcc_core::protocol::{encode_cv_read, encode_programming_track, encode_speed_and_direction};
    use dcc_core::{Address, Cv, Direction, ReplyCode, Speed};
    use std::io;
    use tokio::io::DuplexStream;

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Opens in-memory pipes and hands the station end to the test.
    struct DuplexOpener {
        station_ends: mpsc::UnboundedSender<DuplexStream>,
        should_fail: AtomicBool,
    }

    #[async_trait]
    impl LinkOpener for DuplexOpener {
        async fn open(&self, _port: &str, _baud_rate: u32) -> io::Result<BoxedLink> {
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            let (ours, theirs) = tokio::io::duplex(256);
            let _ = self.station_ends.send(theirs);
            Ok(Box::new(ours))
        }
    }

    struct Harness {
        session: Arc<SessionTransport>,
        opener: Arc<DuplexOpener>,
        station_ends: mpsc::UnboundedReceiver<DuplexStream>,
        events: EventBus,
    }

    fn harness(timeout: Duration) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let opener = Arc::new(DuplexOpener {
            station_ends: tx,
            should_fail: AtomicBool::new(false),
        });
        let events = EventBus::default();
        let session = Arc::new(SessionTransport::with_timeout(
            Arc::clone(&opener) as Arc<dyn LinkOpener>,
            events.clone(),
            timeout,
        ));
        Harness {
            session,
            opener,
            station_ends: rx,
            events,
        }
    }

    fn speed_frame() -> Frame {
        encode_speed_and_direction(
            Address::new(3).unwrap(),
            Speed::new(10).unwrap(),
            Direction::Forward,
        )
    }

    async fn read_n(station: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        station.read_exact(&mut buf).await.unwrap();
        buf
    }

    /// Issues a request and answers it from the station end once the frame
    /// has been written.
    async fn answered_request(
        session: &Arc<SessionTransport>,
        station: &mut DuplexStream,
        frame: Frame,
        reply: &[u8],
    ) -> Result<OperationReply, TransportError> {
        let session = Arc::clone(session);
        let task = tokio::spawn(async move { session.request(frame).await });
        read_n(station, frame.to_wire().len()).await;
        station.write_all(reply).await.unwrap();
        task.await.unwrap()
    }

    // ── Disconnected behaviour ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_while_disconnected_is_silent_noop() {
        let h = harness(DEFAULT_REQUEST_TIMEOUT);
        assert!(h.session.send(speed_frame()).await.is_ok());
    }

    #[tokio::test]
    async fn test_strict_send_while_disconnected_fails() {
        let h = harness(DEFAULT_REQUEST_TIMEOUT);
        let result = h.session.send_strict(speed_frame()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_request_while_disconnected_fails() {
        let h = harness(DEFAULT_REQUEST_TIMEOUT);
        let result = h.session.request(encode_programming_track(true)).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    // ── Open / send / close ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_open_connects_and_writes_wire_bytes() {
        // Arrange
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        let mut events = h.events.subscribe();

        // Act
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        h.session.send(speed_frame()).await.unwrap();

        // Assert
        assert!(h.session.connection_state().connected);
        assert_eq!(events.recv().await.unwrap(), StationEvent::ConnectionChanged(true));
        assert_eq!(read_n(&mut station, 5).await, vec![0xA2, 0xC0, 0x03, 0x04, 10]);
        assert_eq!(h.session.port().await.as_deref(), Some("/dev/ttyUSB0"));
    }

    #[tokio::test]
    async fn test_failed_open_leaves_session_disconnected() {
        let h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.opener.should_fail.store(true, Ordering::SeqCst);

        let result = h.session.open("/dev/missing", 9600).await;

        assert!(matches!(result, Err(TransportError::OpenFailed { .. })));
        assert!(!h.session.connection_state().connected);
    }

    #[tokio::test]
    async fn test_reopen_makes_previous_handle_stale() {
        // Arrange
        let h = harness(DEFAULT_REQUEST_TIMEOUT);
        let first = h.session.open("/dev/ttyUSB0", 9600).await.unwrap();

        // Act
        let second = h.session.open("/dev/ttyUSB1", 9600).await.unwrap();

        // Assert
        assert!(matches!(
            h.session.send_on(&first, speed_frame()).await,
            Err(TransportError::StaleSession)
        ));
        assert!(h.session.send_on(&second, speed_frame()).await.is_ok());
        assert!(second.generation() > first.generation());
    }

    #[tokio::test]
    async fn test_close_resets_programming_track_flag() {
        // Arrange
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        answered_request(&h.session, &mut station, encode_programming_track(true), b"!")
            .await
            .unwrap();
        assert!(h.session.connection_state().programming_track_enabled);

        // Act
        h.session.close().await;

        // Assert
        assert_eq!(h.session.connection_state(), ConnectionState::default());
    }

    #[tokio::test]
    async fn test_remote_hangup_marks_link_lost() {
        // Arrange
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        let mut state = h.session.subscribe_state();
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let station = h.station_ends.recv().await.unwrap();

        // Act: unplugging drops the station end.
        drop(station);

        // Assert
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| !s.connected))
            .await
            .expect("link loss should be noticed")
            .unwrap();
        assert!(h.session.send(speed_frame()).await.is_ok());
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_programming_track_flag_flips_only_after_ack() {
        // Arrange
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        let mut events = h.events.subscribe();

        // Act: first attempt rejected.
        let reply =
            answered_request(&h.session, &mut station, encode_programming_track(true), b"0")
                .await
                .unwrap();

        // Assert
        assert!(matches!(
            reply.ack(),
            Err(TransportError::StationRejected(ReplyCode::NotSupported))
        ));
        assert!(!h.session.connection_state().programming_track_enabled);

        // Act: second attempt acknowledged.
        answered_request(&h.session, &mut station, encode_programming_track(true), b"!")
            .await
            .unwrap();

        // Assert
        assert!(h.session.connection_state().programming_track_enabled);
        assert_eq!(
            events.recv().await.unwrap(),
            StationEvent::ProgrammingTrackChanged(true)
        );
    }

    #[tokio::test]
    async fn test_cv_read_request_collects_two_reply_bytes() {
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();

        let session = Arc::clone(&h.session);
        let request =
            tokio::spawn(async move { session.request(encode_cv_read(Cv::new(1).unwrap())).await });
        assert_eq!(read_n(&mut station, 3).await, vec![0xA9, 0x00, 0x01]);
        // Value and status arrive in separate reads.
        station.write_all(&[3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        station.write_all(b"!").await.unwrap();

        let reply = request.await.unwrap().unwrap();
        assert_eq!(reply.cv_value().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stale_reply_bytes_are_discarded_before_request() {
        // Arrange: acknowledgements of earlier routine commands are buffered.
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        station.write_all(b"!!3").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        let frame = encode_cv_read(Cv::new(8).unwrap());
        let reply = answered_request(&h.session, &mut station, frame, &[0x97, b'!'])
            .await
            .unwrap();

        // Assert
        assert_eq!(reply.cv_value().unwrap(), 0x97);
    }

    #[tokio::test]
    async fn test_second_concurrent_request_is_rejected() {
        // Arrange: first request is waiting for its reply.
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        let session = Arc::clone(&h.session);
        let first =
            tokio::spawn(async move { session.request(encode_programming_track(true)).await });
        read_n(&mut station, 1).await;

        // Act
        let second = h.session.request(encode_programming_track(false)).await;

        // Assert
        assert!(matches!(second, Err(TransportError::OperationPending)));
        station.write_all(b"!").await.unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_late_routine_ack_is_not_taken_as_request_reply() {
        // Arrange: the speed command's '!' is still in flight when the
        // request is written.
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        h.session.send(speed_frame()).await.unwrap();

        // Act
        let session = Arc::clone(&h.session);
        let request =
            tokio::spawn(async move { session.request(encode_programming_track(true)).await });
        assert_eq!(
            read_n(&mut station, 6).await,
            vec![0xA2, 0xC0, 0x03, 0x04, 10, 0x9E]
        );
        station.write_all(b"!").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        station.write_all(b"2").await.unwrap();
        let reply = request.await.unwrap().unwrap();

        // Assert
        assert_eq!(reply.bytes(), b"2");
        assert!(!h.session.connection_state().programming_track_enabled);
    }

    #[tokio::test]
    async fn test_late_routine_ack_does_not_shift_cv_value() {
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        h.session.send(speed_frame()).await.unwrap();

        let session = Arc::clone(&h.session);
        let request =
            tokio::spawn(async move { session.request(encode_cv_read(Cv::new(1).unwrap())).await });
        read_n(&mut station, 5 + 3).await;
        // Speed ack, CV value and status arrive in one read.
        station.write_all(&[b'!', 0x21, b'!']).await.unwrap();

        assert_eq!(request.await.unwrap().unwrap().cv_value().unwrap(), 0x21);
    }

    #[tokio::test]
    async fn test_routine_acks_do_not_pile_up() {
        // Arrange
        let mut h = harness(DEFAULT_REQUEST_TIMEOUT);
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();

        // Act: a long driving session, every command acknowledged.
        for _ in 0..500 {
            h.session.send(speed_frame()).await.unwrap();
            read_n(&mut station, 5).await;
            station.write_all(b"!").await.unwrap();
        }

        // Assert
        let mut guard = h.session.link.lock().await;
        let link = guard.as_mut().unwrap();
        for _ in 0..100 {
            if link.owed.load(Ordering::Acquire) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(link.owed.load(Ordering::Acquire), 0);
        assert!(matches!(
            link.replies.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_request_without_reply_times_out_and_frees_slot() {
        // Arrange
        let mut h = harness(Duration::from_millis(50));
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();

        // Act
        let result = h.session.request(encode_programming_track(true)).await;

        // Assert: an unanswered enter is followed by an exit.
        assert!(matches!(result, Err(TransportError::HardwareTimeout(_))));
        assert_eq!(read_n(&mut station, 2).await, vec![0x9E, 0x9F]);
        assert!(!h.session.connection_state().programming_track_enabled);
        station.write_all(b"!").await.unwrap();
        let retry =
            answered_request(&h.session, &mut station, encode_programming_track(true), b"!").await;
        assert!(retry.unwrap().ack().is_ok());
        assert!(h.session.connection_state().programming_track_enabled);
    }

    #[tokio::test]
    async fn test_unanswered_exit_leaves_flag_unchanged() {
        // Arrange: programming track on.
        let mut h = harness(Duration::from_millis(50));
        h.session.open("/dev/ttyUSB0", 9600).await.unwrap();
        let mut station = h.station_ends.recv().await.unwrap();
        answered_request(&h.session, &mut station, encode_programming_track(true), b"!")
            .await
            .unwrap();

        // Act
        let result = h.session.request(encode_programming_track(false)).await;

        // Assert
        assert!(matches!(result, Err(TransportError::HardwareTimeout(_))));
        assert_eq!(read_n(&mut station, 1).await, vec![0x9F]);
        assert!(h.session.connection_state().programming_track_enabled);
    }
}
