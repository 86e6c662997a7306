//! DispatchThrottleUseCase: the single entry point for throttle commands.
//!
//! Every command follows the same shape:
//!
//! ```text
//! lock locomotive ─► encode frame ─► send ─► update state ─► publish event
//! ```
//!
//! The per-locomotive lock is held across the whole sequence, so two
//! commands for the same engine can never interleave their frames or their
//! state updates.  State is written only after the send succeeded; a send
//! that fails leaves the stored state exactly as it was.
//!
//! While the command station is disconnected, routine sends are skipped by
//! the transport and the state is still updated, so throttles can be set up
//! before the hardware is attached.  Emergency stop is the exception: it
//! uses a strict send and reports that nothing reached the track.

use std::sync::Arc;

use dcc_core::protocol::{
    encode_emergency_stop, encode_function_group, encode_speed_and_direction,
    encode_speed_with_direction_arg, DirectionArg,
};
use dcc_core::{CodecError, Direction, FunctionAction, FunctionIndex, FunctionStates, Speed};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::application::events::{EventBus, StationEvent};
use crate::application::station::{CommandStation, TransportError};
use crate::application::throttle_registry::{
    LocomotiveId, RosterEntry, ThrottleRegistry, ThrottleSlot, ThrottleSnapshot, ThrottleState,
};

/// Error type for throttle dispatch.
#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("locomotive not found: {0}")]
    LocomotiveNotFound(LocomotiveId),

    /// The UI sent an action name this dispatcher does not know.
    #[error("unknown throttle action: {0:?}")]
    UnknownAction(String),

    /// The action was known but its payload was missing or malformed.
    #[error("invalid data for {action}: {reason}")]
    InvalidActionData { action: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What the user asked the throttle to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleAction {
    GetThrottle,
    SetSpeed(Speed),
    SetDirection(DirectionArg),
    /// Function button pressed.
    SetFunction(FunctionIndex),
    /// Function button released.
    ReleaseFunction(FunctionIndex),
    EStop,
    /// Stops every locomotive with in-memory state; the command's
    /// locomotive id is ignored.
    EStopAll,
}

/// A throttle action addressed to one locomotive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleCommand {
    pub locomotive_id: LocomotiveId,
    pub action: ThrottleAction,
}

/// Result of an emergency stop across all locomotives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EStopAllReport {
    pub stopped: Vec<LocomotiveId>,
    pub failed: Vec<(LocomotiveId, String)>,
}

/// Successful result of a throttle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThrottleOutcome {
    Snapshot(ThrottleSnapshot),
    Speed(u8),
    Direction(Direction),
    Functions(FunctionStates),
    Stopped,
    StoppedAll(EStopAllReport),
}

/// The throttle dispatcher.
///
/// Cheap to clone; clones share the registry, the station and the event bus.
#[derive(Clone)]
pub struct DispatchThrottleUseCase {
    registry: Arc<ThrottleRegistry>,
    station: Arc<dyn CommandStation>,
    events: EventBus,
}

impl DispatchThrottleUseCase {
    pub fn new(
        registry: Arc<ThrottleRegistry>,
        station: Arc<dyn CommandStation>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            station,
            events,
        }
    }

    /// Executes one throttle command.
    ///
    /// # Errors
    ///
    /// - [`ThrottleError::LocomotiveNotFound`] if the id is not rostered.
    /// - [`ThrottleError::Transport`] if the send failed; state is unchanged.
    pub async fn dispatch(&self, command: ThrottleCommand) -> Result<ThrottleOutcome, ThrottleError> {
        let id = command.locomotive_id;
        match command.action {
            ThrottleAction::GetThrottle => self.snapshot(id).await.map(ThrottleOutcome::Snapshot),
            ThrottleAction::SetSpeed(speed) => {
                self.set_speed(id, speed).await?;
                Ok(ThrottleOutcome::Speed(speed.value()))
            }
            ThrottleAction::SetDirection(arg) => {
                self.set_direction(id, &arg).await.map(ThrottleOutcome::Direction)
            }
            ThrottleAction::SetFunction(index) => {
                self.press_function(id, index).await.map(ThrottleOutcome::Functions)
            }
            ThrottleAction::ReleaseFunction(index) => {
                self.release_function(id, index).await.map(ThrottleOutcome::Functions)
            }
            ThrottleAction::EStop => {
                self.emergency_stop(id).await?;
                Ok(ThrottleOutcome::Stopped)
            }
            ThrottleAction::EStopAll => {
                Ok(ThrottleOutcome::StoppedAll(self.emergency_stop_all().await))
            }
        }
    }

    async fn lookup(&self, id: LocomotiveId) -> Result<(RosterEntry, ThrottleSlot), ThrottleError> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(ThrottleError::LocomotiveNotFound(id))?;
        let slot = self
            .registry
            .slot(id)
            .await
            .ok_or(ThrottleError::LocomotiveNotFound(id))?;
        Ok((entry, slot))
    }

    /// Current state merged with roster metadata.
    pub async fn snapshot(&self, id: LocomotiveId) -> Result<ThrottleSnapshot, ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let state = slot.lock().await;
        Ok(ThrottleSnapshot::build(&entry, &state))
    }

    async fn set_speed(&self, id: LocomotiveId, speed: Speed) -> Result<(), ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let mut state = slot.lock().await;
        let frame = encode_speed_and_direction(entry.address, speed, state.direction);
        self.station.send(frame).await?;
        state.speed = speed;
        drop(state);

        debug!(address = %entry.address, speed = speed.value(), "speed set");
        self.events.publish(StationEvent::ThrottleUpdated(id));
        Ok(())
    }

    async fn set_direction(
        &self,
        id: LocomotiveId,
        arg: &DirectionArg,
    ) -> Result<Direction, ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let mut state = slot.lock().await;
        let frame = encode_speed_with_direction_arg(entry.address, state.speed, arg);
        self.station.send(frame).await?;
        match arg {
            DirectionArg::Known(direction) => state.direction = *direction,
            DirectionArg::Unrecognized(_) => {
                // The hardware was commanded forward at speed 0; mirror that.
                state.direction = Direction::Forward;
                state.speed = Speed::STOP;
            }
        }
        let direction = state.direction;
        drop(state);

        debug!(address = %entry.address, %direction, "direction set");
        self.events.publish(StationEvent::ThrottleUpdated(id));
        Ok(direction)
    }

    async fn press_function(
        &self,
        id: LocomotiveId,
        index: FunctionIndex,
    ) -> Result<FunctionStates, ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let mut state = slot.lock().await;
        let on = match entry.function_action(index) {
            FunctionAction::Toggle => !state.functions.get(index),
            FunctionAction::Momentary => true,
        };
        self.write_function(&entry, &mut state, index, on).await
    }

    async fn release_function(
        &self,
        id: LocomotiveId,
        index: FunctionIndex,
    ) -> Result<FunctionStates, ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let mut state = slot.lock().await;
        match entry.function_action(index) {
            FunctionAction::Toggle => Ok(state.functions),
            FunctionAction::Momentary => self.write_function(&entry, &mut state, index, false).await,
        }
    }

    async fn write_function(
        &self,
        entry: &RosterEntry,
        state: &mut ThrottleState,
        index: FunctionIndex,
        on: bool,
    ) -> Result<FunctionStates, ThrottleError> {
        let next = state.functions.with(index, on);
        let frame = encode_function_group(entry.address, index, &next);
        self.station.send(frame).await?;
        state.functions = next;

        debug!(address = %entry.address, function = index.value(), on, "function set");
        self.events.publish(StationEvent::ThrottleUpdated(entry.id));
        Ok(next)
    }

    async fn emergency_stop(&self, id: LocomotiveId) -> Result<(), ThrottleError> {
        let (entry, slot) = self.lookup(id).await?;
        let mut state = slot.lock().await;
        let frame = encode_emergency_stop(entry.address, state.direction);
        self.station.send_strict(frame).await?;
        state.speed = Speed::STOP;
        drop(state);

        info!(address = %entry.address, "emergency stop");
        self.events.publish(StationEvent::ThrottleUpdated(id));
        Ok(())
    }

    /// Emergency-stops every locomotive with in-memory state concurrently.
    ///
    /// One failing locomotive does not prevent the others from being
    /// stopped; failures are logged and listed in the report.
    pub async fn emergency_stop_all(&self) -> EStopAllReport {
        let ids = self.registry.active_ids().await;
        let mut tasks = JoinSet::new();
        for id in ids {
            let this = self.clone();
            tasks.spawn(async move { (id, this.emergency_stop(id).await) });
        }

        let mut report = EStopAllReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.stopped.push(id),
                Ok((id, Err(e))) => {
                    warn!(locomotive = %id, "emergency stop failed: {e}");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => error!("emergency stop task panicked: {e}"),
            }
        }
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "emergency stop all"
        );
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::station::{ConnectionState, OperationReply};
    use async_trait::async_trait;
    use dcc_core::{Address, DecoderDefinition, Frame};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    // ── Test doubles ──────────────────────────────────────────────────────────

    struct RecordingStation {
        frames: Mutex<Vec<Vec<u8>>>,
        connected: AtomicBool,
        should_fail: AtomicBool,
        /// Addresses whose strict sends fail.
        failing_addresses: Mutex<Vec<u8>>,
    }

    impl RecordingStation {
        fn connected() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                should_fail: AtomicBool::new(false),
                failing_addresses: Mutex::new(Vec::new()),
            })
        }

        fn disconnected() -> Arc<Self> {
            let station = Self::connected();
            station.connected.store(false, Ordering::SeqCst);
            station
        }

        fn frames(&self) -> Vec<Vec<u8>> {
            self.frames.lock().unwrap().clone()
        }

        fn write(&self, frame: Frame) -> Result<(), TransportError> {
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(TransportError::LinkClosed);
            }
            let bytes = frame.as_bytes().to_vec();
            if self.failing_addresses.lock().unwrap().contains(&bytes[1]) {
                return Err(TransportError::LinkClosed);
            }
            self.frames.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    #[async_trait]
    impl CommandStation for RecordingStation {
        fn connection_state(&self) -> ConnectionState {
            ConnectionState {
                connected: self.connected.load(Ordering::SeqCst),
                programming_track_enabled: false,
            }
        }

        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.write(frame)
        }

        async fn send_strict(&self, frame: Frame) -> Result<(), TransportError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            self.write(frame)
        }

        async fn request(&self, _frame: Frame) -> Result<OperationReply, TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    fn f(index: u8) -> FunctionIndex {
        FunctionIndex::new(index).unwrap()
    }

    fn make_entry(address: u16) -> RosterEntry {
        RosterEntry {
            id: Uuid::new_v4(),
            name: format!("Loco {address}"),
            address: Address::new(address).unwrap(),
            decoder: Some(
                DecoderDefinition::new("Sound")
                    .with_function(f(0), "Headlight", FunctionAction::Toggle)
                    .with_function(f(2), "Horn", FunctionAction::Momentary),
            ),
        }
    }

    fn make_use_case(
        station: Arc<RecordingStation>,
        entries: Vec<RosterEntry>,
    ) -> (DispatchThrottleUseCase, EventBus) {
        let registry = Arc::new(ThrottleRegistry::from_roster(entries));
        let events = EventBus::default();
        let use_case = DispatchThrottleUseCase::new(registry, station, events.clone());
        (use_case, events)
    }

    fn cmd(id: LocomotiveId, action: ThrottleAction) -> ThrottleCommand {
        ThrottleCommand {
            locomotive_id: id,
            action,
        }
    }

    // ── Speed and direction ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_set_speed_uses_stored_direction() {
        // Arrange
        let station = RecordingStation::connected();
        let entry = make_entry(1234);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);
        uc.dispatch(cmd(id, ThrottleAction::SetDirection(Direction::Reverse.into())))
            .await
            .unwrap();

        // Act
        let outcome = uc
            .dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(80).unwrap())))
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, ThrottleOutcome::Speed(80));
        assert_eq!(station.frames().last().unwrap(), &vec![0xC4, 0xD2, 0x03, 80]);
    }

    #[tokio::test]
    async fn test_unrecognised_direction_stops_and_stores_forward() {
        // Arrange
        let station = RecordingStation::connected();
        let entry = make_entry(1234);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);
        uc.dispatch(cmd(id, ThrottleAction::SetDirection(Direction::Reverse.into())))
            .await
            .unwrap();
        uc.dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(40).unwrap())))
            .await
            .unwrap();

        // Act
        let outcome = uc
            .dispatch(cmd(
                id,
                ThrottleAction::SetDirection(DirectionArg::parse("sideways")),
            ))
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, ThrottleOutcome::Direction(Direction::Forward));
        assert_eq!(station.frames().last().unwrap(), &vec![0xC4, 0xD2, 0x04, 0x00]);
        let ThrottleOutcome::Snapshot(snapshot) =
            uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await.unwrap()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.speed, 0);
        assert_eq!(snapshot.direction, Direction::Forward);
    }

    // ── Functions ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_toggle_function_flips_on_each_press() {
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(0)))).await.unwrap();
        let outcome = uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(0)))).await.unwrap();

        assert_eq!(outcome, ThrottleOutcome::Functions(FunctionStates::all_off()));
        assert_eq!(
            station.frames(),
            vec![vec![0xC0, 0x03, 0x07, 0x10], vec![0xC0, 0x03, 0x07, 0x00]]
        );
    }

    #[tokio::test]
    async fn test_momentary_function_press_and_release() {
        // Arrange
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        // Act
        uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(2)))).await.unwrap();
        uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(2)))).await.unwrap();
        uc.dispatch(cmd(id, ThrottleAction::ReleaseFunction(f(2)))).await.unwrap();

        // Assert: pressing twice keeps it on, release turns it off.
        assert_eq!(
            station.frames(),
            vec![
                vec![0xC0, 0x03, 0x07, 0b0010],
                vec![0xC0, 0x03, 0x07, 0b0010],
                vec![0xC0, 0x03, 0x07, 0b0000],
            ]
        );
    }

    #[tokio::test]
    async fn test_release_of_toggle_function_sends_nothing() {
        // Arrange
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, events) = make_use_case(Arc::clone(&station), vec![entry]);
        uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(0)))).await.unwrap();
        let mut rx = events.subscribe();

        // Act
        let outcome = uc
            .dispatch(cmd(id, ThrottleAction::ReleaseFunction(f(0))))
            .await
            .unwrap();

        // Assert
        assert_eq!(station.frames().len(), 1);
        assert_eq!(
            outcome,
            ThrottleOutcome::Functions(FunctionStates::all_off().with(f(0), true))
        );
        assert!(rx.try_recv().is_err(), "no update event for a no-op");
    }

    #[tokio::test]
    async fn test_undefined_function_defaults_to_toggle() {
        let station = RecordingStation::connected();
        let mut entry = make_entry(3);
        entry.decoder = None;
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(21)))).await.unwrap();
        uc.dispatch(cmd(id, ThrottleAction::ReleaseFunction(f(21)))).await.unwrap();

        assert_eq!(station.frames(), vec![vec![0xC0, 0x03, 0x16, 0x01]]);
    }

    // ── Failure and offline behaviour ─────────────────────────────────────────

    #[tokio::test]
    async fn test_failed_send_leaves_state_unchanged() {
        // Arrange
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);
        station.should_fail.store(true, Ordering::SeqCst);

        // Act
        let result = uc
            .dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(50).unwrap())))
            .await;

        // Assert
        assert!(matches!(result, Err(ThrottleError::Transport(_))));
        let ThrottleOutcome::Snapshot(snapshot) =
            uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await.unwrap()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.speed, 0);
    }

    #[tokio::test]
    async fn test_disconnected_routine_command_updates_state_without_frame() {
        let station = RecordingStation::disconnected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        let outcome = uc
            .dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(20).unwrap())))
            .await
            .unwrap();

        assert_eq!(outcome, ThrottleOutcome::Speed(20));
        assert!(station.frames().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_estop_reports_not_connected() {
        let station = RecordingStation::disconnected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        let result = uc.dispatch(cmd(id, ThrottleAction::EStop)).await;

        assert!(matches!(
            result,
            Err(ThrottleError::Transport(TransportError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_unknown_locomotive_is_rejected() {
        let (uc, _) = make_use_case(RecordingStation::connected(), Vec::new());
        let id = Uuid::new_v4();

        let result = uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await;

        assert!(matches!(result, Err(ThrottleError::LocomotiveNotFound(x)) if x == id));
    }

    // ── Emergency stop ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_estop_keeps_direction_and_zeroes_speed() {
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);
        uc.dispatch(cmd(id, ThrottleAction::SetDirection(Direction::Reverse.into())))
            .await
            .unwrap();
        uc.dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(90).unwrap())))
            .await
            .unwrap();

        uc.dispatch(cmd(id, ThrottleAction::EStop)).await.unwrap();

        assert_eq!(station.frames().last().unwrap(), &vec![0xC0, 0x03, 0x06, 0x00]);
        let ThrottleOutcome::Snapshot(snapshot) =
            uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await.unwrap()
        else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.speed, 0);
        assert_eq!(snapshot.direction, Direction::Reverse);
    }

    #[tokio::test]
    async fn test_estop_all_isolates_failures() {
        // Arrange: three active locomotives, the one at address 2 fails.
        let station = RecordingStation::connected();
        let entries: Vec<RosterEntry> = [1u16, 2, 3].into_iter().map(make_entry).collect();
        let ids: Vec<LocomotiveId> = entries.iter().map(|e| e.id).collect();
        let (uc, _) = make_use_case(Arc::clone(&station), entries);
        for &id in &ids {
            uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await.unwrap();
        }
        station.failing_addresses.lock().unwrap().push(2);

        // Act
        let outcome = uc.dispatch(cmd(Uuid::nil(), ThrottleAction::EStopAll)).await.unwrap();

        // Assert
        let ThrottleOutcome::StoppedAll(report) = outcome else {
            panic!("expected report");
        };
        assert_eq!(report.stopped.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ids[1]);
        assert_eq!(station.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_estop_all_skips_locomotives_never_touched() {
        let station = RecordingStation::connected();
        let (uc, _) = make_use_case(Arc::clone(&station), vec![make_entry(1), make_entry(2)]);

        let report = uc.emergency_stop_all().await;

        assert!(report.stopped.is_empty());
        assert!(station.frames().is_empty());
    }

    // ── Events and concurrency ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_successful_mutation_publishes_throttle_updated() {
        let station = RecordingStation::connected();
        let entry = make_entry(3);
        let id = entry.id;
        let (uc, events) = make_use_case(station, vec![entry]);
        let mut rx = events.subscribe();

        uc.dispatch(cmd(id, ThrottleAction::SetSpeed(Speed::new(1).unwrap())))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), StationEvent::ThrottleUpdated(id));
    }

    #[tokio::test]
    async fn test_concurrent_function_presses_are_serialised() {
        // Arrange: 29 concurrent presses of different functions on one engine.
        let station = RecordingStation::connected();
        let mut entry = make_entry(3);
        entry.decoder = None;
        let id = entry.id;
        let (uc, _) = make_use_case(Arc::clone(&station), vec![entry]);

        // Act
        let mut tasks = JoinSet::new();
        for i in 0u8..=28 {
            let uc = uc.clone();
            tasks.spawn(async move {
                uc.dispatch(cmd(id, ThrottleAction::SetFunction(f(i)))).await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        // Assert: no update was lost.
        let ThrottleOutcome::Snapshot(snapshot) =
            uc.dispatch(cmd(id, ThrottleAction::GetThrottle)).await.unwrap()
        else {
            panic!("expected snapshot");
        };
        assert!(snapshot.functions.iter().all(|slot| slot.on));
        assert_eq!(station.frames().len(), 29);
    }
}
