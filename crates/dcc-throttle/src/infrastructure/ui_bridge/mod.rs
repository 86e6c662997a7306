//! UI command bridge: exposes application-layer operations to the throttle UI.
//!
//! Every UI-facing function lives here and delegates to the shared
//! [`AppState`].  The presentation layer is the only consumer of this module;
//! it must NOT be imported by the application or domain layers.
//!
//! # Calling convention (for beginners)
//!
//! The UI sends a command name plus JSON arguments and receives JSON back.
//! Throttle commands all go through one function, [`dispatch`], which takes
//! the locomotive id, an action name and an action-specific `data` value:
//!
//! ```text
//! dispatch(id, "set_speed",        42)
//! dispatch(id, "set_direction",    "reverse")
//! dispatch(id, "set_function",     2)       // button pressed
//! dispatch(id, "release_function", 2)       // button released
//! dispatch(id, "estop",            null)
//! ```
//!
//! `data` may also be an object carrying the same value under a named key
//! (`{"speed": 42}`, `{"direction": "reverse"}`, `{"function": 2}`).
//!
//! # `CommandResult<T>` wrapper
//!
//! All commands return `CommandResult<T>` rather than `Result<T, E>`, so every
//! response has the same shape: `{ success: bool, data: T | null, error:
//! string | null }`.  No backend error ever escapes as anything other than a
//! human-readable string.
//!
//! # Events
//!
//! State changes that the UI did not ask for (cable pulled, another throttle
//! moved a locomotive, the port list changed) are pushed through
//! [`AppState::subscribe_events`].

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dcc_core::protocol::DirectionArg;
use dcc_core::{Address, Cv, FunctionIndex, Speed, TurnoutPosition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::{
    dispatch_throttle::{
        DispatchThrottleUseCase, ThrottleAction, ThrottleCommand, ThrottleError, ThrottleOutcome,
    },
    events::{EventBus, StationEvent},
    program_decoder::ProgramDecoderUseCase,
    station::{CommandStation, PortInfo},
    throttle_registry::{LocomotiveId, RosterEntry, ThrottleRegistry},
    throw_switch::ThrowSwitchUseCase,
};
use crate::infrastructure::{
    discovery::{MonitorTrigger, PortEnumerator, PortMonitor, TRIGGER_CAPACITY},
    serial::{LinkOpener, SessionTransport},
    storage::config::{save_config_at, AppConfig, InterfaceConfig, InterfaceKind},
};

// ── Shared application state ──────────────────────────────────────────────────

/// Application state shared between UI commands.
///
/// Wrapped in `Arc<>` and handed to every command.  The session, registry and
/// use cases do their own locking; only the config needs a mutex here.
pub struct AppState {
    /// The current configuration, as last loaded or saved.
    pub config: Mutex<AppConfig>,
    /// Where `set_interface` / `set_port` persist the config.
    pub config_path: PathBuf,
    pub session: Arc<SessionTransport>,
    pub registry: Arc<ThrottleRegistry>,
    pub throttle: DispatchThrottleUseCase,
    pub programmer: ProgramDecoderUseCase,
    pub switches: ThrowSwitchUseCase,
    pub enumerator: Arc<dyn PortEnumerator>,
    pub events: EventBus,
    monitor_tx: mpsc::Sender<MonitorTrigger>,
    monitor_rx: Mutex<Option<mpsc::Receiver<MonitorTrigger>>>,
}

impl AppState {
    /// Wires the session, use cases and roster from `config`.
    ///
    /// Nothing is opened yet; call [`AppState::start_monitor`] to begin
    /// watching for the command station.
    pub fn new(
        config: AppConfig,
        config_path: PathBuf,
        opener: Arc<dyn LinkOpener>,
        enumerator: Arc<dyn PortEnumerator>,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let session = Arc::new(SessionTransport::with_timeout(
            opener,
            events.clone(),
            config.interface.request_timeout(),
        ));
        let station: Arc<dyn CommandStation> = session.clone();
        let registry = Arc::new(ThrottleRegistry::from_roster(config.roster()));
        let (monitor_tx, monitor_rx) = mpsc::channel(TRIGGER_CAPACITY);

        Arc::new(Self {
            throttle: DispatchThrottleUseCase::new(
                Arc::clone(&registry),
                Arc::clone(&station),
                events.clone(),
            ),
            programmer: ProgramDecoderUseCase::new(Arc::clone(&station), Arc::clone(&registry)),
            switches: ThrowSwitchUseCase::new(station),
            config: Mutex::new(config),
            config_path,
            session,
            registry,
            enumerator,
            events,
            monitor_tx,
            monitor_rx: Mutex::new(Some(monitor_rx)),
        })
    }

    /// Spawns the port monitor.  Returns `None` if it was already started.
    pub async fn start_monitor(&self, running: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        let triggers = self.monitor_rx.lock().await.take()?;
        let (interface, poll_interval) = {
            let cfg = self.config.lock().await;
            (cfg.interface.clone(), cfg.discovery.poll_interval())
        };
        let monitor = PortMonitor::new(
            Arc::clone(&self.enumerator),
            Arc::clone(&self.session),
            self.events.clone(),
            interface,
        );
        Some(monitor.spawn(triggers, poll_interval, running))
    }

    /// Sender for hot-plug hints and reconfiguration.
    pub fn monitor_trigger(&self) -> mpsc::Sender<MonitorTrigger> {
        self.monitor_tx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StationEvent> {
        self.events.subscribe()
    }

    async fn apply_interface(&self, interface: InterfaceConfig) -> Result<(), String> {
        {
            let mut cfg = self.config.lock().await;
            cfg.interface = interface.clone();
            save_config_at(&self.config_path, &cfg)
                .map_err(|e| format!("failed to save config: {e}"))?;
        }
        if self
            .monitor_tx
            .send(MonitorTrigger::Reconfigure(interface))
            .await
            .is_err()
        {
            warn!("port monitor is not running; new interface applies on restart");
        }
        Ok(())
    }
}

// ── Data Transfer Objects (Presentation layer) ────────────────────────────────

/// DTO representing one roster entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntryDto {
    pub id: String,
    pub name: String,
    pub address: u16,
    pub decoder: Option<String>,
}

impl From<&RosterEntry> for RosterEntryDto {
    fn from(e: &RosterEntry) -> Self {
        Self {
            id: e.id.to_string(),
            name: e.name.clone(),
            address: e.address.value(),
            decoder: e.decoder.as_ref().map(|d| d.name.clone()),
        }
    }
}

/// DTO for the interface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDto {
    pub kind: InterfaceKind,
    pub port: Option<String>,
    pub baud_rate: u32,
}

/// DTO for the live connection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStateDto {
    pub connected: bool,
    pub programming_track_enabled: bool,
    pub port: Option<String>,
}

/// Unified response wrapper used by UI commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize, E: std::fmt::Display> From<Result<T, E>> for CommandResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// ── Action parsing ────────────────────────────────────────────────────────────

fn invalid(action: &str, reason: impl Into<String>) -> ThrottleError {
    ThrottleError::InvalidActionData {
        action: action.to_string(),
        reason: reason.into(),
    }
}

static NULL: Value = Value::Null;

/// Reads `data` itself, or `data[key]` when `data` is an object.
fn field<'a>(data: &'a Value, key: &str) -> &'a Value {
    match data {
        Value::Object(map) => map.get(key).unwrap_or(&NULL),
        other => other,
    }
}

fn small_number(action: &str, data: &Value, key: &str) -> Result<u8, ThrottleError> {
    let n = field(data, key)
        .as_u64()
        .ok_or_else(|| invalid(action, format!("expected a non-negative integer {key}")))?;
    u8::try_from(n).map_err(|_| invalid(action, format!("{key} {n} is too large")))
}

fn function_index(action: &str, data: &Value) -> Result<FunctionIndex, ThrottleError> {
    Ok(FunctionIndex::new(small_number(action, data, "function")?)?)
}

/// Translates a UI action name and its JSON payload into a [`ThrottleAction`].
///
/// # Errors
///
/// - [`ThrottleError::UnknownAction`] for an unrecognised action name.
/// - [`ThrottleError::InvalidActionData`] when the payload has the wrong shape.
/// - [`ThrottleError::Codec`] when a value is out of range.
pub fn parse_action(action: &str, data: &Value) -> Result<ThrottleAction, ThrottleError> {
    match action {
        "get_throttle" => Ok(ThrottleAction::GetThrottle),
        "set_speed" => Ok(ThrottleAction::SetSpeed(Speed::new(small_number(
            action, data, "speed",
        )?)?)),
        "set_direction" => {
            let text = field(data, "direction")
                .as_str()
                .ok_or_else(|| invalid(action, "expected a direction string"))?;
            Ok(ThrottleAction::SetDirection(DirectionArg::parse(text)))
        }
        "set_function" => Ok(ThrottleAction::SetFunction(function_index(action, data)?)),
        "release_function" => Ok(ThrottleAction::ReleaseFunction(function_index(action, data)?)),
        "estop" => Ok(ThrottleAction::EStop),
        "estop_all" => Ok(ThrottleAction::EStopAll),
        other => Err(ThrottleError::UnknownAction(other.to_string())),
    }
}

fn parse_locomotive_id(id: &str) -> Result<LocomotiveId, String> {
    id.parse::<LocomotiveId>()
        .map_err(|e| format!("invalid locomotive id {id:?}: {e}"))
}

// ── UI commands ───────────────────────────────────────────────────────────────

/// Runs one throttle action.
///
/// # Example (frontend)
/// ```ts
/// const r = await invoke('dispatch', { locomotiveId, action: 'set_speed', data: 42 });
/// ```
pub async fn dispatch(
    state: Arc<AppState>,
    locomotive_id: String,
    action: String,
    data: Value,
) -> CommandResult<ThrottleOutcome> {
    let locomotive_id = match parse_locomotive_id(&locomotive_id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    let action = match parse_action(&action, &data) {
        Ok(action) => action,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state
        .throttle
        .dispatch(ThrottleCommand {
            locomotive_id,
            action,
        })
        .await
        .into()
}

/// Returns every rostered locomotive and consist, sorted by name.
pub async fn get_roster(state: Arc<AppState>) -> CommandResult<Vec<RosterEntryDto>> {
    let roster = state.registry.roster().await;
    CommandResult::ok(roster.iter().map(RosterEntryDto::from).collect())
}

/// Returns the current interface settings.
pub async fn get_interface(state: Arc<AppState>) -> CommandResult<InterfaceDto> {
    let cfg = state.config.lock().await;
    CommandResult::ok(InterfaceDto {
        kind: cfg.interface.kind,
        port: cfg.interface.port.clone(),
        baud_rate: cfg.interface.baud_rate,
    })
}

/// Applies and persists new interface settings; the monitor reconnects.
pub async fn set_interface(state: Arc<AppState>, interface: InterfaceDto) -> CommandResult<()> {
    if interface.baud_rate == 0 {
        return CommandResult::err("baud rate must be greater than zero");
    }
    let next = {
        let cfg = state.config.lock().await;
        InterfaceConfig {
            kind: interface.kind,
            port: interface.port,
            baud_rate: interface.baud_rate,
            ..cfg.interface.clone()
        }
    };
    info!(kind = ?next.kind, port = ?next.port, "interface settings changed");
    state.apply_interface(next).await.into()
}

/// Selects the serial port, keeping the other interface settings.
pub async fn set_port(state: Arc<AppState>, port: Option<String>) -> CommandResult<()> {
    let next = {
        let cfg = state.config.lock().await;
        InterfaceConfig {
            port,
            ..cfg.interface.clone()
        }
    };
    state.apply_interface(next).await.into()
}

/// Lists the serial ports currently attached.
pub async fn list_ports(state: Arc<AppState>) -> CommandResult<Vec<PortInfo>> {
    state.enumerator.list_ports().into()
}

/// Returns whether the command station is connected.
pub async fn get_connection_state(state: Arc<AppState>) -> CommandResult<ConnectionStateDto> {
    let current = state.session.connection_state();
    CommandResult::ok(ConnectionStateDto {
        connected: current.connected,
        programming_track_enabled: current.programming_track_enabled,
        port: state.session.port().await,
    })
}

pub async fn enable_programming_track(state: Arc<AppState>) -> CommandResult<()> {
    state.programmer.set_programming_track(true).await.into()
}

pub async fn disable_programming_track(state: Arc<AppState>) -> CommandResult<()> {
    state.programmer.set_programming_track(false).await.into()
}

/// Reads a CV on the programming track.
pub async fn read_cv(state: Arc<AppState>, cv: u16) -> CommandResult<u8> {
    let cv = match Cv::new(cv) {
        Ok(cv) => cv,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state.programmer.read_cv(cv).await.into()
}

/// Writes a CV on the programming track.
pub async fn write_cv(state: Arc<AppState>, cv: u16, value: u8) -> CommandResult<()> {
    let cv = match Cv::new(cv) {
        Ok(cv) => cv,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state.programmer.write_cv(cv, value).await.into()
}

/// Writes a CV on a rostered locomotive on the main track.
pub async fn write_cv_on_main(
    state: Arc<AppState>,
    locomotive_id: String,
    cv: u16,
    value: u8,
) -> CommandResult<()> {
    let id = match parse_locomotive_id(&locomotive_id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(e),
    };
    let cv = match Cv::new(cv) {
        Ok(cv) => cv,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state.programmer.write_cv_on_main(id, cv, value).await.into()
}

/// Throws the turnout at an accessory address.
pub async fn throw_switch(
    state: Arc<AppState>,
    address: u16,
    position: TurnoutPosition,
) -> CommandResult<()> {
    let address = match Address::new(address) {
        Ok(address) => address,
        Err(e) => return CommandResult::err(e.to_string()),
    };
    state.switches.throw_switch(address, position).await.into()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
