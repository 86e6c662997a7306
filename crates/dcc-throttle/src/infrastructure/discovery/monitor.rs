//! PortMonitor: keeps the session attached to the configured port.
//!
//! ```text
//!          configured port present            open ok
//!   Idle ──────────────────────────► Connecting ───────► Connected
//!    ▲                                   │ open failed        │
//!    └───────────────────────────────────┘                    │
//!    └──── port detached / link lost / reconfigured ──────────┘
//! ```
//!
//! Every trigger (a poll tick, an OS hot-plug hint, or a configuration
//! change) re-enumerates the ports and then re-evaluates the state machine.
//! A missing port is not an error for the caller: it is logged once and the
//! monitor stays `Idle` until the port shows up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::application::events::{EventBus, StationEvent};
use crate::application::station::{CommandStation, PortInfo};
use crate::infrastructure::discovery::enumerate::{DiscoveryError, PortEnumerator};
use crate::infrastructure::serial::SessionTransport;
use crate::infrastructure::storage::config::{InterfaceConfig, InterfaceKind};

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Capacity of the trigger channel feeding a spawned monitor.
pub const TRIGGER_CAPACITY: usize = 16;

/// OS hot-plug notification.  Carries no payload; the monitor re-enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached,
    Removed,
}

/// Something that makes the monitor re-evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorTrigger {
    Tick,
    Hotplug(HotplugEvent),
    /// The user changed the interface settings.
    Reconfigure(InterfaceConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Connecting,
    Connected { port: String },
}

pub struct PortMonitor {
    enumerator: Arc<dyn PortEnumerator>,
    session: Arc<SessionTransport>,
    events: EventBus,
    interface: InterfaceConfig,
    state: MonitorState,
    /// Last published port list; `None` until the first enumeration.
    snapshot: Option<Vec<PortInfo>>,
    /// Port already reported missing, so the warning is not repeated every tick.
    reported_missing: Option<String>,
}

impl PortMonitor {
    pub fn new(
        enumerator: Arc<dyn PortEnumerator>,
        session: Arc<SessionTransport>,
        events: EventBus,
        interface: InterfaceConfig,
    ) -> Self {
        Self {
            enumerator,
            session,
            events,
            interface,
            state: MonitorState::Idle,
            snapshot: None,
            reported_missing: None,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn snapshot(&self) -> &[PortInfo] {
        self.snapshot.as_deref().unwrap_or_default()
    }

    /// Processes one trigger and returns the resulting state.
    pub async fn handle(&mut self, trigger: MonitorTrigger) -> MonitorState {
        match trigger {
            MonitorTrigger::Tick => trace!("poll tick"),
            MonitorTrigger::Hotplug(event) => debug!(?event, "hot-plug notification"),
            MonitorTrigger::Reconfigure(interface) => self.reconfigure(interface).await,
        }

        match self.enumerator.list_ports() {
            Ok(ports) => self.publish_snapshot(ports),
            Err(e) => {
                // Keep the previous snapshot; the next trigger retries.
                warn!("{e}");
                return self.state.clone();
            }
        }

        self.evaluate().await;
        self.state.clone()
    }

    async fn reconfigure(&mut self, interface: InterfaceConfig) {
        if interface == self.interface {
            debug!("interface settings unchanged");
            return;
        }
        info!(kind = ?interface.kind, port = ?interface.port, "interface reconfigured");
        self.interface = interface;
        self.reported_missing = None;
        if self.state != MonitorState::Idle {
            self.session.close().await;
            self.state = MonitorState::Idle;
        }
    }

    fn publish_snapshot(&mut self, ports: Vec<PortInfo>) {
        if self.snapshot.as_ref() == Some(&ports) {
            return;
        }
        debug!(count = ports.len(), "serial port list changed");
        self.events.publish(StationEvent::PortsChanged(ports.clone()));
        self.snapshot = Some(ports);
    }

    fn port_present(&self, port: &str) -> bool {
        self.snapshot().iter().any(|p| p.path == port)
    }

    async fn evaluate(&mut self) {
        if let MonitorState::Connected { port } = &self.state {
            if !self.session.connection_state().connected {
                warn!(port = %port, "link lost, will reconnect");
            } else if !self.port_present(port) {
                info!(port = %port, "command station detached");
            } else {
                return;
            }
            self.session.close().await;
            self.state = MonitorState::Idle;
        }

        let port = match (self.interface.kind, self.interface.port.as_deref()) {
            (InterfaceKind::NceUsb, Some(port)) => port.to_string(),
            _ => return,
        };

        if !self.port_present(&port) {
            if self.reported_missing.as_deref() != Some(port.as_str()) {
                warn!("{}", DiscoveryError::PortUnavailable(port.clone()));
                self.reported_missing = Some(port);
            }
            return;
        }
        self.reported_missing = None;

        self.state = MonitorState::Connecting;
        match self.session.open(&port, self.interface.baud_rate).await {
            Ok(handle) => {
                debug!(generation = handle.generation(), "monitor connected");
                self.state = MonitorState::Connected { port };
            }
            Err(e) => {
                warn!("{e}; retrying on next trigger");
                self.state = MonitorState::Idle;
            }
        }
    }

    /// Runs the monitor as a background task.
    ///
    /// The first poll tick fires immediately.  The task ends when `running`
    /// is cleared or every trigger sender has been dropped.
    pub fn spawn(
        mut self,
        mut triggers: mpsc::Receiver<MonitorTrigger>,
        poll_interval: Duration,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?poll_interval, "port monitor started");

            while running.load(Ordering::Relaxed) {
                let trigger = tokio::select! {
                    _ = ticker.tick() => MonitorTrigger::Tick,
                    received = triggers.recv() => match received {
                        Some(trigger) => trigger,
                        None => break,
                    },
                };
                self.handle(trigger).await;
            }
            info!("port monitor stopped");
        })
    }
}
