//! ThrowSwitchUseCase: sets turnouts through accessory decoders.

use std::collections::HashMap;
use std::sync::Arc;

use dcc_core::protocol::encode_turnout;
use dcc_core::{Address, TurnoutPosition};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::application::station::{CommandStation, TransportError};

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Throws turnouts and remembers the last position commanded for each.
///
/// The remembered position is what *this process* last sent; accessory
/// decoders do not report back, so a turnout thrown by hand or by another
/// throttle is not reflected.
pub struct ThrowSwitchUseCase {
    station: Arc<dyn CommandStation>,
    positions: Mutex<HashMap<Address, TurnoutPosition>>,
}

impl ThrowSwitchUseCase {
    pub fn new(station: Arc<dyn CommandStation>) -> Self {
        Self {
            station,
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the turnout at `address` to `position`.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] when no command station is attached.
    pub async fn throw_switch(
        &self,
        address: Address,
        position: TurnoutPosition,
    ) -> Result<(), SwitchError> {
        self.station
            .send_strict(encode_turnout(address, position))
            .await?;
        self.positions.lock().await.insert(address, position);
        info!(%address, ?position, "turnout thrown");
        Ok(())
    }

    /// Last position commanded for `address`, if any.
    pub async fn position(&self, address: Address) -> Option<TurnoutPosition> {
        self.positions.lock().await.get(&address).copied()
    }
}
