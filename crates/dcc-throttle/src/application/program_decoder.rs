//! ProgramDecoderUseCase: programming track control and CV access.
//!
//! Two programming modes exist:
//!
//! - **Service mode** runs on the isolated programming track.  The track must
//!   first be switched into programming mode; reads and writes then wait for
//!   the command station's reply, one operation at a time.
//! - **Operations mode** ("programming on the main") writes a CV of a
//!   specific locomotive while it sits on the layout.  It cannot read.

use std::sync::Arc;

use dcc_core::protocol::{
    encode_cv_read, encode_cv_write, encode_cv_write_service, encode_programming_track,
};
use dcc_core::Cv;
use thiserror::Error;
use tracing::info;

use crate::application::station::{CommandStation, TransportError};
use crate::application::throttle_registry::{LocomotiveId, ThrottleRegistry};

/// Error type for the programming use case.
#[derive(Debug, Error)]
pub enum ProgrammingError {
    /// Service-mode access needs the programming track to be enabled first.
    #[error("programming track is not enabled")]
    ProgrammingTrackDisabled,

    #[error("locomotive not found: {0}")]
    LocomotiveNotFound(LocomotiveId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct ProgramDecoderUseCase {
    station: Arc<dyn CommandStation>,
    registry: Arc<ThrottleRegistry>,
}

impl ProgramDecoderUseCase {
    pub fn new(station: Arc<dyn CommandStation>, registry: Arc<ThrottleRegistry>) -> Self {
        Self { station, registry }
    }

    /// Switches the programming track in or out of service mode.
    ///
    /// The connection state's `programming_track_enabled` flag changes only
    /// once the command station has acknowledged the switch.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`], [`TransportError::OperationPending`],
    /// [`TransportError::HardwareTimeout`], or a station rejection.
    pub async fn set_programming_track(&self, enable: bool) -> Result<(), ProgrammingError> {
        let reply = self.station.request(encode_programming_track(enable)).await?;
        reply.ack()?;
        info!(enable, "programming track switched");
        Ok(())
    }

    fn require_programming_track(&self) -> Result<(), ProgrammingError> {
        if self.station.connection_state().programming_track_enabled {
            Ok(())
        } else {
            Err(ProgrammingError::ProgrammingTrackDisabled)
        }
    }

    /// Reads `cv` from the decoder on the programming track.
    pub async fn read_cv(&self, cv: Cv) -> Result<u8, ProgrammingError> {
        self.require_programming_track()?;
        let reply = self.station.request(encode_cv_read(cv)).await?;
        let value = reply.cv_value()?;
        info!(cv = cv.value(), value, "CV read");
        Ok(value)
    }

    /// Writes `cv` on the decoder on the programming track.
    pub async fn write_cv(&self, cv: Cv, value: u8) -> Result<(), ProgrammingError> {
        self.require_programming_track()?;
        let reply = self.station.request(encode_cv_write_service(cv, value)).await?;
        reply.ack()?;
        info!(cv = cv.value(), value, "CV written (service mode)");
        Ok(())
    }

    /// Writes `cv` on a rostered locomotive on the main track.
    pub async fn write_cv_on_main(
        &self,
        id: LocomotiveId,
        cv: Cv,
        value: u8,
    ) -> Result<(), ProgrammingError> {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or(ProgrammingError::LocomotiveNotFound(id))?;
        self.station
            .send_strict(encode_cv_write(entry.address, cv, value))
            .await?;
        info!(address = %entry.address, cv = cv.value(), value, "CV written (operations mode)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::station::{ConnectionState, OperationReply};
    use crate::application::throttle_registry::RosterEntry;
    use async_trait::async_trait;
    use dcc_core::{Address, Frame, ReplyCode};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Replies with scripted bytes and records every written frame.
    #[derive(Default)]
    struct ScriptedStation {
        state: Mutex<ConnectionState>,
        replies: Mutex<VecDeque<Vec<u8>>>,
        written: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedStation {
        fn with_state(connected: bool, programming: bool) -> Arc<Self> {
            let station = Self::default();
            *station.state.lock().unwrap() = ConnectionState {
                connected,
                programming_track_enabled: programming,
            };
            Arc::new(station)
        }

        fn script(&self, reply: &[u8]) {
            self.replies.lock().unwrap().push_back(reply.to_vec());
        }
    }

    #[async_trait]
    impl CommandStation for ScriptedStation {
        fn connection_state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }

        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            self.written.lock().unwrap().push(frame.to_wire());
            Ok(())
        }

        async fn send_strict(&self, frame: Frame) -> Result<(), TransportError> {
            if !self.connection_state().connected {
                return Err(TransportError::NotConnected);
            }
            self.send(frame).await
        }

        async fn request(&self, frame: Frame) -> Result<OperationReply, TransportError> {
            self.send_strict(frame).await?;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .map(OperationReply::new)
                .ok_or(TransportError::HardwareTimeout(std::time::Duration::from_secs(3)))
        }
    }

    fn cv(n: u16) -> Cv {
        Cv::new(n).unwrap()
    }

    fn make_use_case(station: Arc<ScriptedStation>) -> ProgramDecoderUseCase {
        ProgramDecoderUseCase::new(station, Arc::new(ThrottleRegistry::new()))
    }

    #[tokio::test]
    async fn test_read_cv_requires_programming_track() {
        let station = ScriptedStation::with_state(true, false);
        let uc = make_use_case(Arc::clone(&station));

        let result = uc.read_cv(cv(1)).await;

        assert!(matches!(result, Err(ProgrammingError::ProgrammingTrackDisabled)));
        assert!(station.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_cv_returns_decoder_value() {
        // Arrange
        let station = ScriptedStation::with_state(true, true);
        station.script(&[3, b'!']);
        let uc = make_use_case(Arc::clone(&station));

        // Act
        let value = uc.read_cv(cv(1)).await.unwrap();

        // Assert
        assert_eq!(value, 3);
        assert_eq!(station.written.lock().unwrap()[0], vec![0xA9, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_read_cv_without_decoder_ack_is_rejected() {
        let station = ScriptedStation::with_state(true, true);
        station.script(&[0xFF, b'3']);
        let uc = make_use_case(station);

        let result = uc.read_cv(cv(8)).await;

        assert!(matches!(
            result,
            Err(ProgrammingError::Transport(TransportError::StationRejected(
                ReplyCode::DataOutOfRange
            )))
        ));
    }

    #[tokio::test]
    async fn test_write_cv_service_mode_sends_value() {
        let station = ScriptedStation::with_state(true, true);
        station.script(b"!");
        let uc = make_use_case(Arc::clone(&station));

        uc.write_cv(cv(29), 6).await.unwrap();

        assert_eq!(station.written.lock().unwrap()[0], vec![0xA8, 0x00, 29, 6]);
    }

    #[tokio::test]
    async fn test_enable_programming_track_surfaces_rejection() {
        let station = ScriptedStation::with_state(true, false);
        station.script(b"0");
        let uc = make_use_case(station);

        let result = uc.set_programming_track(true).await;

        assert!(matches!(
            result,
            Err(ProgrammingError::Transport(TransportError::StationRejected(
                ReplyCode::NotSupported
            )))
        ));
    }

    #[tokio::test]
    async fn test_write_cv_on_main_targets_rostered_address() {
        // Arrange
        let station = ScriptedStation::with_state(true, false);
        let entry = RosterEntry {
            id: Uuid::new_v4(),
            name: "Consolidation".to_string(),
            address: Address::new(1234).unwrap(),
            decoder: None,
        };
        let registry = Arc::new(ThrottleRegistry::from_roster([entry.clone()]));
        let uc = ProgramDecoderUseCase::new(Arc::clone(&station) as Arc<dyn CommandStation>, registry);

        // Act
        uc.write_cv_on_main(entry.id, cv(3), 10).await.unwrap();

        // Assert
        assert_eq!(
            station.written.lock().unwrap()[0],
            vec![0xAE, 0x04, 0xD2, 0x00, 0x03, 10]
        );
    }

    #[tokio::test]
    async fn test_write_cv_on_main_while_disconnected_fails() {
        let station = ScriptedStation::with_state(false, false);
        let entry = RosterEntry {
            id: Uuid::new_v4(),
            name: "Switcher".to_string(),
            address: Address::new(9).unwrap(),
            decoder: None,
        };
        let registry = Arc::new(ThrottleRegistry::from_roster([entry.clone()]));
        let uc = ProgramDecoderUseCase::new(station, registry);

        let result = uc.write_cv_on_main(entry.id, cv(3), 10).await;

        assert!(matches!(
            result,
            Err(ProgrammingError::Transport(TransportError::NotConnected))
        ));
    }
}
