use serde::Serialize;
use strum_macros::Display;

use super::hardware::{BleConnection, CharacteristicHandle};
use crate::handlers::CoverState;
use crate::sensor::SensorState;
use crate::utils::normalise_address;

/// Connection lifecycle of one device session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "connected")]
    Connected,
}

/// Long-lived per-device aggregate.
///
/// The connection and characteristic handle come and go with the link; the
/// sensor state and cover state live as long as the session.
#[derive(Debug)]
pub struct DeviceSession {
    address: String,
    name: String,
    connection_state: ConnectionState,
    connection: Option<Box<dyn BleConnection>>,
    command_characteristic: Option<CharacteristicHandle>,
    sensors: SensorState,
    cover_state: CoverState,
}

impl DeviceSession {
    /// Creates a disconnected session for one configured device.
    #[must_use]
    pub fn new(address: &str, name: impl Into<String>) -> Self {
        Self {
            address: normalise_address(address),
            name: name.into(),
            connection_state: ConnectionState::Disconnected,
            connection: None,
            command_characteristic: None,
            sensors: SensorState::new(),
            cover_state: CoverState::Unknown,
        }
    }

    /// Returns the normalised device address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Returns the session's sensor state.
    #[must_use]
    pub fn sensors(&self) -> &SensorState {
        &self.sensors
    }

    #[must_use]
    pub fn cover_state(&self) -> CoverState {
        self.cover_state
    }

    /// Returns the cached command characteristic, if resolved.
    #[must_use]
    pub fn command_characteristic(&self) -> Option<&CharacteristicHandle> {
        self.command_characteristic.as_ref()
    }

    pub(crate) fn set_cover_state(&mut self, state: CoverState) {
        self.cover_state = state;
    }

    pub(crate) fn connection(&self) -> Option<&dyn BleConnection> {
        self.connection.as_deref()
    }

    pub(crate) fn mark_connecting(&mut self) {
        self.connection_state = ConnectionState::Connecting;
    }

    pub(crate) fn attach(&mut self, connection: Box<dyn BleConnection>) {
        self.connection = Some(connection);
        self.command_characteristic = None;
        self.connection_state = ConnectionState::Connected;
    }

    pub(crate) fn cache_characteristic(&mut self, handle: CharacteristicHandle) {
        self.command_characteristic = Some(handle);
    }

    /// Drops the connection and every handle derived from it.
    pub(crate) fn detach(&mut self) -> Option<Box<dyn BleConnection>> {
        self.command_characteristic = None;
        self.connection_state = ConnectionState::Disconnected;
        self.connection.take()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn new_session_starts_disconnected_and_unknown() {
        let session = DeviceSession::new("02:aa:bb:cc:dd:ee", "Kitchen");

        assert_eq!("02:AA:BB:CC:DD:EE", session.address());
        assert_eq!("Kitchen", session.name());
        assert_eq!(ConnectionState::Disconnected, session.connection_state());
        assert_eq!(CoverState::Unknown, session.cover_state());
        assert!(session.command_characteristic().is_none());
    }

    #[test]
    fn detach_clears_cached_handles() {
        let mut session = DeviceSession::new("02:AA:BB:CC:DD:EE", "Kitchen");
        session.mark_connecting();
        session.cache_characteristic(CharacteristicHandle::new("fe50", "fe51"));

        let previous = session.detach();

        assert!(previous.is_none());
        assert!(session.command_characteristic().is_none());
        assert_eq!(ConnectionState::Disconnected, session.connection_state());
    }
}
