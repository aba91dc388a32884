use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Callback invoked by a connection for every inbound notification.
///
/// Arguments are the characteristic UUID and the raw payload.
pub type NotifyCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Opaque handle to a resolved GATT characteristic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicHandle {
    service_uuid: String,
    uuid: String,
}

impl CharacteristicHandle {
    pub(crate) fn new(service_uuid: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            service_uuid: service_uuid.into().to_ascii_lowercase(),
            uuid: uuid.into().to_ascii_lowercase(),
        }
    }

    /// Returns the owning service UUID.
    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// Device response to a characteristic write.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteAck {
    /// The device accepted the write.
    Accepted,
    /// The write completed but the device signalled non-acceptance.
    Rejected,
}

/// BLE stack capability the link manager is built on.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scans for `window` and returns every visible device address.
    async fn scan(&self, window: Duration) -> Result<BTreeSet<String>, TransportError>;

    /// Restarts the BLE adapter as a recovery action.
    async fn restart_adapter(&self) -> Result<(), TransportError>;

    /// Opens a connection to one device.
    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, TransportError>;
}

/// One live connection to a device.
#[async_trait]
pub trait BleConnection: Send + Sync + fmt::Debug {
    /// Returns the connected device address.
    fn address(&self) -> &str;

    /// Resolves a characteristic inside a service.
    async fn characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicHandle, TransportError>;

    /// Writes a payload and reports whether the device accepted it.
    ///
    /// Notification signals pending from before the write are discarded.
    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<WriteAck, TransportError>;

    /// Enables notifications and routes each one to `callback`.
    async fn subscribe(
        &self,
        characteristic: &CharacteristicHandle,
        callback: NotifyCallback,
    ) -> Result<(), TransportError>;

    /// Waits until at least one notification has been delivered since the
    /// last write; returns `false` when `timeout` elapses first.
    async fn wait_for_notification(&self, timeout: Duration) -> Result<bool, TransportError>;

    /// Returns whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Tears the connection down.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
