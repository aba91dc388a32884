use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::hardware::{BleConnection, BleTransport, CharacteristicHandle, WriteAck};
use super::session::DeviceSession;
use crate::error::{LinkError, TransportError};
use crate::handlers::{Command, FrameCodec};
use crate::notification::NotificationHandler;
use crate::protocol::{self, EndpointId};
use crate::utils::{format_hex, normalise_address};

/// Default bound on connection attempts per acquisition.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
/// Default delay between connection attempts.
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_secs(2);
/// Default number of fleet scans, counting the one after an adapter restart.
pub const DEFAULT_SCAN_ATTEMPTS: u32 = 2;
/// Default delay between fleet scans.
pub const DEFAULT_SCAN_DELAY: Duration = Duration::from_secs(2);
/// Default length of one scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);
/// Default wait for the notification confirming a query.
pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded fixed-delay retry parameters.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy; at least one attempt is always made.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// let policy = am43::RetryPolicy::new(0, Duration::from_secs(1));
    /// assert_eq!(1, policy.max_attempts());
    /// ```
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub fn max_attempts(self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn delay(self) -> Duration {
        self.delay
    }
}

/// Timing parameters for a link manager.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct LinkSettings {
    #[builder(default = RetryPolicy::new(DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY))]
    connect_retry: RetryPolicy,
    #[builder(default = RetryPolicy::new(DEFAULT_SCAN_ATTEMPTS, DEFAULT_SCAN_DELAY))]
    scan_retry: RetryPolicy,
    #[builder(default = DEFAULT_SCAN_WINDOW)]
    scan_window: Duration,
    #[builder(default = DEFAULT_NOTIFICATION_TIMEOUT)]
    notification_timeout: Duration,
}

impl LinkSettings {
    #[must_use]
    pub fn connect_retry(&self) -> RetryPolicy {
        self.connect_retry
    }

    #[must_use]
    pub fn scan_retry(&self) -> RetryPolicy {
        self.scan_retry
    }

    #[must_use]
    pub fn scan_window(&self) -> Duration {
        self.scan_window
    }

    #[must_use]
    pub fn notification_timeout(&self) -> Duration {
        self.notification_timeout
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of the startup visibility check.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct FleetScanReport {
    found: Vec<String>,
    missing: Vec<String>,
    scans: u32,
    adapter_restarts: u32,
}

impl FleetScanReport {
    /// Configured addresses seen by the last scan.
    #[must_use]
    pub fn found(&self) -> &[String] {
        &self.found
    }

    /// Configured addresses the last scan did not see.
    #[must_use]
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    #[must_use]
    pub fn scans(&self) -> u32 {
        self.scans
    }

    #[must_use]
    pub fn adapter_restarts(&self) -> u32 {
        self.adapter_restarts
    }

    /// Returns whether every configured device was seen.
    #[must_use]
    pub fn all_found(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Acquires, uses and re-acquires device links over a [`BleTransport`].
#[derive(Clone)]
pub struct LinkManager {
    transport: Arc<dyn BleTransport>,
    settings: LinkSettings,
}

impl LinkManager {
    /// Creates a link manager with default timings.
    #[must_use]
    pub fn new(transport: Arc<dyn BleTransport>) -> Self {
        Self {
            transport,
            settings: LinkSettings::default(),
        }
    }

    /// Overrides timing parameters.
    #[must_use]
    pub fn with_settings(mut self, settings: LinkSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Ensures the session holds a live connection.
    ///
    /// Makes up to `connect_retry.max_attempts()` attempts with a fixed delay
    /// between them. There is no further retry until the next call.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unreachable`] once all attempts have failed.
    #[instrument(skip(self, session), level = "debug", fields(address = %session.address()))]
    pub async fn acquire(&self, session: &mut DeviceSession) -> Result<(), LinkError> {
        if let Some(connection) = session.connection() {
            if connection.is_connected().await {
                return Ok(());
            }
            info!("link dropped since last use, reconnecting");
            self.invalidate(session).await;
        }

        let policy = self.settings.connect_retry;
        session.mark_connecting();
        let mut last_error = TransportError::NotConnected;
        for attempt in 1..=policy.max_attempts() {
            debug!(attempt, "connecting");
            match self.transport.connect(session.address()).await {
                Ok(connection) => {
                    info!(attempt, name = session.name(), "connected");
                    session.attach(connection);
                    return Ok(());
                }
                Err(error) => {
                    warn!(attempt, %error, "connection attempt failed");
                    last_error = error;
                }
            }

            if attempt < policy.max_attempts() {
                sleep(policy.delay()).await;
            }
        }

        session.detach();
        Err(LinkError::Unreachable {
            address: session.address().to_string(),
            attempts: policy.max_attempts(),
            source: Box::new(last_error),
        })
    }

    /// Resolves, subscribes and caches the command characteristic.
    ///
    /// # Errors
    ///
    /// Returns an error when the link cannot be acquired or the control
    /// service does not expose the command characteristic.
    #[instrument(skip(self, session), level = "debug", fields(address = %session.address()))]
    pub async fn ensure_services(
        &self,
        session: &mut DeviceSession,
    ) -> Result<CharacteristicHandle, LinkError> {
        self.acquire(session).await?;
        if let Some(handle) = session.command_characteristic() {
            return Ok(handle.clone());
        }

        let handler = NotificationHandler::new(
            session.sensors().clone(),
            protocol::endpoint_metadata(EndpointId::CommandCharacteristic).uuid(),
        );
        let resolved = match session.connection() {
            Some(connection) => resolve_command_characteristic(connection, handler).await,
            None => Err(TransportError::NotConnected),
        };

        match resolved {
            Ok(handle) => {
                debug!(characteristic = handle.uuid(), "command characteristic ready");
                session.cache_characteristic(handle.clone());
                Ok(handle)
            }
            Err(source) => Err(self.fail(session, source).await),
        }
    }

    /// Encodes and writes one command.
    ///
    /// Queries additionally wait for the confirming notification. Returns
    /// `Ok(false)` when the device rejects the write.
    ///
    /// # Errors
    ///
    /// Returns an error when the link cannot be acquired, the write fails or
    /// the confirming notification does not arrive in time. The session is
    /// disconnected in the latter two cases.
    #[instrument(
        skip(self, session),
        level = "debug",
        fields(address = %session.address(), %command)
    )]
    pub async fn send(
        &self,
        session: &mut DeviceSession,
        command: Command,
    ) -> Result<bool, LinkError> {
        let handle = self.ensure_services(session).await?;
        let frame = FrameCodec::encode(command);
        debug!(frame = %format_hex(&frame), "writing command frame");

        let outcome = match session.connection() {
            Some(connection) => {
                transmit(
                    connection,
                    &handle,
                    &frame,
                    command.expects_reply(),
                    self.settings.notification_timeout,
                )
                .await
            }
            None => Err(TransportError::NotConnected),
        };

        match outcome {
            Ok(WriteAck::Accepted) => Ok(true),
            Ok(WriteAck::Rejected) => {
                warn!("device did not accept the write");
                Ok(false)
            }
            Err(source) => Err(self.fail(session, source).await),
        }
    }

    /// Checks that every configured address is visible.
    ///
    /// When some are missing the adapter is restarted and the scan repeated,
    /// up to `scan_retry.max_attempts()` scans in total. Missing devices are
    /// reported, not treated as an error.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ScanFailed`] when the final scan attempt fails.
    /// Earlier scan failures are treated like scans that found nothing.
    #[instrument(skip(self, addresses), level = "info")]
    pub async fn fleet_scan<I, S>(&self, addresses: I) -> Result<FleetScanReport, LinkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: BTreeSet<String> = addresses
            .into_iter()
            .map(|address| normalise_address(address.as_ref()))
            .collect();
        let policy = self.settings.scan_retry;
        let mut adapter_restarts = 0;

        let mut scans = 0;
        loop {
            scans += 1;
            info!(scan = scans, "scanning for AM43 devices");
            match self.transport.scan(self.settings.scan_window).await {
                Ok(visible) => {
                    let visible: BTreeSet<String> = visible
                        .iter()
                        .map(|address| normalise_address(address))
                        .collect();
                    let (found, missing): (Vec<String>, Vec<String>) = wanted
                        .iter()
                        .cloned()
                        .partition(|address| visible.contains(address));

                    if missing.is_empty() {
                        info!(found = found.len(), "every configured device is visible");
                    } else {
                        warn!(?missing, "configured devices not found on the BLE network");
                    }

                    if missing.is_empty() || scans >= policy.max_attempts() {
                        return Ok(FleetScanReport {
                            found,
                            missing,
                            scans,
                            adapter_restarts,
                        });
                    }
                }
                Err(source) if scans >= policy.max_attempts() => {
                    return Err(LinkError::ScanFailed { source });
                }
                Err(error) => warn!(%error, "BLE scan failed"),
            }

            info!("restarting BLE adapter before scanning again");
            match self.transport.restart_adapter().await {
                Ok(()) => adapter_restarts += 1,
                Err(error) => warn!(%error, "BLE adapter restart failed"),
            }
            sleep(policy.delay()).await;
        }
    }

    /// Disconnects the session and clears its cached handles.
    pub(crate) async fn invalidate(&self, session: &mut DeviceSession) {
        if let Some(connection) = session.detach()
            && let Err(error) = connection.disconnect().await
        {
            debug!(%error, "failed to disconnect stale link cleanly");
        }
    }

    async fn fail(&self, session: &mut DeviceSession, source: TransportError) -> LinkError {
        warn!(address = session.address(), %source, "link failed, dropping connection");
        self.invalidate(session).await;
        LinkError::TransportFailure {
            address: session.address().to_string(),
            source,
        }
    }
}

async fn resolve_command_characteristic(
    connection: &dyn BleConnection,
    handler: NotificationHandler,
) -> Result<CharacteristicHandle, TransportError> {
    let service = protocol::endpoint_metadata(EndpointId::ControlService);
    let characteristic = protocol::endpoint_metadata(EndpointId::CommandCharacteristic);
    let handle = connection
        .characteristic(service.uuid(), characteristic.uuid())
        .await?;
    connection
        .subscribe(&handle, handler.into_callback())
        .await?;
    Ok(handle)
}

async fn transmit(
    connection: &dyn BleConnection,
    handle: &CharacteristicHandle,
    frame: &[u8],
    expects_reply: bool,
    notification_timeout: Duration,
) -> Result<WriteAck, TransportError> {
    let ack = connection.write(handle, frame).await?;
    if ack == WriteAck::Rejected || !expects_reply {
        return Ok(ack);
    }

    if connection.wait_for_notification(notification_timeout).await? {
        Ok(ack)
    } else {
        Err(TransportError::NotificationTimeout {
            timeout: notification_timeout,
        })
    }
}
