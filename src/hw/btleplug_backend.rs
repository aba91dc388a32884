use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::hardware::{BleConnection, BleTransport, CharacteristicHandle, NotifyCallback, WriteAck};
use crate::error::TransportError;
use crate::utils::{format_hex, normalise_address};

const PERIPHERAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_DISCOVERY_WINDOW: Duration = Duration::from_secs(10);
const ADAPTER_RESTART_PROGRAM: &str = "service";
const ADAPTER_RESTART_ARGS: [&str; 2] = ["bluetooth", "restart"];

/// Transport backed by the host BLE stack through `btleplug`.
#[derive(Debug)]
pub(crate) struct BtleplugTransport {
    manager: Manager,
}

impl BtleplugTransport {
    /// Opens the platform BLE manager.
    pub(crate) async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapters);
        }
        Ok(adapters)
    }

    async fn start_scans(adapters: &[Adapter]) -> Result<(), TransportError> {
        for adapter in adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }
        Ok(())
    }

    async fn stop_scans(adapters: &[Adapter]) {
        for adapter in adapters {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }
    }

    async fn find_peripheral(
        adapters: &[Adapter],
        address: &str,
    ) -> Result<Option<Peripheral>, TransportError> {
        for adapter in adapters {
            for peripheral in adapter.peripherals().await? {
                if normalise_address(&peripheral.address().to_string()) == address {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    #[instrument(skip(self), level = "debug")]
    async fn scan(&self, window: Duration) -> Result<BTreeSet<String>, TransportError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), ?window, "starting BLE scan");
        Self::start_scans(&adapters).await?;
        sleep(window).await;

        let mut seen = BTreeSet::new();
        for adapter in &adapters {
            for peripheral in adapter.peripherals().await? {
                seen.insert(normalise_address(&peripheral.address().to_string()));
            }
        }
        Self::stop_scans(&adapters).await;

        debug!(seen = seen.len(), "BLE scan finished");
        Ok(seen)
    }

    #[instrument(skip(self), level = "info")]
    async fn restart_adapter(&self) -> Result<(), TransportError> {
        let status = tokio::process::Command::new(ADAPTER_RESTART_PROGRAM)
            .args(ADAPTER_RESTART_ARGS)
            .status()
            .await
            .map_err(|source| TransportError::AdapterRestart { source })?;
        if !status.success() {
            return Err(TransportError::AdapterRestartStatus { status });
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, TransportError> {
        let address = normalise_address(address);
        let adapters = self.adapters().await?;
        Self::start_scans(&adapters).await?;

        let deadline = Instant::now() + CONNECT_DISCOVERY_WINDOW;
        let peripheral = loop {
            match Self::find_peripheral(&adapters, &address).await {
                Ok(Some(peripheral)) => break peripheral,
                Ok(None) if Instant::now() < deadline => sleep(PERIPHERAL_POLL_INTERVAL).await,
                Ok(None) => {
                    Self::stop_scans(&adapters).await;
                    return Err(TransportError::DeviceNotFound { address });
                }
                Err(error) => {
                    Self::stop_scans(&adapters).await;
                    return Err(error);
                }
            }
        };
        Self::stop_scans(&adapters).await;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        info!("connected to peripheral");

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Ok(Box::new(BtleplugConnection {
            address,
            peripheral,
            signals_tx,
            signals_rx: Mutex::new(signals_rx),
            listener: CancellationToken::new(),
        }))
    }
}

/// Live link to one peripheral.
#[derive(Debug)]
struct BtleplugConnection {
    address: String,
    peripheral: Peripheral,
    signals_tx: mpsc::UnboundedSender<()>,
    signals_rx: Mutex<mpsc::UnboundedReceiver<()>>,
    listener: CancellationToken,
}

impl BtleplugConnection {
    fn characteristic_for(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic
                    .service_uuid
                    .to_string()
                    .eq_ignore_ascii_case(handle.service_uuid())
                    && characteristic
                        .uuid
                        .to_string()
                        .eq_ignore_ascii_case(handle.uuid())
            })
            .ok_or_else(|| TransportError::MissingCharacteristic {
                service_uuid: handle.service_uuid().to_string(),
                characteristic_uuid: handle.uuid().to_string(),
            })
    }
}

impl Drop for BtleplugConnection {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    fn address(&self) -> &str {
        &self.address
    }

    #[instrument(skip(self), level = "trace")]
    async fn characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicHandle, TransportError> {
        let handle = CharacteristicHandle::new(service_uuid, characteristic_uuid);
        self.characteristic_for(&handle)?;
        Ok(handle)
    }

    #[instrument(skip(self, payload), level = "trace", fields(payload = %format_hex(payload)))]
    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<WriteAck, TransportError> {
        let target = self.characteristic_for(characteristic)?;
        {
            let mut signals = self.signals_rx.lock().await;
            while signals.try_recv().is_ok() {}
        }
        self.peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await?;
        Ok(WriteAck::Accepted)
    }

    #[instrument(skip(self, callback), level = "debug")]
    async fn subscribe(
        &self,
        characteristic: &CharacteristicHandle,
        callback: NotifyCallback,
    ) -> Result<(), TransportError> {
        let target = self.characteristic_for(characteristic)?;
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        let expected_uuid = characteristic.uuid().to_string();
        let signals = self.signals_tx.clone();
        let cancelled = self.listener.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    next = notifications.next() => {
                        let Some(notification) = next else {
                            debug!("notification stream closed");
                            break;
                        };
                        let uuid = notification.uuid.to_string();
                        trace!(%uuid, payload = %format_hex(&notification.value), "notification");
                        callback(&uuid, &notification.value);
                        if uuid.eq_ignore_ascii_case(&expected_uuid) {
                            let _ = signals.send(());
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn wait_for_notification(&self, wait: Duration) -> Result<bool, TransportError> {
        let mut signals = self.signals_rx.lock().await;
        match timeout(wait, signals.recv()).await {
            Ok(Some(())) => Ok(true),
            Ok(None) => Err(TransportError::NotConnected),
            Err(_) => Ok(false),
        }
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    #[instrument(skip(self), level = "debug", fields(address = %self.address))]
    async fn disconnect(&self) -> Result<(), TransportError> {
        self.listener.cancel();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
