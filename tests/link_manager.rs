use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use am43::{
    BleConnection, BleTransport, ConnectionState, DeviceCommand, DeviceSession, FakeDevice,
    FakeTransport, LinkError, LinkManager, LinkSettings, RetryPolicy, TransportError,
};
use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

const OFFICE: &str = "02:00:00:00:00:01";
const LOUNGE: &str = "02:00:00:00:00:02";

fn device(address: &str) -> FakeDevice {
    FakeDevice::builder().address(address).position(35).build()
}

fn manager(transport: &FakeTransport) -> LinkManager {
    LinkManager::new(Arc::new(transport.clone()))
}

/// Fake transport whose first `failing_scans` scans report no adapter.
struct FlakyScanner {
    inner: FakeTransport,
    failing_scans: AtomicU32,
}

impl FlakyScanner {
    fn new(inner: FakeTransport, failing_scans: u32) -> Self {
        Self {
            inner,
            failing_scans: AtomicU32::new(failing_scans),
        }
    }
}

#[async_trait]
impl BleTransport for FlakyScanner {
    async fn scan(&self, window: Duration) -> Result<BTreeSet<String>, TransportError> {
        let remaining = self.failing_scans.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_scans.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::NoAdapters);
        }
        self.inner.scan(window).await
    }

    async fn restart_adapter(&self) -> Result<(), TransportError> {
        self.inner.restart_adapter().await
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, TransportError> {
        self.inner.connect(address).await
    }
}

#[tokio::test(start_paused = true)]
async fn acquire_retries_with_fixed_delay_until_connected() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE)]).with_connect_failures(2);
    let link = manager(&transport);
    let mut session = DeviceSession::new(OFFICE, "Office");
    let started_at = Instant::now();

    link.acquire(&mut session).await?;

    assert_eq!(ConnectionState::Connected, session.connection_state());
    assert_eq!(3, transport.connect_attempts());
    assert_eq!(Duration::from_secs(4), started_at.elapsed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn acquire_uses_configured_retry_policy() {
    let transport = FakeTransport::new([device(OFFICE)]).with_connect_failures(10);
    let settings = LinkSettings::builder()
        .connect_retry(RetryPolicy::new(5, Duration::from_millis(100)))
        .build();
    let link = manager(&transport).with_settings(settings);
    let mut session = DeviceSession::new(OFFICE, "Office");

    let result = link.acquire(&mut session).await;

    assert_matches!(
        result,
        Err(LinkError::Unreachable { ref address, attempts: 5, .. }) if address == OFFICE
    );
    assert_eq!(5, transport.connect_attempts());
    assert_eq!(ConnectionState::Disconnected, session.connection_state());
}

#[tokio::test(start_paused = true)]
async fn acquire_reports_unknown_device_as_unreachable() {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = manager(&transport);
    let mut session = DeviceSession::new(LOUNGE, "Lounge");

    let result = link.acquire(&mut session).await;

    assert_matches!(result, Err(LinkError::Unreachable { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn ensure_services_caches_the_command_characteristic() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = manager(&transport);
    let mut session = DeviceSession::new(OFFICE, "Office");

    let first = link.ensure_services(&mut session).await?;
    let second = link.ensure_services(&mut session).await?;

    assert_eq!(first, second);
    assert_eq!("0000fe50-0000-1000-8000-00805f9b34fb", first.service_uuid());
    assert_eq!("0000fe51-0000-1000-8000-00805f9b34fb", first.uuid());
    assert_eq!(Some(&first), session.command_characteristic());
    assert_eq!(1, transport.connect_attempts());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn query_waits_for_reply_and_updates_sensors() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = manager(&transport);
    let mut session = DeviceSession::new(OFFICE, "Office");

    let accepted = link.send(&mut session, DeviceCommand::QueryPosition).await?;

    assert!(accepted);
    assert_eq!(Some(35), session.sensors().snapshot().position_percent());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_write_returns_false_without_dropping_link() -> anyhow::Result<()> {
    let transport = FakeTransport::new([FakeDevice::builder()
        .address(OFFICE)
        .reject_writes(true)
        .build()]);
    let link = manager(&transport);
    let mut session = DeviceSession::new(OFFICE, "Office");

    let accepted = link.send(&mut session, DeviceCommand::Stop).await?;

    assert!(!accepted);
    assert_eq!(ConnectionState::Connected, session.connection_state());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn query_timeout_uses_configured_wait() {
    let transport = FakeTransport::new([FakeDevice::builder()
        .address(OFFICE)
        .silent(true)
        .build()]);
    let settings = LinkSettings::builder()
        .notification_timeout(Duration::from_secs(3))
        .build();
    let link = manager(&transport).with_settings(settings);
    let mut session = DeviceSession::new(OFFICE, "Office");
    link.ensure_services(&mut session)
        .await
        .expect("services should resolve");
    let started_at = Instant::now();

    let result = link.send(&mut session, DeviceCommand::QueryBattery).await;

    assert_matches!(result, Err(LinkError::TransportFailure { .. }));
    assert_eq!(Duration::from_secs(3), started_at.elapsed());
    assert_eq!(ConnectionState::Disconnected, session.connection_state());
}

#[tokio::test(start_paused = true)]
async fn fleet_scan_without_missing_devices_scans_once() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE), device(LOUNGE)]);
    let link = manager(&transport);

    let report = link.fleet_scan([OFFICE, LOUNGE]).await?;

    assert!(report.all_found());
    assert_eq!(1, report.scans());
    assert_eq!(0, report.adapter_restarts());
    assert_eq!(0, transport.adapter_restarts());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fleet_scan_restarts_adapter_once_for_missing_devices() -> anyhow::Result<()> {
    let hidden = FakeDevice::builder()
        .address(LOUNGE)
        .hidden_until_restart(true)
        .build();
    let transport = FakeTransport::new([device(OFFICE), hidden]);
    let link = manager(&transport);

    let report = link
        .fleet_scan([OFFICE.to_lowercase(), LOUNGE.to_string()])
        .await?;

    assert!(report.all_found());
    assert_eq!(vec![OFFICE.to_string(), LOUNGE.to_string()], report.found());
    assert_eq!(2, report.scans());
    assert_eq!(1, transport.adapter_restarts());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fleet_scan_reports_devices_still_missing_after_restart() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = manager(&transport);

    let report = link.fleet_scan([OFFICE, LOUNGE]).await?;

    assert!(!report.all_found());
    assert_eq!(vec![OFFICE.to_string()], report.found());
    assert_eq!(vec![LOUNGE.to_string()], report.missing());
    assert_eq!(2, report.scans());
    assert_eq!(1, report.adapter_restarts());
    assert_eq!(2, transport.scans());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fleet_scan_restarts_adapter_after_a_failed_scan() -> anyhow::Result<()> {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = LinkManager::new(Arc::new(FlakyScanner::new(transport.clone(), 1)));

    let report = link.fleet_scan([OFFICE]).await?;

    assert!(report.all_found());
    assert_eq!(2, report.scans());
    assert_eq!(1, report.adapter_restarts());
    assert_eq!(1, transport.adapter_restarts());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fleet_scan_fails_when_the_last_scan_fails() {
    let transport = FakeTransport::new([device(OFFICE)]);
    let link = LinkManager::new(Arc::new(FlakyScanner::new(transport.clone(), 2)));

    let result = link.fleet_scan([OFFICE]).await;

    assert_matches!(
        result,
        Err(LinkError::ScanFailed {
            source: TransportError::NoAdapters
        })
    );
    assert_eq!(1, transport.adapter_restarts());
}
