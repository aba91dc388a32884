use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use super::hardware::{BleConnection, BleTransport, CharacteristicHandle, NotifyCallback, WriteAck};
use crate::error::{FixtureError, TransportError};
use crate::handlers::{FrameCodec, Percent};
use crate::notification::Notification;
use crate::protocol::{self, EndpointId, MessageId};
use crate::utils::normalise_address;

/// Simulated AM43 controller.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct FakeDevice {
    #[builder(into)]
    address: String,
    #[builder(default = 100)]
    battery: u8,
    #[builder(default = 50)]
    light: u8,
    #[builder(default = 0)]
    position: u8,
    /// Percent moved per position query while travelling; instant when absent.
    travel_step: Option<u8>,
    /// Reports every write as not accepted.
    #[builder(default)]
    reject_writes: bool,
    /// Never answers queries.
    #[builder(default)]
    silent: bool,
    /// Only becomes visible to scans after an adapter restart.
    #[builder(default)]
    hidden_until_restart: bool,
    /// Raw frames emitted right after notifications are enabled.
    #[builder(default)]
    unsolicited: Vec<Vec<u8>>,
}

impl FakeDevice {
    /// Appends frames emitted right after notifications are enabled.
    #[must_use]
    pub fn with_unsolicited(mut self, frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        self.unsolicited.extend(frames);
        self
    }
}

impl FromStr for FakeDevice {
    type Err = FixtureError;

    /// Parses `address|battery|light|position`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = value.split('|').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(FixtureError::InvalidRecordFieldCount);
        }
        if fields.iter().any(|field| field.is_empty()) {
            return Err(FixtureError::EmptyRecordField);
        }

        Ok(Self::builder()
            .address(fields[0])
            .battery(parse_percent(fields[1])?)
            .light(parse_percent(fields[2])?)
            .position(parse_percent(fields[3])?)
            .build())
    }
}

/// Parsed `;`-separated fake device fixture.
#[derive(Debug, Clone, derive_more::Into)]
pub struct FakeDevices {
    devices: Vec<FakeDevice>,
}

impl FromStr for FakeDevices {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Err(FixtureError::EmptyFixture);
        }
        let devices = value
            .split(';')
            .map(str::parse)
            .collect::<Result<Vec<FakeDevice>, _>>()?;
        Ok(Self { devices })
    }
}

/// Parsed `,`-separated hexadecimal frames.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct HexFrames {
    frames: Vec<Vec<u8>>,
}

impl FromStr for HexFrames {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self { frames: Vec::new() });
        }
        let frames = value
            .split(',')
            .map(|frame| {
                let cleaned: String = frame.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(cleaned)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { frames })
    }
}

#[derive(Debug)]
struct DeviceState {
    device: FakeDevice,
    target: Option<u8>,
    /// Bumped whenever the link is dropped; stale connections compare against it.
    generation: u32,
    writes: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeFleet {
    devices: Mutex<BTreeMap<String, DeviceState>>,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
    adapter_restarts: AtomicU32,
    scans: AtomicU32,
}

impl FakeFleet {
    fn devices(&self) -> MutexGuard<'_, BTreeMap<String, DeviceState>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory transport simulating a fleet of AM43 controllers.
///
/// Cloning shares the fleet, so tests can keep a handle for inspection after
/// passing the transport to a link manager.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    fleet: Arc<FakeFleet>,
}

impl FakeTransport {
    /// Creates a transport serving the given devices.
    #[must_use]
    pub fn new(devices: impl IntoIterator<Item = FakeDevice>) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| {
                let address = normalise_address(&device.address);
                let state = DeviceState {
                    device,
                    target: None,
                    generation: 0,
                    writes: Vec::new(),
                };
                (address, state)
            })
            .collect();

        Self {
            fleet: Arc::new(FakeFleet {
                devices: Mutex::new(devices),
                ..FakeFleet::default()
            }),
        }
    }

    /// Fails the next `count` connection attempts.
    #[must_use]
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.fleet.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Total connection attempts seen so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.fleet.connect_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn adapter_restarts(&self) -> u32 {
        self.fleet.adapter_restarts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn scans(&self) -> u32 {
        self.fleet.scans.load(Ordering::SeqCst)
    }

    /// Every frame written to one device, oldest first.
    #[must_use]
    pub fn writes(&self, address: &str) -> Vec<Vec<u8>> {
        self.fleet
            .devices()
            .get(&normalise_address(address))
            .map(|state| state.writes.clone())
            .unwrap_or_default()
    }

    /// Current simulated position of one device.
    #[must_use]
    pub fn position(&self, address: &str) -> Option<u8> {
        self.fleet
            .devices()
            .get(&normalise_address(address))
            .map(|state| state.device.position)
    }

    /// Drops every live link to a device, as if it went out of range.
    pub fn drop_link(&self, address: &str) {
        if let Some(state) = self.fleet.devices().get_mut(&normalise_address(address)) {
            state.generation += 1;
        }
    }

    /// Switches a device between answering and ignoring queries.
    pub fn set_silent(&self, address: &str, silent: bool) {
        if let Some(state) = self.fleet.devices().get_mut(&normalise_address(address)) {
            state.device.silent = silent;
        }
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    #[instrument(skip(self), level = "debug")]
    async fn scan(&self, window: Duration) -> Result<BTreeSet<String>, TransportError> {
        self.fleet.scans.fetch_add(1, Ordering::SeqCst);
        let restarted = self.fleet.adapter_restarts.load(Ordering::SeqCst) > 0;
        Ok(self
            .fleet
            .devices()
            .iter()
            .filter(|(_, state)| restarted || !state.device.hidden_until_restart)
            .map(|(address, _)| address.clone())
            .collect())
    }

    async fn restart_adapter(&self) -> Result<(), TransportError> {
        info!("restarting fake BLE adapter");
        self.fleet.adapter_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, TransportError> {
        self.fleet.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let address = normalise_address(address);

        let pending_failures = self.fleet.connect_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fleet
                .connect_failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed { address });
        }

        let generation = match self.fleet.devices().get(&address) {
            Some(state) => state.generation,
            None => return Err(TransportError::DeviceNotFound { address }),
        };

        Ok(Box::new(FakeConnection {
            address,
            fleet: Arc::clone(&self.fleet),
            generation,
            callback: Mutex::new(None),
            delivered: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeConnection {
    address: String,
    fleet: Arc<FakeFleet>,
    generation: u32,
    callback: Mutex<Option<NotifyCallback>>,
    delivered: AtomicU32,
    closed: AtomicBool,
}

impl std::fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnection")
            .field("address", &self.address)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl FakeConnection {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self
                .fleet
                .devices()
                .get(&self.address)
                .is_some_and(|state| state.generation == self.generation)
    }

    fn ensure_live(&self) -> Result<(), TransportError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn deliver(&self, characteristic_uuid: &str, frame: &[u8]) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(characteristic_uuid, frame);
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Applies one command frame to the device and returns its reply, if any.
    fn apply_command(&self, state: &mut DeviceState, frame: &[u8]) -> Option<Vec<u8>> {
        let Ok(parsed) = crate::handlers::Frame::parse(frame) else {
            debug!("fake device ignoring malformed command frame");
            return None;
        };

        let reply = match MessageId::from_byte(parsed.type_id()) {
            Some(MessageId::Move) => {
                let target = parsed.payload().first().copied()?;
                let target = Percent::new(target).ok()?.value();
                match state.device.travel_step {
                    Some(_) => state.target = Some(target),
                    None => state.device.position = target,
                }
                None
            }
            Some(MessageId::Stop) => {
                state.target = None;
                None
            }
            Some(MessageId::Battery) => Some(Notification::Battery(state.device.battery)),
            Some(MessageId::Light) => Some(Notification::Light(state.device.light)),
            Some(MessageId::Position) => {
                advance(state);
                Some(Notification::Position(state.device.position))
            }
            _ => None,
        }?;

        if state.device.silent {
            return None;
        }
        FrameCodec::encode_notification(&reply).ok()
    }
}

fn advance(state: &mut DeviceState) {
    let (Some(target), Some(step)) = (state.target, state.device.travel_step) else {
        return;
    };
    let position = state.device.position;
    state.device.position = if target > position {
        position.saturating_add(step).min(target)
    } else {
        position.saturating_sub(step).max(target)
    };
    if state.device.position == target {
        state.target = None;
    }
}

#[async_trait]
impl BleConnection for FakeConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn characteristic(
        &self,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicHandle, TransportError> {
        self.ensure_live()?;
        let service = protocol::endpoint_metadata(EndpointId::ControlService);
        let command = protocol::endpoint_metadata(EndpointId::CommandCharacteristic);
        if service.uuid().eq_ignore_ascii_case(service_uuid)
            && command.uuid().eq_ignore_ascii_case(characteristic_uuid)
        {
            return Ok(CharacteristicHandle::new(service_uuid, characteristic_uuid));
        }

        Err(TransportError::MissingCharacteristic {
            service_uuid: service_uuid.to_string(),
            characteristic_uuid: characteristic_uuid.to_string(),
        })
    }

    async fn write(
        &self,
        characteristic: &CharacteristicHandle,
        payload: &[u8],
    ) -> Result<WriteAck, TransportError> {
        self.ensure_live()?;
        self.delivered.store(0, Ordering::SeqCst);

        let reply = {
            let mut devices = self.fleet.devices();
            let state = devices
                .get_mut(&self.address)
                .ok_or(TransportError::NotConnected)?;
            state.writes.push(payload.to_vec());
            if state.device.reject_writes {
                return Ok(WriteAck::Rejected);
            }
            self.apply_command(state, payload)
        };

        if let Some(reply) = reply {
            self.deliver(characteristic.uuid(), &reply);
        }
        Ok(WriteAck::Accepted)
    }

    async fn subscribe(
        &self,
        characteristic: &CharacteristicHandle,
        callback: NotifyCallback,
    ) -> Result<(), TransportError> {
        self.ensure_live()?;
        *self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);

        let unsolicited = self
            .fleet
            .devices()
            .get(&self.address)
            .map(|state| state.device.unsolicited.clone())
            .unwrap_or_default();
        for frame in unsolicited {
            self.deliver(characteristic.uuid(), &frame);
        }
        self.delivered.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_notification(&self, timeout: Duration) -> Result<bool, TransportError> {
        self.ensure_live()?;
        if self.delivered.swap(0, Ordering::SeqCst) > 0 {
            return Ok(true);
        }
        sleep(timeout).await;
        Ok(self.delivered.swap(0, Ordering::SeqCst) > 0)
    }

    async fn is_connected(&self) -> bool {
        self.is_live()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn parse_percent(value: &str) -> Result<u8, FixtureError> {
    let parsed = value.parse::<u8>()?;
    if parsed > 100 {
        return Err(FixtureError::PercentOutOfRange { value: parsed });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("02:00:00:00:00:01|80|20|55", 1)]
    #[case("02:00:00:00:00:01|80|20|55;02:00:00:00:00:02|100|0|0", 2)]
    fn fake_devices_parse_records(#[case] fixture: &str, #[case] expected: usize) {
        let devices: Vec<FakeDevice> = fixture
            .parse::<FakeDevices>()
            .expect("fixture should parse")
            .into();
        assert_eq!(expected, devices.len());
    }

    #[rstest]
    #[case("02:00:00:00:00:01|80|20", "four")]
    #[case("02:00:00:00:00:01|80||55", "empty")]
    #[case("02:00:00:00:00:01|80|20|101", "out of range")]
    #[case("02:00:00:00:00:01|80|x|55", "parse")]
    fn fake_device_rejects_bad_records(#[case] record: &str, #[case] fragment: &str) {
        let error = record
            .parse::<FakeDevice>()
            .expect_err("record should be rejected");
        assert!(error.to_string().contains(fragment), "{error}");
    }

    #[test]
    fn hex_frames_parse_comma_separated_payloads() {
        let frames: Vec<Vec<u8>> = "9A A8 00 32, 9aa70101"
            .parse::<HexFrames>()
            .expect("hex frames should parse")
            .into();
        assert_eq!(
            vec![vec![0x9A, 0xA8, 0x00, 0x32], vec![0x9A, 0xA7, 0x01, 0x01]],
            frames
        );
    }

    #[test]
    fn hex_frames_reject_odd_length() {
        assert_matches!("9A0".parse::<HexFrames>(), Err(FixtureError::InvalidHex(_)));
    }

    #[test]
    fn travel_step_moves_towards_target_per_query() {
        let device = FakeDevice::builder()
            .address("02:00:00:00:00:01")
            .position(100)
            .travel_step(30)
            .build();
        let mut state = DeviceState {
            device,
            target: Some(0),
            generation: 0,
            writes: Vec::new(),
        };

        advance(&mut state);
        assert_eq!(70, state.device.position);
        advance(&mut state);
        advance(&mut state);
        advance(&mut state);
        assert_eq!(0, state.device.position);
        assert_eq!(None, state.target);
    }
}
