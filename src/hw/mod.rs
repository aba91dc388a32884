mod btleplug_backend;
mod fake_backend;
mod hardware;
mod link;
mod session;

pub(crate) use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{FakeDevice, FakeDevices, FakeTransport, HexFrames};
pub use self::hardware::{
    BleConnection, BleTransport, CharacteristicHandle, NotifyCallback, WriteAck,
};
pub use self::link::{
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY, DEFAULT_NOTIFICATION_TIMEOUT,
    DEFAULT_SCAN_ATTEMPTS, DEFAULT_SCAN_DELAY, DEFAULT_SCAN_WINDOW, FleetScanReport, LinkManager,
    LinkSettings, RetryPolicy,
};
pub use self::session::{ConnectionState, DeviceSession};
