mod app;
mod cli;
mod config;
mod error;
mod handlers;
mod hw;
mod notification;
mod protocol;
mod sensor;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    CoverFleet, fake_transport, real_transport, run, run_with_clients,
    run_with_clients_and_log_level, run_with_log_level,
};
pub use cli::{
    Args, Command, CoverArgs, FakeArgs, LogLevel, PollArgs, SetPositionArgs, StatusArgs,
};
pub use config::{Am43Config, CoverConfig, LinkConfig};
pub use error::{ConfigError, FixtureError, LinkError, TransportError};
pub use handlers::{
    Command as DeviceCommand, CoverController, CoverError, CoverFeature, CoverState, CoverStatus,
    DEVICE_CLASS, DecodeError, Frame, FrameCodec, FrameCodecError, MalformedReason, Percent,
    PercentError,
};
pub use hw::{
    BleConnection, BleTransport, CharacteristicHandle, ConnectionState, DEFAULT_CONNECT_ATTEMPTS,
    DEFAULT_CONNECT_DELAY, DEFAULT_NOTIFICATION_TIMEOUT, DEFAULT_SCAN_ATTEMPTS,
    DEFAULT_SCAN_DELAY, DEFAULT_SCAN_WINDOW, DeviceSession, FakeDevice, FakeDevices,
    FakeTransport, FleetScanReport, HexFrames, LinkManager, LinkSettings, NotifyCallback,
    RetryPolicy, WriteAck,
};
pub use notification::{Notification, NotificationHandler};
pub use protocol::{EndpointId, MessageId};
pub use sensor::{Reading, SensorReadings, SensorState};
pub use terminal::{SystemTerminalClient, TerminalClient};
