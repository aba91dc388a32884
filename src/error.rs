use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by the BLE transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("device `{address}` was not seen by any adapter")]
    DeviceNotFound { address: String },
    #[error("connection attempt to `{address}` failed")]
    ConnectFailed { address: String },
    #[error(
        "characteristic `{characteristic_uuid}` of service `{service_uuid}` was not found on the connected device"
    )]
    MissingCharacteristic {
        service_uuid: String,
        characteristic_uuid: String,
    },
    #[error("the link is not connected")]
    NotConnected,
    #[error("no notification arrived within {}", humantime::format_duration(*timeout))]
    NotificationTimeout { timeout: Duration },
    #[error("failed to launch the BLE adapter restart command")]
    AdapterRestart { source: std::io::Error },
    #[error("BLE adapter restart command exited with {status}")]
    AdapterRestartStatus { status: ExitStatus },
}

/// Errors returned by the link manager.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device `{address}` is unreachable after {attempts} connection attempts")]
    Unreachable {
        address: String,
        attempts: u32,
        source: Box<TransportError>,
    },
    #[error("transport failure while talking to `{address}`")]
    TransportFailure {
        address: String,
        source: TransportError,
    },
    #[error("fleet scan failed")]
    ScanFailed { source: TransportError },
}

impl LinkError {
    /// Returns the device address the error concerns, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Unreachable { address, .. } | Self::TransportFailure { address, .. } => {
                Some(address)
            }
            Self::ScanFailed { .. } => None,
        }
    }
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake device fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse fixture percent value")]
    InvalidPercent(#[from] std::num::ParseIntError),
    #[error("fixture percent {value} is out of range (0..=100)")]
    PercentOutOfRange { value: u8 },
    #[error("hex payload is invalid")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned while loading cover configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{}`", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("configuration is not valid JSON")]
    Parse(#[from] serde_json::Error),
    #[error("no covers are configured")]
    NoCovers,
    #[error("cover `{slug}` has an empty MAC address")]
    EmptyMac { slug: String },
    #[error("cover `{slug}` is not configured")]
    UnknownCover { slug: String },
    #[error("inline cover `{value}` must have the form `slug=MAC`")]
    InvalidInlineCover { value: String },
    #[error("no configuration file was given and no default location exists")]
    NoConfigLocation,
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake device fixture while fake mode is enabled")]
    MissingFakeDevices,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
