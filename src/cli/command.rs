use std::path::PathBuf;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::control::{CoverArgs, SetPositionArgs, StatusArgs};
use crate::cli::poll::PollArgs;
use crate::config::Am43Config;
use crate::error::{CliConfigError, ConfigError, FixtureError};
use crate::hw::{FakeDevice, FakeDevices, FakeTransport, HexFrames};

/// Command-line options for the AM43 blind controller.
#[derive(Debug, Parser)]
#[command(name = "am43", about = "Control AM43 BLE blind motors.")]
pub struct Args {
    /// Cover configuration file; defaults to the per-user config location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Inline cover definition `slug=MAC`; may be repeated.
    #[arg(long = "cover", global = true, value_name = "SLUG=MAC")]
    covers: Vec<String>,
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Uses the in-memory fake BLE backend.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake devices in the form `address|battery|light|position;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_devices: Option<FakeDevices>,
    /// Number of initial fake connection attempts that fail.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_failures: Option<u32>,
    /// Hex frames every fake device emits once notifications are enabled, `,`-separated.
    #[arg(long, global = true, requires = "fake")]
    fake_unsolicited: Option<HexFrames>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use am43::{Args, Command};
    ///
    /// let args = Args::new(Command::Scan).with_covers(["office=02:00:00:00:00:01"]);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            config: None,
            covers: Vec::new(),
            log_level: None,
            fake: false,
            fake_devices: None,
            fake_connect_failures: None,
            fake_unsolicited: None,
            command,
        }
    }

    /// Adds inline `slug=MAC` cover definitions.
    #[must_use]
    pub fn with_covers<I, S>(mut self, covers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covers.extend(covers.into_iter().map(Into::into));
        self
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            devices,
            connect_failures,
            unsolicited,
        } = fake;

        self.fake = true;
        self.fake_devices = Some(devices);
        self.fake_connect_failures = Some(connect_failures);
        self.fake_unsolicited = Some(unsolicited);
        self
    }

    /// Returns the explicit log-level override, if any.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Resolves the cover configuration.
    ///
    /// An explicit `--config` file is merged with inline covers; inline
    /// covers alone skip the default file; otherwise the default file is read.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be read or is invalid.
    pub fn load_config(&self) -> Result<Am43Config, ConfigError> {
        match &self.config {
            Some(path) => {
                let config = Am43Config::load(path)?.with_inline_covers(&self.covers)?;
                config.validate()?;
                Ok(config)
            }
            None if !self.covers.is_empty() => Am43Config::from_inline(&self.covers),
            None => Am43Config::load(&Am43Config::default_path()?),
        }
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_devices,
            fake_connect_failures,
            fake_unsolicited,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(devices) = fake_devices else {
                return Err(CliConfigError::MissingFakeDevices.into());
            };
            Some(FakeArgs {
                devices,
                connect_failures: fake_connect_failures.unwrap_or(0),
                unsolicited: fake_unsolicited.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    devices: FakeDevices,
    #[builder(default)]
    connect_failures: u32,
    #[builder(
        default,
        with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() }
    )]
    unsolicited: HexFrames,
}

impl FakeArgs {
    pub(crate) fn into_transport(self) -> FakeTransport {
        let Self {
            devices,
            connect_failures,
            unsolicited,
        } = self;
        let devices: Vec<FakeDevice> = devices.into();
        let frames: Vec<Vec<u8>> = unsolicited.into();
        let devices = devices
            .into_iter()
            .map(|device| device.with_unsolicited(frames.iter().cloned()));
        FakeTransport::new(devices).with_connect_failures(connect_failures)
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that every configured cover is visible, restarting the adapter if not.
    Scan,
    /// Refresh and print cover status.
    Status(StatusArgs),
    /// Fully open a cover.
    Open(CoverArgs),
    /// Fully close a cover.
    Close(CoverArgs),
    /// Stop a moving cover.
    Stop(CoverArgs),
    /// Move a cover to a position between 0 (open) and 100 (closed).
    SetPosition(SetPositionArgs),
    /// Periodically refresh every cover.
    Poll(PollArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Status(_args) => "status",
            Self::Open(_args) => "open",
            Self::Close(_args) => "close",
            Self::Stop(_args) => "stop",
            Self::SetPosition(_args) => "set-position",
            Self::Poll(_args) => "poll",
        }
    }
}
