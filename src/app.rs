use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::cli::control::CoverAction;
use crate::cli::{Command, FakeArgs, LogLevel};
use crate::config::Am43Config;
use crate::error::ConfigError;
use crate::handlers::CoverController;
use crate::hw::{BleTransport, BtleplugTransport, DeviceSession, LinkManager};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a transport backed by the host BLE stack.
///
/// # Errors
///
/// Returns an error if the platform BLE manager cannot be opened.
pub async fn real_transport() -> Result<Arc<dyn BleTransport>> {
    Ok(Arc::new(BtleplugTransport::new().await?))
}

/// Creates a transport backed by fake device fixtures.
#[must_use]
pub fn fake_transport(fake_args: FakeArgs) -> Arc<dyn BleTransport> {
    Arc::new(fake_args.into_transport())
}

/// Every configured cover with its controller, keyed by slug.
pub struct CoverFleet {
    link: LinkManager,
    controllers: BTreeMap<String, CoverController>,
}

impl CoverFleet {
    /// Creates one disconnected controller per configured cover.
    ///
    /// ```
    /// let config = am43::Am43Config::from_inline(["office=02:00:00:00:00:01"])?;
    /// let transport = std::sync::Arc::new(am43::FakeTransport::default());
    /// let fleet = am43::CoverFleet::new(&config, transport);
    /// assert_eq!(vec!["office".to_string()], fleet.slugs());
    /// # Ok::<(), am43::ConfigError>(())
    /// ```
    #[must_use]
    pub fn new(config: &Am43Config, transport: Arc<dyn BleTransport>) -> Self {
        let link = LinkManager::new(transport).with_settings(config.link().settings());
        let controllers = config
            .covers()
            .map(|(slug, cover)| {
                let session = DeviceSession::new(cover.mac(), cover.friendly_name());
                (
                    slug.to_string(),
                    CoverController::new(link.clone(), session),
                )
            })
            .collect();
        Self { link, controllers }
    }

    #[must_use]
    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Returns every cover slug in order.
    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    /// Returns every configured device address.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.controllers
            .values()
            .map(|controller| controller.session().address().to_string())
            .collect()
    }

    /// Looks up one controller by slug.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCover`] when the slug is not configured.
    pub fn controller_mut(&mut self, slug: &str) -> Result<&mut CoverController, ConfigError> {
        self.controllers
            .get_mut(slug)
            .ok_or_else(|| ConfigError::UnknownCover {
                slug: slug.to_string(),
            })
    }

    /// Iterates over every controller in slug order.
    pub fn controllers_mut(&mut self) -> impl Iterator<Item = (&str, &mut CoverController)> {
        self.controllers
            .iter_mut()
            .map(|(slug, controller)| (slug.as_str(), controller))
    }

    /// Connects every cover and returns the slugs that could not be reached.
    ///
    /// Unreachable covers stay offline; the rest are ready for commands.
    #[instrument(skip(self), level = "info")]
    pub async fn connect_all(&mut self) -> Vec<String> {
        let mut unavailable = Vec::new();
        for (slug, controller) in &mut self.controllers {
            match controller.connect().await {
                Ok(()) => info!(cover = %slug, "cover connected"),
                Err(error) => {
                    warn!(cover = %slug, error = %error, "cover unavailable at startup");
                    unavailable.push(slug.clone());
                }
            }
        }
        unavailable
    }
}

/// Runs the CLI command against the given transport.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = am43::Args::try_parse_from([
///     "am43",
///     "--fake",
///     "--fake-devices",
///     "02:00:00:00:00:01|90|40|0",
///     "--cover",
///     "office=02:00:00:00:00:01",
///     "status",
/// ])?;
/// let config = args.load_config()?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let transport = match maybe_fake_args {
///     Some(fake_args) => am43::fake_transport(fake_args),
///     None => am43::real_transport().await?,
/// };
/// let mut out = Vec::new();
/// am43::run(command, &config, &mut out, transport).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a cover command fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    config: &Am43Config,
    out: &mut W,
    transport: Arc<dyn BleTransport>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, config, out, transport, None).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a cover command fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    config: &Am43Config,
    out: &mut W,
    transport: Arc<dyn BleTransport>,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        config,
        out,
        &SystemTerminalClient,
        transport,
        log_level,
    )
    .await
}

/// Runs the CLI command with injected clients.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a cover command fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    config: &Am43Config,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    transport: Arc<dyn BleTransport>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, config, out, terminal_client, transport, None).await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a cover command fails, or
/// output writing fails.
#[instrument(
    skip(config, out, terminal_client, transport),
    level = "info",
    fields(command = %command.name(), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    config: &Am43Config,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    transport: Arc<dyn BleTransport>,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "am43",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let mut fleet = CoverFleet::new(config, transport);
    match command {
        Command::Scan => crate::cli::scan::run(&fleet, out).await,
        Command::Status(args) => crate::cli::control::run_status(&mut fleet, &args, out).await,
        Command::Open(args) => {
            crate::cli::control::run_action(&mut fleet, args.cover(), CoverAction::Open, out).await
        }
        Command::Close(args) => {
            crate::cli::control::run_action(&mut fleet, args.cover(), CoverAction::Close, out)
                .await
        }
        Command::Stop(args) => {
            crate::cli::control::run_action(&mut fleet, args.cover(), CoverAction::Stop, out).await
        }
        Command::SetPosition(args) => {
            crate::cli::control::run_action(
                &mut fleet,
                args.cover(),
                CoverAction::SetPosition(args.percent()),
                out,
            )
            .await
        }
        Command::Poll(args) => crate::cli::poll::run(&mut fleet, &args, out).await,
    }
}
