use std::io;

use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::app::CoverFleet;
use crate::handlers::{CoverController, CoverError, CoverStatus};

/// JSON line emitted for one cover.
#[derive(Debug, Serialize)]
pub(crate) struct CoverReport<'a> {
    cover: &'a str,
    #[serde(flatten)]
    status: CoverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Arguments for `status`.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Cover slug; every configured cover when omitted.
    cover: Option<String>,
}

impl StatusArgs {
    #[must_use]
    pub fn new(cover: Option<String>) -> Self {
        Self { cover }
    }
}

/// Arguments for `open`, `close` and `stop`.
#[derive(Debug, Args)]
pub struct CoverArgs {
    /// Cover slug.
    cover: String,
}

impl CoverArgs {
    #[must_use]
    pub fn new(cover: impl Into<String>) -> Self {
        Self {
            cover: cover.into(),
        }
    }

    pub(crate) fn cover(&self) -> &str {
        &self.cover
    }
}

/// Arguments for `set-position`.
#[derive(Debug, Args)]
pub struct SetPositionArgs {
    /// Cover slug.
    cover: String,
    /// Target position, 0 (open) to 100 (closed).
    #[arg(allow_negative_numbers = true)]
    percent: i32,
}

impl SetPositionArgs {
    #[must_use]
    pub fn new(cover: impl Into<String>, percent: i32) -> Self {
        Self {
            cover: cover.into(),
            percent,
        }
    }

    pub(crate) fn cover(&self) -> &str {
        &self.cover
    }

    pub(crate) fn percent(&self) -> i32 {
        self.percent
    }
}

/// Movement requested from one cover.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CoverAction {
    Open,
    Close,
    Stop,
    SetPosition(i32),
}

impl CoverAction {
    fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Stop => "stop",
            Self::SetPosition(_) => "set-position",
        }
    }
}

/// Executes one movement command and prints the resulting status.
#[instrument(skip(fleet, out), level = "info")]
pub(crate) async fn run_action<W>(
    fleet: &mut CoverFleet,
    cover: &str,
    action: CoverAction,
    out: &mut W,
) -> Result<()>
where
    W: io::Write,
{
    let controller = fleet.controller_mut(cover)?;
    let result = match action {
        CoverAction::Open => controller.open_cover().await,
        CoverAction::Close => controller.close_cover().await,
        CoverAction::Stop => controller.stop_cover().await,
        CoverAction::SetPosition(percent) => controller.set_position(percent).await,
    };

    if !write_report(out, cover, controller, result)? {
        bail!("`{}` command failed for cover `{cover}`", action.name());
    }
    Ok(())
}

/// Refreshes the selected covers and prints one status line each.
#[instrument(skip(fleet, args, out), level = "info")]
pub(crate) async fn run_status<W>(
    fleet: &mut CoverFleet,
    args: &StatusArgs,
    out: &mut W,
) -> Result<()>
where
    W: io::Write,
{
    let slugs = match &args.cover {
        Some(slug) => vec![slug.clone()],
        None => fleet.slugs(),
    };

    let mut failed = 0usize;
    for slug in &slugs {
        let controller = fleet.controller_mut(slug)?;
        let result = controller.refresh().await;
        if !write_report(out, slug, controller, result)? {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} covers failed to refresh", slugs.len());
    }
    Ok(())
}

/// Writes one JSON status line; returns whether the command succeeded.
pub(crate) fn write_report<W>(
    out: &mut W,
    slug: &str,
    controller: &CoverController,
    result: Result<CoverStatus, CoverError>,
) -> Result<bool>
where
    W: io::Write,
{
    let (status, error) = match result {
        Ok(status) => (status, None),
        Err(error) => (
            controller.status(),
            Some(format!("{:#}", anyhow::Error::new(error))),
        ),
    };
    let succeeded = error.is_none();
    let report = CoverReport {
        cover: slug,
        status,
        error,
    };
    writeln!(out, "{}", serde_json::to_string(&report)?)?;
    Ok(succeeded)
}
