use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::app::CoverFleet;

/// Runs the startup visibility check over every configured cover.
///
/// Missing covers are reported, not treated as a failure.
#[instrument(skip(fleet, out), level = "info")]
pub(crate) async fn run<W>(fleet: &CoverFleet, out: &mut W) -> Result<()>
where
    W: io::Write,
{
    let report = fleet.link().fleet_scan(fleet.addresses()).await?;
    writeln!(out, "{}", serde_json::to_string(&report)?)?;
    Ok(())
}
