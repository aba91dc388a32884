use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, instrument, warn};

use crate::app::CoverFleet;
use crate::cli::control::write_report;

/// Arguments for the `poll` command.
#[derive(Debug, Args)]
pub struct PollArgs {
    /// Time between refresh rounds (e.g. `30s`, `5m`).
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    interval: Duration,
    /// Stop after this many refresh rounds. If omitted, poll until Ctrl+C.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    count: Option<u32>,
}

impl PollArgs {
    /// Creates poll arguments.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// let args = am43::PollArgs::new(Duration::from_secs(30), Some(2));
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(interval: Duration, count: Option<u32>) -> Self {
        Self { interval, count }
    }

    fn round_limit_reached(&self, rounds: u32) -> bool {
        self.count.is_some_and(|count| rounds >= count)
    }
}

/// Checks fleet visibility, connects every cover, then refreshes them all on
/// a fixed cadence.
///
/// Covers that fail stay offline and are retried on the next round.
#[instrument(skip(fleet, out), level = "info")]
pub(crate) async fn run<W>(fleet: &mut CoverFleet, args: &PollArgs, out: &mut W) -> Result<()>
where
    W: io::Write,
{
    match fleet.link().fleet_scan(fleet.addresses()).await {
        Ok(report) if !report.all_found() => {
            warn!(missing = ?report.missing(), "continuing with covers missing from the scan");
        }
        Ok(_) => {}
        Err(error) => warn!(%error, "fleet scan failed, connecting anyway"),
    }

    let unavailable = fleet.connect_all().await;
    if !unavailable.is_empty() {
        warn!(?unavailable, "continuing without unreachable covers");
    }

    let mut ticker = interval(args.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = 0u32;

    while !args.round_limit_reached(rounds) {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!(rounds, "polling interrupted");
                break;
            }
            _ = ticker.tick() => {
                rounds += 1;
                for (slug, controller) in fleet.controllers_mut() {
                    let result = controller.refresh().await;
                    write_report(out, slug, controller, result)?;
                }
            }
        }
    }
    if args.round_limit_reached(rounds) {
        info!(rounds, "poll round limit reached");
    }

    Ok(())
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::cli::Args as CliArgs;

    #[rstest]
    #[case(Some(0), 0, true)]
    #[case(Some(2), 1, false)]
    #[case(Some(2), 2, true)]
    #[case(None, 1_000, false)]
    fn round_limit_is_checked_before_each_round(
        #[case] count: Option<u32>,
        #[case] rounds: u32,
        #[case] expected: bool,
    ) {
        let args = PollArgs::new(Duration::from_secs(30), count);

        assert_eq!(expected, args.round_limit_reached(rounds));
    }

    #[test]
    fn zero_round_count_is_rejected() {
        let result = CliArgs::try_parse_from(["am43", "poll", "--count", "0"]);

        let error = result.expect_err("a zero round count should fail argument parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }
}
