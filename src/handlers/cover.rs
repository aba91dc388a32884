use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use thiserror::Error;
use tracing::{error, info, instrument};

use super::{Command, Percent, PercentError};
use crate::error::LinkError;
use crate::hw::{DeviceSession, LinkManager};

/// Device class reported for every AM43 cover.
pub const DEVICE_CLASS: &str = "blind";

/// Externally reported cover state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverState {
    #[strum(to_string = "unknown")]
    Unknown,
    #[strum(to_string = "open")]
    Open,
    #[strum(to_string = "closed")]
    Closed,
    #[strum(to_string = "opening")]
    Opening,
    #[strum(to_string = "closing")]
    Closing,
    #[strum(to_string = "stopped")]
    Stopped,
    #[strum(to_string = "offline")]
    Offline,
}

impl CoverState {
    /// Returns whether the cover is closed, or `None` when that is not known.
    #[must_use]
    pub fn is_closed(self) -> Option<bool> {
        match self {
            Self::Unknown | Self::Offline => None,
            Self::Closed => Some(true),
            Self::Open | Self::Opening | Self::Closing | Self::Stopped => Some(false),
        }
    }

    /// Returns whether the cover currently answers commands.
    #[must_use]
    pub fn is_available(self) -> bool {
        self != Self::Offline
    }

    fn at_rest(position: u8) -> Self {
        match position {
            0 => Self::Open,
            100 => Self::Closed,
            _ => Self::Stopped,
        }
    }
}

/// Operations a cover accepts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverFeature {
    #[strum(to_string = "open")]
    Open,
    #[strum(to_string = "close")]
    Close,
    #[strum(to_string = "stop")]
    Stop,
    #[strum(to_string = "set_position")]
    SetPosition,
}

/// Errors returned by cover commands.
#[derive(Debug, Error)]
pub enum CoverError {
    /// A caller-supplied argument was rejected before any I/O.
    #[error("invalid cover argument")]
    InvalidArgument(#[from] PercentError),
    /// The device completed the write but did not accept the command.
    #[error("device `{address}` did not accept the {command} command")]
    CommandRejected { address: String, command: Command },
    /// The link could not be acquired or failed mid-command.
    #[error("cover link failed")]
    Link(#[from] LinkError),
}

/// Presentable snapshot of one cover.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CoverStatus {
    pub name: String,
    pub address: String,
    pub device_class: &'static str,
    pub state: CoverState,
    pub available: bool,
    pub is_closed: Option<bool>,
    pub battery_percent: Option<u8>,
    pub light_percent: Option<u8>,
    pub position_percent: Option<u8>,
}

/// State machine driving one cover through its [`DeviceSession`].
///
/// Commands take `&mut self`, so at most one command is outstanding per
/// device.
pub struct CoverController {
    link: LinkManager,
    session: DeviceSession,
    target: Option<Percent>,
}

impl CoverController {
    #[must_use]
    pub fn new(link: LinkManager, session: DeviceSession) -> Self {
        Self {
            link,
            session,
            target: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> CoverState {
        self.session.cover_state()
    }

    #[must_use]
    pub fn is_closed(&self) -> Option<bool> {
        self.state().is_closed()
    }

    #[must_use]
    pub fn supported_features() -> Vec<CoverFeature> {
        CoverFeature::iter().collect()
    }

    /// Builds a status snapshot from the last known readings without I/O.
    #[must_use]
    pub fn status(&self) -> CoverStatus {
        let readings = self.session.sensors().snapshot();
        let state = self.state();
        CoverStatus {
            name: self.session.name().to_string(),
            address: self.session.address().to_string(),
            device_class: DEVICE_CLASS,
            state,
            available: state.is_available(),
            is_closed: state.is_closed(),
            battery_percent: readings.battery_percent(),
            light_percent: readings.light_percent(),
            position_percent: readings.position_percent(),
        }
    }

    /// Connects and prepares the command characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`CoverError::Link`] and marks the cover offline when the
    /// device cannot be reached.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn connect(&mut self) -> Result<(), CoverError> {
        match self.link.ensure_services(&mut self.session).await {
            Ok(_) => {
                if self.state() == CoverState::Offline {
                    self.session.set_cover_state(CoverState::Unknown);
                }
                info!(name = self.session.name(), "cover ready");
                Ok(())
            }
            Err(source) => Err(self.go_offline(source)),
        }
    }

    /// Fully opens the cover.
    ///
    /// # Errors
    ///
    /// Returns an error when the move or the following refresh fails.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn open_cover(&mut self) -> Result<CoverStatus, CoverError> {
        self.move_to(Percent::OPEN).await?;
        self.session.set_cover_state(CoverState::Open);
        self.refresh().await
    }

    /// Fully closes the cover.
    ///
    /// # Errors
    ///
    /// Returns an error when the move or the following refresh fails.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn close_cover(&mut self) -> Result<CoverStatus, CoverError> {
        self.move_to(Percent::CLOSED).await?;
        self.session.set_cover_state(CoverState::Closed);
        self.refresh().await
    }

    /// Moves the cover to `percent`, where `0` is open and `100` closed.
    ///
    /// # Errors
    ///
    /// Returns [`CoverError::InvalidArgument`] for values outside `0..=100`
    /// before anything is sent, or an error when the move or the following
    /// refresh fails.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn set_position(&mut self, percent: i32) -> Result<CoverStatus, CoverError> {
        let target = Percent::try_from(percent)?;
        self.move_to(target).await?;
        self.refresh().await
    }

    /// Stops any movement; the following refresh decides the reported state.
    ///
    /// # Errors
    ///
    /// Returns an error when the stop or the following refresh fails.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn stop_cover(&mut self) -> Result<CoverStatus, CoverError> {
        self.dispatch(Command::Stop).await?;
        self.target = None;
        self.refresh().await
    }

    /// Queries battery, light and position, then re-derives the cover state.
    ///
    /// # Errors
    ///
    /// Returns an error when any query fails or goes unanswered.
    #[instrument(skip(self), fields(address = %self.session.address()))]
    pub async fn refresh(&mut self) -> Result<CoverStatus, CoverError> {
        for query in [Command::QueryBattery, Command::QueryLight, Command::QueryPosition] {
            self.dispatch(query).await?;
        }
        self.resync_state();

        let status = self.status();
        info!(
            state = %status.state,
            battery = ?status.battery_percent,
            light = ?status.light_percent,
            position = ?status.position_percent,
            "cover refreshed"
        );
        Ok(status)
    }

    async fn move_to(&mut self, target: Percent) -> Result<(), CoverError> {
        self.dispatch(Command::SetPosition(target)).await?;
        self.target = Some(target);
        Ok(())
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), CoverError> {
        match self.link.send(&mut self.session, command).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(%command, "command rejected by device");
                Err(CoverError::CommandRejected {
                    address: self.session.address().to_string(),
                    command,
                })
            }
            Err(source) => {
                error!(%command, error = %source, "command failed");
                Err(self.go_offline(source))
            }
        }
    }

    fn go_offline(&mut self, source: LinkError) -> CoverError {
        self.session.set_cover_state(CoverState::Offline);
        self.target = None;
        CoverError::Link(source)
    }

    fn resync_state(&mut self) {
        let Some(position) = self.session.sensors().snapshot().position_percent() else {
            if self.state() == CoverState::Offline {
                self.session.set_cover_state(CoverState::Unknown);
            }
            return;
        };

        let state = match self.target {
            Some(target) if target.value() != position => {
                if target.value() < position {
                    CoverState::Opening
                } else {
                    CoverState::Closing
                }
            }
            _ => {
                self.target = None;
                CoverState::at_rest(position)
            }
        };
        self.session.set_cover_state(state);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CoverState::Unknown, None)]
    #[case(CoverState::Offline, None)]
    #[case(CoverState::Closed, Some(true))]
    #[case(CoverState::Opening, Some(false))]
    #[case(CoverState::Closing, Some(false))]
    #[case(CoverState::Stopped, Some(false))]
    fn is_closed_only_reports_closed_when_closed(
        #[case] state: CoverState,
        #[case] expected: Option<bool>,
    ) {
        assert_eq!(expected, state.is_closed());
    }

    #[rstest]
    #[case(0, CoverState::Open)]
    #[case(100, CoverState::Closed)]
    #[case(55, CoverState::Stopped)]
    fn resting_position_maps_to_state(#[case] position: u8, #[case] expected: CoverState) {
        assert_eq!(expected, CoverState::at_rest(position));
    }

    #[test]
    fn supported_features_cover_every_command() {
        assert_eq!(
            vec![
                CoverFeature::Open,
                CoverFeature::Close,
                CoverFeature::Stop,
                CoverFeature::SetPosition,
            ],
            CoverController::supported_features()
        );
    }

    #[test]
    fn state_serialises_in_snake_case() {
        let json = serde_json::to_string(&CoverState::Opening).expect("state should serialise");
        assert_eq!("\"opening\"", json);
    }
}
