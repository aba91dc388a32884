use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::notification::Notification;

/// One sensor value together with the update marker that produced it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct Reading {
    percent: u8,
    marker: u64,
}

impl Reading {
    /// Returns the reported percent.
    #[must_use]
    pub fn percent(self) -> u8 {
        self.percent
    }

    /// Returns the update marker; later updates always carry larger markers.
    #[must_use]
    pub fn marker(self) -> u64 {
        self.marker
    }
}

/// Immutable snapshot of the latest readings for one device.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct SensorReadings {
    battery: Option<Reading>,
    light: Option<Reading>,
    position: Option<Reading>,
    unknown_notifications: u64,
    #[serde(skip)]
    last_marker: u64,
}

impl SensorReadings {
    #[must_use]
    pub fn battery(&self) -> Option<Reading> {
        self.battery
    }

    #[must_use]
    pub fn light(&self) -> Option<Reading> {
        self.light
    }

    #[must_use]
    pub fn position(&self) -> Option<Reading> {
        self.position
    }

    #[must_use]
    pub fn battery_percent(&self) -> Option<u8> {
        self.battery.map(Reading::percent)
    }

    #[must_use]
    pub fn light_percent(&self) -> Option<u8> {
        self.light.map(Reading::percent)
    }

    #[must_use]
    pub fn position_percent(&self) -> Option<u8> {
        self.position.map(Reading::percent)
    }

    /// Number of well-formed notifications with an uninterpreted type id.
    #[must_use]
    pub fn unknown_notifications(&self) -> u64 {
        self.unknown_notifications
    }

    fn next_reading(&mut self, percent: u8) -> Option<Reading> {
        self.last_marker += 1;
        Some(Reading {
            percent,
            marker: self.last_marker,
        })
    }
}

/// Latest sensor readings for one device session.
///
/// The notification path writes through [`SensorState::apply`]; readers take
/// whole snapshots, so they never observe a half-applied update.
#[derive(Debug, Clone)]
pub struct SensorState {
    readings: Arc<watch::Sender<SensorReadings>>,
}

impl SensorState {
    /// Creates an empty sensor state.
    #[must_use]
    pub fn new() -> Self {
        let (readings, _receiver) = watch::channel(SensorReadings::default());
        Self {
            readings: Arc::new(readings),
        }
    }

    /// Applies one decoded notification.
    pub fn apply(&self, notification: &Notification) {
        self.readings.send_modify(|readings| match notification {
            Notification::Battery(percent) => {
                readings.battery = readings.next_reading(*percent);
                debug!(battery_percent = percent, "battery reading updated");
            }
            Notification::Light(percent) => {
                readings.light = readings.next_reading(*percent);
                debug!(light_percent = percent, "light reading updated");
            }
            Notification::Position(percent) => {
                readings.position = readings.next_reading(*percent);
                debug!(position_percent = percent, "position reading updated");
            }
            Notification::Unknown { type_id, payload } => {
                readings.unknown_notifications += 1;
                warn!(
                    type_id,
                    payload_len = payload.len(),
                    unknown_notifications = readings.unknown_notifications,
                    "unknown notification identifier received"
                );
            }
        });
    }

    /// Returns a copy of the current readings.
    #[must_use]
    pub fn snapshot(&self) -> SensorReadings {
        self.readings.borrow().clone()
    }

    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<SensorReadings> {
        self.readings.subscribe()
    }
}

impl Default for SensorState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn each_notification_updates_only_its_field() {
        let state = SensorState::new();

        state.apply(&Notification::Battery(80));
        let after_battery = state.snapshot();
        assert_eq!(Some(80), after_battery.battery_percent());
        assert_eq!(None, after_battery.light_percent());
        assert_eq!(None, after_battery.position_percent());

        state.apply(&Notification::Position(55));
        let after_position = state.snapshot();
        assert_eq!(Some(80), after_position.battery_percent());
        assert_eq!(Some(55), after_position.position_percent());
    }

    #[test]
    fn update_markers_increase_monotonically() {
        let state = SensorState::new();

        state.apply(&Notification::Position(10));
        let first = state.snapshot().position().expect("position should be set");
        state.apply(&Notification::Light(3));
        state.apply(&Notification::Position(10));
        let second = state.snapshot().position().expect("position should be set");

        assert!(second.marker() > first.marker());
        assert_eq!(first.percent(), second.percent());
    }

    #[test]
    fn unknown_notifications_only_bump_counter() {
        let state = SensorState::new();
        state.apply(&Notification::Unknown {
            type_id: 0xA8,
            payload: vec![0x01],
        });

        let snapshot = state.snapshot();
        assert_eq!(1, snapshot.unknown_notifications());
        assert_eq!(None, snapshot.battery());
        assert_eq!(None, snapshot.light());
        assert_eq!(None, snapshot.position());
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let state = SensorState::new();
        state.apply(&Notification::Battery(90));
        let snapshot = state.snapshot();

        state.apply(&Notification::Battery(10));

        assert_eq!(Some(90), snapshot.battery_percent());
        assert_eq!(Some(10), state.snapshot().battery_percent());
    }

    #[test]
    fn sessions_do_not_share_readings() {
        let kitchen = SensorState::new();
        let bedroom = SensorState::new();

        kitchen.apply(&Notification::Position(100));

        assert_eq!(Some(100), kitchen.snapshot().position_percent());
        assert_eq!(None, bedroom.snapshot().position_percent());
    }

    #[tokio::test]
    async fn subscribers_observe_updates() {
        let state = SensorState::new();
        let mut receiver = state.subscribe();

        state.apply(&Notification::Light(42));
        receiver
            .changed()
            .await
            .expect("sender should still be alive");

        assert_eq!(Some(42), receiver.borrow().light_percent());
    }
}
