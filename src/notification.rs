use std::sync::Arc;

use tracing::{instrument, trace, warn};

use crate::handlers::FrameCodec;
use crate::hw::NotifyCallback;
use crate::sensor::SensorState;
use crate::utils::format_hex;

/// Typed readings carried by AM43 notification frames.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Notification {
    /// Battery charge in percent.
    Battery(u8),
    /// Ambient light level in percent.
    Light(u8),
    /// Blind position in percent, `0` open and `100` closed.
    Position(u8),
    /// Well-formed frame with a type id this crate does not interpret.
    Unknown { type_id: u8, payload: Vec<u8> },
}

/// Transport callback that feeds decoded notifications into one session's
/// sensor state.
#[derive(Debug, Clone)]
pub struct NotificationHandler {
    sensors: SensorState,
    characteristic_uuid: String,
}

impl NotificationHandler {
    /// Creates a handler bound to the subscribed characteristic.
    #[must_use]
    pub fn new(sensors: SensorState, characteristic_uuid: impl Into<String>) -> Self {
        Self {
            sensors,
            characteristic_uuid: characteristic_uuid.into(),
        }
    }

    /// Handles one inbound data event.
    ///
    /// Malformed frames are logged and dropped. Events from other
    /// characteristics are ignored.
    #[instrument(skip(self, raw), level = "trace", fields(payload_len = raw.len()))]
    pub fn on_notify(&self, characteristic_uuid: &str, raw: &[u8]) {
        if !characteristic_uuid.eq_ignore_ascii_case(&self.characteristic_uuid) {
            trace!(characteristic_uuid, "ignoring notification from other characteristic");
            return;
        }

        match FrameCodec::decode(raw) {
            Ok(notification) => self.sensors.apply(&notification),
            Err(error) => {
                warn!(%error, frame = %format_hex(raw), "dropping malformed notification");
            }
        }
    }

    /// Wraps the handler in the callback shape the transport expects.
    pub(crate) fn into_callback(self) -> NotifyCallback {
        Arc::new(move |characteristic_uuid: &str, raw: &[u8]| {
            self.on_notify(characteristic_uuid, raw);
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::checksum;

    const COMMAND_UUID: &str = "0000fe51-0000-1000-8000-00805f9b34fb";

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.push(checksum(body));
        frame
    }

    #[test]
    fn valid_position_reply_updates_sensor_state() {
        let sensors = SensorState::new();
        let handler = NotificationHandler::new(sensors.clone(), COMMAND_UUID);

        handler.on_notify(
            COMMAND_UUID,
            &framed(&[0x9A, 0xA7, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x37]),
        );

        assert_eq!(Some(55), sensors.snapshot().position_percent());
    }

    #[test]
    fn characteristic_match_ignores_uuid_case() {
        let sensors = SensorState::new();
        let handler = NotificationHandler::new(sensors.clone(), COMMAND_UUID);

        handler.on_notify(
            &COMMAND_UUID.to_ascii_uppercase(),
            &framed(&[0x9A, 0xAA, 0x04, 0x00, 0x00, 0x00, 0x21]),
        );

        assert_eq!(Some(0x21), sensors.snapshot().light_percent());
    }

    #[test]
    fn malformed_frame_leaves_state_untouched() {
        let sensors = SensorState::new();
        let handler = NotificationHandler::new(sensors.clone(), COMMAND_UUID);
        let mut frame = framed(&[0x9A, 0xA7, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x37]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        handler.on_notify(COMMAND_UUID, &frame);

        assert_eq!(crate::sensor::SensorReadings::default(), sensors.snapshot());
    }

    #[test]
    fn other_characteristics_are_ignored() {
        let sensors = SensorState::new();
        let handler = NotificationHandler::new(sensors.clone(), COMMAND_UUID);

        handler.on_notify(
            "00002a19-0000-1000-8000-00805f9b34fb",
            &framed(&[0x9A, 0xA7, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x37]),
        );

        assert_eq!(None, sensors.snapshot().position_percent());
    }

    #[test]
    fn callback_forwards_to_handler() {
        let sensors = SensorState::new();
        let callback = NotificationHandler::new(sensors.clone(), COMMAND_UUID).into_callback();

        callback(
            COMMAND_UUID,
            &framed(&[0x9A, 0xA2, 0x08, 0, 0, 0, 0, 0, 0, 0, 0x4B]),
        );

        assert_eq!(Some(75), sensors.snapshot().battery_percent());
    }
}
