use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Leading byte of every AM43 frame.
pub(crate) const FRAME_MARKER: u8 = 0x9A;

/// Known AM43 GATT endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// AM43 blind control service.
    #[strum(to_string = "control_service")]
    ControlService,
    /// Characteristic used for command writes and sensor notifications.
    #[strum(to_string = "command_characteristic")]
    CommandCharacteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }
}

/// Endpoint metadata keyed by typed endpoint IDs.
pub(crate) static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> =
    LazyLock::new(|| {
        EndpointId::iter()
            .map(|endpoint| (endpoint, metadata_for(endpoint)))
            .collect()
    });

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::ControlService => EndpointMetadata {
            name: "AM43 blind control service",
            uuid: "0000fe50-0000-1000-8000-00805f9b34fb",
        },
        EndpointId::CommandCharacteristic => EndpointMetadata {
            name: "AM43 command/notify data",
            uuid: "0000fe51-0000-1000-8000-00805f9b34fb",
        },
    }
}

/// Message identifiers carried in byte 1 of an AM43 frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum MessageId {
    /// Move to an absolute position.
    #[strum(to_string = "move")]
    Move,
    /// Stop any movement.
    #[strum(to_string = "stop")]
    Stop,
    /// Battery query and reply.
    #[strum(to_string = "battery")]
    Battery,
    /// Light sensor query and reply.
    #[strum(to_string = "light")]
    Light,
    /// Position query and reply.
    #[strum(to_string = "position")]
    Position,
    /// Reserved position variant; decoded as unknown telemetry.
    #[strum(to_string = "position_variant_a8")]
    PositionVariantA8,
    /// Reserved position variant; decoded as unknown telemetry.
    #[strum(to_string = "position_variant_a9")]
    PositionVariantA9,
}

impl MessageId {
    /// Returns the raw wire byte.
    ///
    /// ```
    /// use am43::MessageId;
    ///
    /// assert_eq!(0x0D, MessageId::Move.as_byte());
    /// assert_eq!(0xA7, MessageId::Position.as_byte());
    /// ```
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Move => 0x0D,
            Self::Stop => 0x0A,
            Self::Battery => 0xA2,
            Self::Light => 0xAA,
            Self::Position => 0xA7,
            Self::PositionVariantA8 => 0xA8,
            Self::PositionVariantA9 => 0xA9,
        }
    }

    /// Maps a wire byte back to a known identifier.
    #[must_use]
    pub fn from_byte(value: u8) -> Option<Self> {
        Self::iter().find(|id| id.as_byte() == value)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_uuids() {
        let control = endpoint_metadata(EndpointId::ControlService);
        assert_eq!("0000fe50-0000-1000-8000-00805f9b34fb", control.uuid());

        let command = endpoint_metadata(EndpointId::CommandCharacteristic);
        assert_eq!("AM43 command/notify data", command.name());
    }

    #[rstest]
    #[case(0x0D, Some(MessageId::Move))]
    #[case(0x0A, Some(MessageId::Stop))]
    #[case(0xA2, Some(MessageId::Battery))]
    #[case(0xAA, Some(MessageId::Light))]
    #[case(0xA7, Some(MessageId::Position))]
    #[case(0xA9, Some(MessageId::PositionVariantA9))]
    #[case(0x42, None)]
    fn message_id_maps_wire_bytes(#[case] value: u8, #[case] expected: Option<MessageId>) {
        assert_eq!(expected, MessageId::from_byte(value));
    }
}
