use thiserror::Error;
use tracing::{debug, instrument};

use crate::notification::Notification;
use crate::protocol::{FRAME_MARKER, MessageId};

/// Marker, type id, length and checksum bytes wrapped around every payload.
const FRAME_ENVELOPE_LEN: usize = 4;
const FRAME_HEADER_LEN: usize = 3;
const QUERY_PAYLOAD: u8 = 0x01;
const STOP_PAYLOAD: u8 = 0xCC;
const MAX_PERCENT: u8 = 100;

/// Payload index of the percent byte in a battery reply.
const BATTERY_PERCENT_INDEX: usize = 7;
/// Payload index of the percent byte in a light reply.
const LIGHT_PERCENT_INDEX: usize = 3;
/// Payload index of the percent byte in a position reply.
const POSITION_PERCENT_INDEX: usize = 5;

/// Errors returned while decoding inbound frames.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    /// The frame failed envelope, length or checksum validation.
    #[error("malformed AM43 frame: {reason}")]
    Malformed { reason: MalformedReason },
}

/// Why a frame was rejected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum MalformedReason {
    #[display("frame has {actual} bytes, shorter than the 4-byte envelope")]
    TooShort { actual: usize },
    #[display("marker byte is {found:#04x}, expected 0x9a")]
    BadMarker { found: u8 },
    #[display("length byte declares {declared} payload bytes but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[display("checksum byte is {found:#04x} but frame XORs to {computed:#04x}")]
    ChecksumMismatch { found: u8, computed: u8 },
    #[display("{kind} reply has {actual} payload bytes, percent is expected at index {index}")]
    TruncatedReply {
        kind: MessageId,
        index: usize,
        actual: usize,
    },
}

impl From<MalformedReason> for DecodeError {
    fn from(reason: MalformedReason) -> Self {
        Self::Malformed { reason }
    }
}

/// Errors returned while encoding synthetic frames.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The payload does not fit in the one-byte length field.
    #[error("frame payload is too large: {payload_len} bytes exceeds max {max_payload_len}")]
    PayloadTooLarge {
        payload_len: usize,
        max_payload_len: usize,
    },
}

/// Errors returned when validating a percent value.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum PercentError {
    /// The value was outside the accepted range.
    #[error("percent {value} is out of range (0..=100)")]
    OutOfRange { value: i64 },
}

/// Validated cover position in the inclusive range `0..=100`.
///
/// `0` is fully open and `100` is fully closed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, derive_more::Into)]
#[display("{_0}")]
pub struct Percent(u8);

impl Percent {
    /// Fully open.
    pub const OPEN: Self = Self(0);
    /// Fully closed.
    pub const CLOSED: Self = Self(MAX_PERCENT);

    /// Creates a validated percent value.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is above `100`.
    ///
    /// ```
    /// use am43::Percent;
    ///
    /// let value = Percent::new(42)?;
    /// assert_eq!(42, value.value());
    /// # Ok::<(), am43::PercentError>(())
    /// ```
    pub fn new(value: u8) -> Result<Self, PercentError> {
        if value > MAX_PERCENT {
            return Err(PercentError::OutOfRange {
                value: i64::from(value),
            });
        }

        Ok(Self(value))
    }

    /// Returns the underlying byte.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i32> for Percent {
    type Error = PercentError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let out_of_range = PercentError::OutOfRange {
            value: i64::from(value),
        };
        u8::try_from(value)
            .map_err(|_| out_of_range)
            .and_then(Self::new)
    }
}

/// Outbound AM43 commands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub enum Command {
    /// Move the blind to an absolute position.
    #[strum(to_string = "set_position")]
    SetPosition(Percent),
    /// Stop any movement.
    #[strum(to_string = "stop")]
    Stop,
    /// Ask for a battery reading.
    #[strum(to_string = "query_battery")]
    QueryBattery,
    /// Ask for a light sensor reading.
    #[strum(to_string = "query_light")]
    QueryLight,
    /// Ask for a position reading.
    #[strum(to_string = "query_position")]
    QueryPosition,
}

impl Command {
    /// Returns the wire identifier for this command.
    #[must_use]
    pub const fn message_id(self) -> MessageId {
        match self {
            Self::SetPosition(_) => MessageId::Move,
            Self::Stop => MessageId::Stop,
            Self::QueryBattery => MessageId::Battery,
            Self::QueryLight => MessageId::Light,
            Self::QueryPosition => MessageId::Position,
        }
    }

    /// Returns whether the device answers this command with a notification.
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        matches!(
            self,
            Self::QueryBattery | Self::QueryLight | Self::QueryPosition
        )
    }

    const fn payload(self) -> [u8; 1] {
        match self {
            Self::SetPosition(percent) => [percent.value()],
            Self::Stop => [STOP_PAYLOAD],
            Self::QueryBattery | Self::QueryLight | Self::QueryPosition => [QUERY_PAYLOAD],
        }
    }
}

/// A validated view over one inbound frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Frame<'a> {
    type_id: u8,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validates envelope, length and checksum of a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when any check fails.
    pub fn parse(raw: &'a [u8]) -> Result<Self, DecodeError> {
        if raw.len() < FRAME_ENVELOPE_LEN {
            return Err(MalformedReason::TooShort { actual: raw.len() }.into());
        }
        if raw[0] != FRAME_MARKER {
            return Err(MalformedReason::BadMarker { found: raw[0] }.into());
        }

        let declared = usize::from(raw[2]);
        let actual = raw.len() - FRAME_ENVELOPE_LEN;
        if declared != actual {
            return Err(MalformedReason::LengthMismatch { declared, actual }.into());
        }

        let (body, trailer) = raw.split_at(raw.len() - 1);
        let computed = checksum(body);
        if trailer[0] != computed {
            return Err(MalformedReason::ChecksumMismatch {
                found: trailer[0],
                computed,
            }
            .into());
        }

        Ok(Self {
            type_id: raw[1],
            payload: &body[FRAME_HEADER_LEN..],
        })
    }

    /// Returns the raw type id byte.
    #[must_use]
    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    /// Returns the payload bytes between header and checksum.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

/// Encodes AM43 commands and decodes AM43 notifications.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes one outbound command frame.
    ///
    /// ```
    /// use am43::{DeviceCommand, FrameCodec, Percent};
    ///
    /// let frame = FrameCodec::encode(DeviceCommand::SetPosition(Percent::new(42)?));
    /// assert_eq!(vec![0x9A, 0x0D, 0x01, 0x2A, 0x9A ^ 0x0D ^ 0x01 ^ 0x2A], frame);
    /// # Ok::<(), am43::PercentError>(())
    /// ```
    #[must_use]
    pub fn encode(command: Command) -> Vec<u8> {
        seal(command.message_id().as_byte(), &command.payload())
    }

    /// Decodes one inbound notification frame.
    ///
    /// Unrecognised type ids decode to [`Notification::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when the frame fails validation or a
    /// known reply is too short to carry its percent byte.
    #[instrument(skip(raw), level = "trace", fields(frame_len = raw.len()))]
    pub fn decode(raw: &[u8]) -> Result<Notification, DecodeError> {
        let frame = Frame::parse(raw)?;
        let payload = frame.payload();

        match MessageId::from_byte(frame.type_id()) {
            Some(kind @ MessageId::Battery) => {
                percent_at(kind, payload, BATTERY_PERCENT_INDEX).map(Notification::Battery)
            }
            Some(kind @ MessageId::Light) => {
                percent_at(kind, payload, LIGHT_PERCENT_INDEX).map(Notification::Light)
            }
            Some(kind @ MessageId::Position) => {
                percent_at(kind, payload, POSITION_PERCENT_INDEX).map(Notification::Position)
            }
            _ => {
                debug!(
                    type_id = frame.type_id(),
                    payload_len = payload.len(),
                    "unrecognised notification type"
                );
                Ok(Notification::Unknown {
                    type_id: frame.type_id(),
                    payload: payload.to_vec(),
                })
            }
        }
    }

    /// Encodes a notification into the frame a device would emit for it.
    ///
    /// Reserved payload bytes are zero.
    ///
    /// # Errors
    ///
    /// Returns an error when an unknown payload exceeds 255 bytes.
    pub fn encode_notification(notification: &Notification) -> Result<Vec<u8>, FrameCodecError> {
        match notification {
            Notification::Battery(percent) => Ok(reply(
                MessageId::Battery,
                BATTERY_PERCENT_INDEX,
                *percent,
            )),
            Notification::Light(percent) => {
                Ok(reply(MessageId::Light, LIGHT_PERCENT_INDEX, *percent))
            }
            Notification::Position(percent) => Ok(reply(
                MessageId::Position,
                POSITION_PERCENT_INDEX,
                *percent,
            )),
            Notification::Unknown { type_id, payload } => {
                let max_payload_len = usize::from(u8::MAX);
                if payload.len() > max_payload_len {
                    return Err(FrameCodecError::PayloadTooLarge {
                        payload_len: payload.len(),
                        max_payload_len,
                    });
                }
                Ok(seal(*type_id, payload))
            }
        }
    }
}

/// XOR of every byte, left to right.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Builds a frame; callers guarantee `payload.len() <= 255`.
fn seal(type_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + FRAME_ENVELOPE_LEN);
    frame.push(FRAME_MARKER);
    frame.push(type_id);
    frame.push(u8::try_from(payload.len()).unwrap_or(u8::MAX));
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

fn reply(kind: MessageId, index: usize, percent: u8) -> Vec<u8> {
    let mut payload = vec![0x00; index + 1];
    payload[index] = percent;
    seal(kind.as_byte(), &payload)
}

fn percent_at(kind: MessageId, payload: &[u8], index: usize) -> Result<u8, DecodeError> {
    payload.get(index).copied().ok_or_else(|| {
        MalformedReason::TruncatedReply {
            kind,
            index,
            actual: payload.len(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn position_reply_55() -> Vec<u8> {
        let mut frame = vec![0x9A, 0xA7, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x37];
        frame.push(checksum(&frame));
        frame
    }

    #[test]
    fn encode_set_position_matches_protocol() {
        let percent = Percent::new(42).expect("42 should be a valid percent");
        let frame = FrameCodec::encode(Command::SetPosition(percent));
        assert_eq!(vec![0x9A, 0x0D, 0x01, 0x2A, 0x9A ^ 0x0D ^ 0x01 ^ 0x2A], frame);
    }

    #[rstest]
    #[case(Command::Stop, vec![0x9A, 0x0A, 0x01, 0xCC])]
    #[case(Command::QueryBattery, vec![0x9A, 0xA2, 0x01, 0x01])]
    #[case(Command::QueryLight, vec![0x9A, 0xAA, 0x01, 0x01])]
    #[case(Command::QueryPosition, vec![0x9A, 0xA7, 0x01, 0x01])]
    #[case(Command::SetPosition(Percent::CLOSED), vec![0x9A, 0x0D, 0x01, 0x64])]
    fn encode_fixed_commands(#[case] command: Command, #[case] body: Vec<u8>) {
        let mut expected = body.clone();
        expected.push(checksum(&body));
        assert_eq!(expected, FrameCodec::encode(command));
    }

    #[test]
    fn decode_position_reply_reads_payload_index_five() {
        let decoded =
            FrameCodec::decode(&position_reply_55()).expect("position reply should decode");
        assert_eq!(Notification::Position(55), decoded);
    }

    #[rstest]
    #[case(Notification::Battery(87))]
    #[case(Notification::Light(12))]
    #[case(Notification::Position(100))]
    #[case(Notification::Battery(250))]
    fn synthetic_replies_recover_percent(#[case] notification: Notification) {
        let frame = FrameCodec::encode_notification(&notification)
            .expect("known replies should always encode");
        let decoded = FrameCodec::decode(&frame).expect("synthetic reply should decode");
        assert_eq!(notification, decoded);
    }

    #[test]
    fn any_single_bit_flip_is_rejected() {
        let frame = position_reply_55();
        for index in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[index] ^= 1 << bit;
                assert_matches!(
                    FrameCodec::decode(&corrupted),
                    Err(DecodeError::Malformed { .. }),
                    "flip of bit {bit} in byte {index} should be rejected"
                );
            }
        }
    }

    #[rstest]
    #[case(0x05)]
    #[case(0x07)]
    #[case(0x00)]
    fn length_mismatch_is_rejected_even_with_valid_checksum(#[case] declared: u8) {
        let mut frame = vec![0x9A, 0xA7, declared, 0x00, 0x00, 0x00, 0x00, 0x00, 0x37];
        frame.push(checksum(&frame));

        let result = FrameCodec::decode(&frame);
        assert_matches!(
            result,
            Err(DecodeError::Malformed {
                reason: MalformedReason::LengthMismatch { actual: 6, .. }
            })
        );
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![0x9A, 0xA7, 0x00])]
    fn too_short_frames_are_rejected(#[case] raw: Vec<u8>) {
        assert_matches!(
            FrameCodec::decode(&raw),
            Err(DecodeError::Malformed {
                reason: MalformedReason::TooShort { .. }
            })
        );
    }

    #[test]
    fn wrong_marker_is_rejected() {
        let mut frame = vec![0x9B, 0xA7, 0x01, 0x00];
        frame.push(checksum(&frame));
        assert_matches!(
            FrameCodec::decode(&frame),
            Err(DecodeError::Malformed {
                reason: MalformedReason::BadMarker { found: 0x9B }
            })
        );
    }

    #[test]
    fn truncated_battery_reply_is_rejected() {
        let mut frame = vec![0x9A, 0xA2, 0x02, 0x00, 0x50];
        frame.push(checksum(&frame));
        assert_matches!(
            FrameCodec::decode(&frame),
            Err(DecodeError::Malformed {
                reason: MalformedReason::TruncatedReply {
                    kind: MessageId::Battery,
                    index: 7,
                    actual: 2,
                }
            })
        );
    }

    #[rstest]
    #[case(0x0D)]
    #[case(0xA8)]
    #[case(0x5A)]
    fn unrecognised_type_ids_decode_as_unknown(#[case] type_id: u8) {
        let mut frame = vec![0x9A, type_id, 0x02, 0x5A, 0x31];
        frame.push(checksum(&frame));

        let decoded = FrameCodec::decode(&frame).expect("unknown telemetry should not error");
        assert_eq!(
            Notification::Unknown {
                type_id,
                payload: vec![0x5A, 0x31],
            },
            decoded
        );
    }

    #[rstest]
    #[case(-1)]
    #[case(101)]
    #[case(i32::MAX)]
    fn percent_rejects_out_of_range(#[case] value: i32) {
        assert_matches!(
            Percent::try_from(value),
            Err(PercentError::OutOfRange { value: rejected }) if rejected == i64::from(value)
        );
    }

    #[test]
    fn oversized_unknown_payload_cannot_be_encoded() {
        let notification = Notification::Unknown {
            type_id: 0x01,
            payload: vec![0x00; 256],
        };
        assert_matches!(
            FrameCodec::encode_notification(&notification),
            Err(FrameCodecError::PayloadTooLarge {
                payload_len: 256,
                max_payload_len: 255,
            })
        );
    }
}
