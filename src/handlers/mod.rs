mod cover;
mod frame_codec;

pub use self::cover::{
    CoverController, CoverError, CoverFeature, CoverState, CoverStatus, DEVICE_CLASS,
};
pub(crate) use self::frame_codec::checksum;
pub use self::frame_codec::{
    Command, DecodeError, Frame, FrameCodec, FrameCodecError, MalformedReason, Percent,
    PercentError,
};
