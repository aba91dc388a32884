pub(crate) mod command;
pub(crate) mod control;
pub(crate) mod poll;
pub(crate) mod scan;

pub use self::command::{Args, Command, FakeArgs, LogLevel};
pub use self::control::{CoverArgs, SetPositionArgs, StatusArgs};
pub use self::poll::PollArgs;
