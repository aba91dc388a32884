use std::io::{self, IsTerminal};

/// Terminal capabilities consulted when choosing log formatting.
pub trait TerminalClient {
    /// Returns whether standard error is attached to a terminal.
    fn stderr_is_terminal(&self) -> bool;
}

/// [`TerminalClient`] backed by the process's real standard streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
