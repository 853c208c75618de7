//! STM32 Serial Bootloader.
//!
//! Based on AN3155. A [`Programmer`] owns a single [`Transport`] for its
//! lifetime, performs the autobaud handshake in [`Programmer::setup`] and then
//! issues bootloader commands as checksummed frames gated by ACK / NACK bytes.

#[macro_use]
extern crate log;

pub mod protocol;
pub use protocol::{append_checksum, checksum, Command, MAX_CHUNK, UART_ACK, UART_DISC, UART_NACK};

pub mod transport;
pub use transport::{Direction, LogMonitor, Monitor, Polled, Silent, Transport};

mod programmer;
pub use programmer::{BootloaderInfo, Programmer};

#[cfg(feature = "linux")]
pub mod linux;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Autobaud has not (successfully) run
    Init,
    /// Bootloader has acknowledged the discovery character
    Synced,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<TransportError> {
    #[error("transport error: {0:?}")]
    Transport(TransportError),

    /// No data arrived within the response window
    #[error("timeout {0}")]
    Timeout(&'static str),

    /// Unexpected byte, or a NACK where no finer cause is available
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The bootloader rejected a specific command step
    #[error("command error: {0}")]
    Command(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("bootloader not synchronised, call setup first")]
    NotSynced,
}

impl<TransportError> From<TransportError> for Error<TransportError> {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for each bootloader response
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "250"))]
    pub response_timeout_ms: u32,

    /// Timeout to wait for readout (un)protect completion
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10000"))]
    pub completion_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 250,
            completion_timeout_ms: 10_000,
        }
    }
}
