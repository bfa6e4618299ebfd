//! Error taxonomy for the protocol engine.
//!
//! Only [`Error::Io`] is fatal to the current serial port; [`Error::Timeout`]
//! and [`Error::UnexpectedSyn`] are expected conditions the arbitration loop
//! handles locally, and [`Error::Overrun`] is the payload decoder's concern,
//! not the framer's or codec's.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Any OS-level failure on the serial device. The port is closed; the
    /// caller is expected to reopen it.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No symbol arrived within the auto-SYN timeout while a telegram was in
    /// progress.
    #[error("timed out waiting for the next symbol")]
    Timeout,

    /// A SYN symbol appeared where a data/ack/CRC symbol was expected. The
    /// SYN is latched as pending for the next raw read.
    #[error("unexpected SYN mid-telegram")]
    UnexpectedSyn,

    /// A payload decoder asked for more data than the telegram contained.
    #[error("overrun reading telegram data, requested offset {requested}, have {available}")]
    Overrun { requested: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
