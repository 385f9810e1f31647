// vim: tw=80
//! Common type definitions used throughout the taper

use std::io;
use thiserror::Error;

/// Indexes a buffer within the [`BufferPool`](crate::buffer::BufferPool)
pub type BufIdx = usize;

/// The taper's error type.
///
/// Every variant renders as a human-readable reason string, because errors
/// ultimately end up inside the brackets of a result line sent to the driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure of a local file or socket
    #[error("{0}")]
    Io(#[from] io::Error),

    /// A tape device primitive failed
    #[error("{0}")]
    Tape(String),

    /// The changer program failed, or its output was unintelligible
    #[error("changer: {0}")]
    Changer(String),

    /// No usable tape could be found or mounted
    #[error("{0}")]
    NoTape(String),

    /// A tape's label was refused, or could not be decoded
    #[error("{0}")]
    Label(String),

    /// The tape catalog could not be read or written
    #[error("tapelist: {0}")]
    Catalog(String),

    #[error("config: {0}")]
    Config(String),

    /// A buffer was granted that its recipient did not consider `EMPTY`, or
    /// was presented for writing without being `FULL`.
    #[error("fatal buffer mismanagement bug")]
    Desync,

    /// The control channel between the reader and the writer failed
    #[error("control channel: {0}")]
    Channel(String),

    /// A line from the driver could not be parsed.  Holds the handle, if any.
    #[error("bad command {0}")]
    Command(String),
}

impl Error {
    pub fn tape<S: Into<String>>(s: S) -> Self {
        Error::Tape(s.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
