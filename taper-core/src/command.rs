// vim: tw=80
//! The line-oriented protocol spoken with the driver
//!
//! Each line holds one space-separated command, and every command but `QUIT`
//! gets exactly one terminal reply line.  `PORT-WRITE` additionally gets a
//! `PORT` line as soon as its listening socket is ready.

use crate::{reader::Stats, types::*};
use std::{fmt, path::PathBuf};

/// A request from the driver
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Begin a run by mounting and labeling the first tape
    StartTaper { datestamp: String },
    /// Accept one network connection, and write its data as one file
    PortWrite {
        handle: String,
        host: String,
        disk: String,
        level: u32,
    },
    /// Write a holding-disk file to tape
    FileWrite {
        handle: String,
        path: PathBuf,
        host: String,
        disk: String,
        level: u32,
    },
    Quit,
}

impl TryFrom<&str> for Command {
    type Error = Error;

    /// Parse one line.  On failure, the error holds the request's handle, if
    /// it had one, so the reply can be correlated.
    fn try_from(s: &str) -> Result<Self> {
        let words = s.split_whitespace().collect::<Vec<_>>();
        let bad = || {
            Error::Command(words.get(1).copied().unwrap_or_default().to_owned())
        };
        let level = |w: &str| w.parse::<u32>().map_err(|_| bad());
        match words[..] {
            ["START-TAPER", datestamp] => Ok(Command::StartTaper {
                datestamp: datestamp.to_owned()
            }),
            ["PORT-WRITE", handle, host, disk, lvl] => Ok(Command::PortWrite {
                handle: handle.to_owned(),
                host: host.to_owned(),
                disk: disk.to_owned(),
                level: level(lvl)?,
            }),
            ["FILE-WRITE", handle, path, host, disk, lvl] => {
                Ok(Command::FileWrite {
                    handle: handle.to_owned(),
                    path: PathBuf::from(path),
                    host: host.to_owned(),
                    disk: disk.to_owned(),
                    level: level(lvl)?,
                })
            }
            ["QUIT"] => Ok(Command::Quit),
            _ => Err(bad())
        }
    }
}

/// A line sent back to the driver
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    TaperOk,
    /// The listening port for a `PORT-WRITE`
    Port(u16),
    Done {
        handle: String,
        label: String,
        filenum: u32,
        stats: Stats,
    },
    /// The file wasn't written, but might be if resubmitted
    TryAgain { handle: String, reason: String },
    /// The file wasn't written.  Without a handle, the run itself failed.
    TapeError { handle: Option<String>, reason: String },
    BadCommand(String),
    Quitting,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::TaperOk => f.write_str("TAPER-OK"),
            Reply::Port(port) => write!(f, "PORT {port}"),
            Reply::Done { handle, label, filenum, stats } => {
                write!(f, "DONE {handle} {label} {filenum} [{stats}]")
            }
            Reply::TryAgain { handle, reason } => {
                write!(f, "TRY-AGAIN {handle} [{reason}]")
            }
            Reply::TapeError { handle: Some(handle), reason } => {
                write!(f, "TAPE-ERROR {handle} [{reason}]")
            }
            Reply::TapeError { handle: None, reason } => {
                write!(f, "TAPE-ERROR [{reason}]")
            }
            Reply::BadCommand(handle) if handle.is_empty() => {
                f.write_str("BAD-COMMAND")
            }
            Reply::BadCommand(handle) => write!(f, "BAD-COMMAND {handle}"),
            Reply::Quitting => f.write_str("QUITTING"),
        }
    }
}
