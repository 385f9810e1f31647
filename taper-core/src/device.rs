// vim: tw=80
//! Tape device primitives

use crate::{label::TapeHeader, types::*};
#[cfg(test)] use mockall::automock;
use std::path::Path;

/// A sequential tape drive.
///
/// One object models the drive; it may be opened on different media (for
/// example, different changer slots) over its lifetime.  Every operation
/// except `open` requires the drive to be open.
#[cfg_attr(test, automock)]
pub trait TapeDevice: Send {
    /// Open the medium at `path`, positioned at its beginning.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Close the medium.  Closing a drive that isn't open is a no-op.
    fn close(&mut self) -> Result<()>;

    fn rewind(&mut self) -> Result<()>;

    /// Read the label record at the beginning of the tape.
    ///
    /// The tape is left positioned after the label.  Any error means the tape
    /// has no readable label: it is blank, foreign, or damaged.
    fn read_label(&mut self) -> Result<TapeHeader>;

    /// Rewind and write a fresh label record, discarding everything that was
    /// on the tape.
    fn write_label(&mut self, label: &str, datestamp: &str) -> Result<()>;

    fn write_filemark(&mut self) -> Result<()>;

    /// Write the record that marks the end of a run's data.
    fn write_end_marker(&mut self, label: &str, datestamp: &str) -> Result<()>;

    /// Write one data block
    fn write_block(&mut self, block: &[u8]) -> Result<()>;
}
