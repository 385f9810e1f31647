// vim: tw=80
//! The tape catalog: every tape the system knows, most recently used first.

use crate::types::*;
use serde_derive::{Deserialize, Serialize};
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

/// Datestamp of a tape that has been labeled but never written
pub const UNUSED: &str = "0";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Entry {
    pub datestamp: String,
    pub label: String,
}

/// The catalog.  An entry's position is its index; position 0 is the tape
/// most recently written.
#[derive(Clone, Debug, Default)]
pub struct TapeList {
    path: PathBuf,
    entries: Vec<Entry>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl TapeList {
    /// The entry at position `pos`, if there is one
    pub fn at_position(&self, pos: usize) -> Option<&Entry> {
        self.entries.get(pos)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Is `label` among the `tapecycle` most recently used tapes?  Active tapes
    /// must never be overwritten.  A tape that has been labeled but never
    /// written is never active.
    pub fn is_active(&self, label: &str, tapecycle: usize) -> bool {
        self.lookup(label)
            .map(|(pos, e)| pos < tapecycle && e.datestamp != UNUSED)
            .unwrap_or(false)
    }

    /// Load the catalog stored at `path`.  A nonexistent file is an empty
    /// catalog.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let entries = match fs::read_to_string(&path) {
            Ok(s) => serde_yaml_ng::from_str::<Option<Vec<Entry>>>(&s)
                .map_err(|e| Error::Catalog(
                        format!("{}: {e}", path.display())))?
                .unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::Catalog(format!("{}: {e}", path.display())));
            }
        };
        Ok(TapeList { path, entries })
    }

    /// Add a freshly labeled tape that holds no data yet.
    ///
    /// It goes at the end of the catalog, so it is the first candidate for
    /// reuse.
    pub fn add_unused(&mut self, label: &str) {
        self.entries.retain(|e| e.label != label);
        self.entries.push(Entry {
            datestamp: UNUSED.to_owned(),
            label: label.to_owned()
        });
    }

    /// Find `label`, returning its position and entry.
    pub fn lookup(&self, label: &str) -> Option<(usize, &Entry)> {
        self.entries.iter()
            .enumerate()
            .find(|(_, e)| e.label == label)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that `label` was just written by the run `datestamp`.
    ///
    /// Every other tape moves back one position.
    pub fn record(&mut self, label: &str, datestamp: &str) {
        self.entries.retain(|e| e.label != label);
        self.entries.insert(0, Entry {
            datestamp: datestamp.to_owned(),
            label: label.to_owned()
        });
    }

    /// Reread the catalog from disk, discarding unsaved changes
    pub fn reload(&mut self) -> Result<()> {
        *self = TapeList::load(&self.path)?;
        Ok(())
    }

    /// Persist the catalog.
    ///
    /// The previous version is kept as `<path>.yesterday`, and the new one is
    /// renamed into place only once completely written.
    pub fn save(&self) -> Result<()> {
        let catalog_err = |e: io::Error| {
            Error::Catalog(format!("{}: {e}", self.path.display()))
        };
        let s = serde_yaml_ng::to_string(&self.entries)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        let tmp = with_suffix(&self.path, ".new");
        fs::write(&tmp, s).map_err(catalog_err)?;
        match fs::rename(&self.path, with_suffix(&self.path, ".yesterday")) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => return Err(catalog_err(e))
        }
        fs::rename(&tmp, &self.path).map_err(catalog_err)?;
        tracing::debug!(path = %self.path.display(), "saved tapelist");
        Ok(())
    }

    /// Construct an in-memory catalog, most recent first
    pub fn with_entries<P: Into<PathBuf>>(path: P, entries: Vec<Entry>) -> Self
    {
        TapeList { path: path.into(), entries }
    }
}
