// vim: tw=80
//! Tape lifecycle: mount, label, write, and finish tapes

use crate::{
    changer::{Changer, ChangerCommand, ExternalCommand},
    device::TapeDevice,
    policy::LabelPolicy,
    scan::taper_scan,
    tapelist::TapeList,
    types::*
};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Datestamp written on tapes labeled outside of any run
const LABEL_DATESTAMP: &str = "X";

/// One mounted, labeled tape
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TapeSession {
    pub label: String,
    pub datestamp: String,
    /// Where the tape was mounted
    pub device: PathBuf,
    /// Data bytes written, excluding labels and filemarks
    pub bytes: u64,
    pub filemarks: u32,
    /// Number of the file currently being written.  The label is file 0.
    pub filenum: u32,
}

fn no_session() -> Error {
    Error::tape("no tape is mounted")
}

/// Owns the tape device and the tape catalog.
///
/// At most one [`TapeSession`] exists at a time.  A new one is created only by
/// labeling a tape, and only after the previous one has been ended.
pub struct TapeManager<D, C = ExternalCommand> {
    device: D,
    changer: Option<Changer<C>>,
    catalog: TapeList,
    policy: LabelPolicy,
    /// Drive to use when there is no changer
    tapedev: Option<PathBuf>,
    /// Maximum number of tapes per run
    runtapes: usize,
    /// Number of tapes labeled during this run
    tapes_used: usize,
    datestamp: String,
    session: Option<TapeSession>,
}

impl<D: TapeDevice> TapeManager<D> {
    pub fn new(device: D, catalog: TapeList, policy: LabelPolicy) -> Self {
        TapeManager {
            device,
            changer: None,
            catalog,
            policy,
            tapedev: None,
            runtapes: 1,
            tapes_used: 0,
            datestamp: String::new(),
            session: None,
        }
    }
}

impl<D: TapeDevice, C: ChangerCommand> TapeManager<D, C> {
    /// Find tapes with this changer instead of using a fixed drive
    pub fn changer<C2>(self, changer: Changer<C2>) -> TapeManager<D, C2> {
        TapeManager {
            device: self.device,
            changer: Some(changer),
            catalog: self.catalog,
            policy: self.policy,
            tapedev: self.tapedev,
            runtapes: self.runtapes,
            tapes_used: self.tapes_used,
            datestamp: self.datestamp,
            session: self.session,
        }
    }

    pub fn catalog(&self) -> &TapeList {
        &self.catalog
    }

    /// Finish the current tape.
    ///
    /// Unless the tape suffered a write error, its data is terminated with a
    /// filemark and an end marker.  Either way it is rewound and closed, and
    /// a changer puts it back in its slot.  Ending when no tape is mounted is a
    /// no-op.
    #[instrument(skip(self))]
    pub fn end_tape(&mut self, had_write_error: bool) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let r = if had_write_error {
            Ok(())
        } else {
            self.device.write_filemark()
                .and_then(|_| self.device.write_end_marker(&session.label,
                                                           &session.datestamp))
        };
        let rewound = self.device.rewind();
        let closed = self.device.close();
        if let Some(changer) = &mut self.changer {
            if let Err(e) = changer.eject() {
                warn!(label = %session.label, "ejecting tape: {e}");
            }
        }
        info!(label = %session.label, bytes = session.bytes,
              filemarks = session.filemarks, "ended tape");
        r.and(rewound).and(closed)
    }

    /// Begin a run: reload the catalog and label the first tape.
    #[instrument(skip(self))]
    pub fn first_tape(&mut self, datestamp: &str) -> Result<()> {
        self.end_tape(false)?;
        self.datestamp = datestamp.to_owned();
        self.tapes_used = 0;
        self.catalog.reload()?;
        self.label_tape()
    }

    /// Mount a tape, decide whether it may be overwritten, and label it.
    pub fn label_tape(&mut self) -> Result<()> {
        let (path, old) = self.locate()?;
        let label = match old {
            Some(label) => {
                self.policy.check(&label, &self.catalog)?;
                label
            }
            None => self.policy.new_label(&self.catalog)?
        };
        self.device.open(&path)?;
        let r = self.device.write_label(&label, &self.datestamp)
            .and_then(|_| {
                self.catalog.record(&label, &self.datestamp);
                self.catalog.save()
            });
        if let Err(e) = r {
            self.close_quietly();
            return Err(e);
        }
        self.tapes_used += 1;
        info!(%label, device = %path.display(), tape = self.tapes_used,
              "labeled tape");
        self.session = Some(TapeSession {
            label,
            datestamp: self.datestamp.clone(),
            device: path,
            bytes: 0,
            filemarks: 0,
            filenum: 0,
        });
        Ok(())
    }

    /// Find a tape, and read its current label.  A tape with no readable
    /// label is reported as `None`.
    fn locate(&mut self) -> Result<(PathBuf, Option<String>)> {
        if let Some(changer) = &mut self.changer {
            let found = taper_scan(changer, &mut self.device, &self.catalog,
                                   &self.policy)?;
            return Ok((found.device, found.label));
        }
        let path = self.drive()?.to_owned();
        self.device.open(&path)?;
        let r = self.device.read_label();
        self.device.close()?;
        match r {
            Ok(hdr) => Ok((path, Some(hdr.label))),
            Err(e) => {
                info!(device = %path.display(), "{e}");
                Ok((path, None))
            }
        }
    }

    fn close_quietly(&mut self) {
        if let Err(e) = self.device.close() {
            warn!("closing tape: {e}");
        }
    }

    /// End the current tape and label another one, if the run may use more
    /// tapes.
    ///
    /// Failure to end the old tape is logged but doesn't prevent moving on.
    #[instrument(skip(self))]
    pub fn next_tape(&mut self, had_write_error: bool) -> Result<()> {
        if let Err(e) = self.end_tape(had_write_error) {
            warn!("ending tape: {e}");
        }
        if self.tapes_used >= self.runtapes {
            return Err(Error::NoTape(format!(
                "runtapes exhausted after {} tape(s)", self.tapes_used)));
        }
        self.label_tape()
    }

    /// Write a new label on whatever tape is loaded now, outside of any run.
    ///
    /// The tape is added to the catalog as unused.  Unless `force` is set,
    /// this refuses to destroy an active tape, to reuse a label that is
    /// already in the catalog, or to write a label that doesn't match
    /// labelstr.
    #[instrument(skip(self))]
    pub fn relabel(&mut self, label: &str, force: bool) -> Result<()> {
        self.end_tape(false)?;
        self.catalog.reload()?;
        if !force {
            self.policy.require_match(label)?;
        }
        let path = match &mut self.changer {
            Some(changer) => changer.load_device("current")?.device,
            None => self.drive()?.to_owned()
        };
        self.device.open(&path)?;
        let old = self.device.read_label().ok().map(|hdr| hdr.label);
        if !force {
            let refusal = if let Some(old) = old.as_deref()
                .filter(|o| self.catalog.is_active(o, self.policy.tapecycle()))
            {
                Some(format!("cannot overwrite active tape {old}"))
            } else if old.as_deref() != Some(label) &&
                self.catalog.lookup(label).is_some()
            {
                Some(format!("label {label} is already in the tapelist"))
            } else {
                None
            };
            if let Some(reason) = refusal {
                self.close_quietly();
                return Err(Error::Label(reason));
            }
        }
        let r = self.device.write_label(label, LABEL_DATESTAMP)
            .and_then(|_| self.device.close());
        if let Err(e) = r {
            self.close_quietly();
            return Err(e);
        }
        if let Some(old) = old.filter(|o| o != label) {
            info!("overwrote label {old}");
        }
        self.catalog.add_unused(label);
        self.catalog.save()?;
        info!(%label, device = %path.display(), "labeled tape");
        Ok(())
    }

    /// Limit the number of tapes a run may use
    pub fn runtapes(mut self, runtapes: usize) -> Self {
        self.runtapes = runtapes;
        self
    }

    /// The currently mounted tape, if any
    pub fn session(&self) -> Option<&TapeSession> {
        self.session.as_ref()
    }

    /// Start a new file on the current tape.  Returns its file number.
    pub fn start_file(&mut self) -> Result<u32> {
        self.write_filemark()?;
        let session = self.session.as_mut().ok_or_else(no_session)?;
        session.filenum += 1;
        Ok(session.filenum)
    }

    /// Use this drive when there is no changer
    pub fn tapedev<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.tapedev = Some(path.as_ref().to_owned());
        self
    }

    fn drive(&self) -> Result<&Path> {
        self.tapedev.as_deref()
            .ok_or_else(|| Error::Config("neither tapedev nor tpchanger is set"
                                         .to_owned()))
    }

    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        self.device.write_block(block)?;
        session.bytes += block.len() as u64;
        Ok(())
    }

    pub fn write_filemark(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        self.device.write_filemark()?;
        session.filemarks += 1;
        Ok(())
    }
}
