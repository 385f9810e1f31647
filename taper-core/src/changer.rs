// vim: tw=80
//! Interface to an external tape changer program
//!
//! The changer is invoked with one of `-info`, `-slot <slot>`, or `-eject`.
//! The first line of its output has the form
//! `<slot-or-count> <message...>`.  Its exit status is 0 on success, 1 if the
//! requested slot could not be loaded (a per-slot problem, such as an empty
//! slot), and anything else for a fatal changer failure.

use crate::types::*;
#[cfg(test)] use mockall::automock;
use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    str::FromStr,
};

/// How the changer program exited
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotStatus {
    Ok,
    /// The slot could not be used, but other slots may be fine
    SlotError,
    /// The changer itself failed
    Fatal,
}

impl SlotStatus {
    fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => SlotStatus::Ok,
            Some(1) => SlotStatus::SlotError,
            _ => SlotStatus::Fatal
        }
    }
}

/// The parsed first line of a changer's output
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangerReply {
    pub status: SlotStatus,
    /// A slot name, or a count, depending on the command
    pub slot: String,
    /// The rest of the line: a device name, or a message
    pub rest: String,
}

impl ChangerReply {
    /// Parse the changer's output, given its exit status.
    pub fn parse(status: SlotStatus, output: &str) -> Result<Self> {
        let line = output.lines().next().unwrap_or("").trim();
        let (slot, rest) = match line.split_once(char::is_whitespace) {
            Some((slot, rest)) => (slot, rest.trim()),
            None => (line, "")
        };
        if slot.is_empty() {
            return Err(Error::Changer("malformed reply: empty output"
                                      .to_owned()));
        }
        Ok(ChangerReply {
            status,
            slot: slot.to_owned(),
            rest: rest.to_owned()
        })
    }

    /// Convert a non-successful reply into an error
    fn into_result(self) -> Result<Self> {
        match self.status {
            SlotStatus::Ok => Ok(self),
            _ => Err(Error::Changer(format!("slot {}: {}", self.slot,
                                            self.rest)))
        }
    }
}

/// Reply to `-info`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangerInfo {
    /// Slot currently loaded
    pub current: String,
    pub nslots: usize,
    /// Can the changer go backwards through its slots, or only forwards?
    pub can_reverse: bool,
}

impl FromStr for ChangerInfo {
    type Err = Error;

    /// Parse the first line of an `-info` reply:
    /// `<current> <nslots> <reverse> [searchable]`
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || {
            Error::Changer(format!("malformed -info reply: {s}"))
        };
        let mut words = s.split_whitespace();
        let current = words.next().ok_or_else(malformed)?.to_owned();
        let nslots = words.next()
            .and_then(|w| w.parse::<usize>().ok())
            .ok_or_else(malformed)?;
        let can_reverse = match words.next() {
            Some("1") => true,
            Some("0") | None => false,
            Some(_) => return Err(malformed())
        };
        Ok(ChangerInfo { current, nslots, can_reverse })
    }
}

/// A tape that the changer has just loaded
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Loaded {
    pub slot: String,
    pub device: PathBuf,
}

/// Something that can execute changer commands
#[cfg_attr(test, automock)]
pub trait ChangerCommand: Send {
    fn execute(&mut self, args: &[String]) -> Result<ChangerReply>;
}

/// Runs an external changer program
#[derive(Clone, Debug)]
pub struct ExternalCommand {
    program: PathBuf,
    /// Passed to the program as `CHANGER_DEV`
    changerdev: Option<String>,
    /// The program runs in this directory
    workdir: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        ExternalCommand {
            program: program.into(),
            changerdev: None,
            workdir: None
        }
    }

    pub fn changerdev(mut self, dev: Option<String>) -> Self {
        self.changerdev = dev;
        self
    }

    pub fn workdir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.workdir = Some(dir.as_ref().to_owned());
        self
    }
}

impl ChangerCommand for ExternalCommand {
    fn execute(&mut self, args: &[String]) -> Result<ChangerReply> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdin(Stdio::null()).stderr(Stdio::inherit());
        if let Some(dev) = &self.changerdev {
            cmd.env("CHANGER_DEV", dev);
        }
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        tracing::debug!(program = %self.program.display(), ?args,
                        "running changer");
        let out = cmd.output()
            .map_err(|e| Error::Changer(format!("{}: {e}",
                                                self.program.display())))?;
        let status = SlotStatus::from_code(out.status.code());
        let stdout = String::from_utf8_lossy(&out.stdout);
        let reply = ChangerReply::parse(status, &stdout)?;
        tracing::debug!(?reply, "changer replied");
        Ok(reply)
    }
}

/// A tape changer
#[derive(Debug)]
pub struct Changer<C = ExternalCommand> {
    cmd: C,
}

impl<C: ChangerCommand> Changer<C> {
    pub fn new(cmd: C) -> Self {
        Changer { cmd }
    }

    /// Eject the loaded tape back into its slot
    pub fn eject(&mut self) -> Result<()> {
        self.run(&["-eject"])?.into_result().map(drop)
    }

    /// Visit the changer's slots, starting with the current one.
    ///
    /// `on_init` is called first with the number of slots and whether the
    /// changer can go backwards.  Then `on_slot` is called once per slot with
    /// the load status, the slot name, and either the device name or an
    /// error message.  Per-slot failures do not stop the iteration, but
    /// `on_slot` may stop it by returning `Break`.
    pub fn find<F, G>(&mut self, on_init: F, mut on_slot: G) -> Result<()>
        where F: FnOnce(usize, bool),
              G: FnMut(SlotStatus, &str, &str) -> ControlFlow<()>
    {
        let info = self.info()?;
        on_init(info.nslots, info.can_reverse);
        let mut which = "current";
        for _ in 0..info.nslots {
            let flow = match self.load(which) {
                Ok(r) => on_slot(r.status, &r.slot, &r.rest),
                Err(e) => on_slot(SlotStatus::Fatal, which, &e.to_string())
            };
            if flow.is_break() {
                break;
            }
            which = "next";
        }
        Ok(())
    }

    pub fn info(&mut self) -> Result<ChangerInfo> {
        let r = self.run(&["-info"])?.into_result()?;
        format!("{} {}", r.slot, r.rest).parse()
    }

    /// Ask the changer to load `slot`.  The reply is returned even if the
    /// changer failed, so the caller can judge the severity.
    pub fn load(&mut self, slot: &str) -> Result<ChangerReply> {
        self.run(&["-slot", slot])
    }

    /// Load `slot`, failing unless the changer succeeded
    pub fn load_device(&mut self, slot: &str) -> Result<Loaded> {
        let r = self.load(slot)?.into_result()?;
        Ok(Loaded { slot: r.slot, device: PathBuf::from(r.rest) })
    }

    fn run(&mut self, args: &[&str]) -> Result<ChangerReply> {
        let args = args.iter()
            .map(|a| (*a).to_owned())
            .collect::<Vec<_>>();
        self.cmd.execute(&args)
    }
}
