// vim: tw=80
//! Taper configuration file

use crate::{
    changer::{Changer, ExternalCommand},
    policy::LabelPolicy,
    tape_manager::TapeManager,
    tapelist::TapeList,
    types::*,
    vtape::VTape,
};
use serde_derive::Deserialize;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::Duration,
};

fn default_blocksize() -> usize { 32768 }
fn default_buffers() -> usize { 20 }
fn default_labelstr() -> String { ".*".to_owned() }
fn default_listen_address() -> IpAddr { IpAddr::V4(Ipv4Addr::LOCALHOST) }
fn default_port_timeout() -> u64 { 300 }
fn default_tapelist() -> PathBuf { PathBuf::from("tapelist") }
fn one() -> usize { 1 }

const NO_DRIVE: &str = "one of tapedev or tpchanger is required";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tape drive, used when there is no changer
    #[serde(default)]
    pub tapedev: Option<PathBuf>,
    /// Changer program
    #[serde(default)]
    pub tpchanger: Option<PathBuf>,
    /// Passed to the changer program
    #[serde(default)]
    pub changerdev: Option<String>,
    #[serde(default = "default_labelstr")]
    pub labelstr: String,
    #[serde(default)]
    pub autolabel: Option<String>,
    #[serde(default = "one")]
    pub tapecycle: usize,
    #[serde(default = "one")]
    pub runtapes: usize,
    #[serde(default = "default_tapelist")]
    pub tapelist: PathBuf,
    #[serde(default = "default_blocksize")]
    pub blocksize: usize,
    #[serde(default = "default_buffers")]
    pub buffers: usize,
    /// Capacity of each virtual tape, in bytes
    #[serde(default)]
    pub tape_length: Option<u64>,
    /// Seconds to wait for a `PORT-WRITE` connection
    #[serde(default = "default_port_timeout")]
    pub port_timeout: u64,
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,
    /// Directory containing the configuration file
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Config {
    /// Read and validate the configuration file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let dir = path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Config::parse(&s, dir)
    }

    /// Parse and validate configuration text.  Relative paths within it are
    /// relative to `dir`.
    pub fn parse(s: &str, dir: &Path) -> Result<Self> {
        let mut config: Config = serde_yaml_ng::from_str(s)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.dir = dir.to_owned();
        config.tapedev = config.tapedev.map(|p| dir.join(p));
        config.tpchanger = config.tpchanger.map(|p| dir.join(p));
        config.tapelist = dir.join(&config.tapelist);
        config.validate()?;
        Ok(config)
    }

    pub fn policy(&self) -> Result<LabelPolicy> {
        LabelPolicy::new(&self.labelstr, self.tapecycle, self.autolabel.clone())
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_secs(self.port_timeout)
    }

    /// Build a tape manager for the configured drive or changer
    pub fn tape_manager(&self) -> Result<TapeManager<VTape>> {
        let catalog = TapeList::load(&self.tapelist)?;
        let tm = TapeManager::new(VTape::new(self.tape_length), catalog,
                                  self.policy()?)
            .runtapes(self.runtapes);
        match (&self.tpchanger, &self.tapedev) {
            (Some(program), _) => {
                let cmd = ExternalCommand::new(program)
                    .changerdev(self.changerdev.clone())
                    .workdir(&self.dir);
                Ok(tm.changer(Changer::new(cmd)))
            }
            (None, Some(tapedev)) => Ok(tm.tapedev(tapedev)),
            (None, None) => Err(Error::Config(NO_DRIVE.to_owned()))
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |s: &str| Err(Error::Config(s.to_owned()));
        if self.tapedev.is_none() && self.tpchanger.is_none() {
            return invalid(NO_DRIVE);
        }
        if self.blocksize == 0 {
            return invalid("blocksize must be positive");
        }
        if self.buffers < 2 {
            return invalid("at least 2 buffers are required");
        }
        if self.runtapes == 0 {
            return invalid("runtapes must be at least 1");
        }
        self.policy().map(drop)
    }
}
