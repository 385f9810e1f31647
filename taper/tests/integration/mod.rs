// vim: tw=80
use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::Command;
use tempfile::{Builder, TempDir};

mod label;
mod list;
mod run;

pub fn taper() -> Command {
    Command::cargo_bin("taper").unwrap()
}

/// A directory holding a configuration file and a virtual tape drive
pub struct Harness {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl Harness {
    /// Write a configuration for a single drive, plus `extra` settings
    pub fn new(extra: &str) -> Self {
        let dir = Builder::new()
            .prefix("taper_integration_test")
            .tempdir()
            .unwrap();
        fs::create_dir(dir.path().join("vtape")).unwrap();
        let config = dir.path().join("taper.yaml");
        fs::write(&config, format!("tapedev: vtape\n\
                                    labelstr: \"^DAILY-[0-9]+$\"\n\
                                    blocksize: 1024\n\
                                    buffers: 4\n\
                                    {extra}")).unwrap();
        Harness { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
