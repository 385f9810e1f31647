// vim: tw=80

// I use a common pattern to substitute mock objects for real ones in test
// builds.  Silence clippy's complaints.
#![allow(clippy::module_inception)]

pub mod buffer;
pub mod changer;
pub mod channel;
pub mod command;
pub mod config;
pub mod device;
pub mod label;
pub mod policy;
pub mod reader;
pub mod scan;
pub mod tape_manager;
pub mod taper;
pub mod tapelist;
pub mod types;
pub mod vtape;
pub mod writer;

pub use crate::types::*;
