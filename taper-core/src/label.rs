// vim: tw=80
//! Tape headers: the label record at the start of each tape and the end
//! marker after its last file.

use byteorder::{BigEndian, ByteOrder};
use crate::types::*;
use metrohash::MetroHash64;
use serde_derive::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/*
 * Header Record Format:
 *
 * Magic:       16 bytes
 * Checksum:    8 bytes     MetroHash64.  Covers all of Length and Contents.
 * Length:      8 bytes     Length of Contents in bytes
 * Contents:    variable    bincode-encoded TapeHeader
 */
/// The header magic is "TAPER Label\0\0\0\0\0"
const MAGIC: &[u8; MAGIC_LEN] = b"TAPER Label\0\0\0\0\0";
const MAGIC_LEN: usize = 16;
const CHECKSUM_LEN: usize = 8;
const LENGTH_LEN: usize = 8;
const HEADER_LEN: usize = MAGIC_LEN + CHECKSUM_LEN + LENGTH_LEN;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum HeaderKind {
    /// Written once, as the first record of a tape
    Start,
    /// Written after the last file of a run
    End,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TapeHeader {
    pub kind: HeaderKind,
    pub label: String,
    /// The run that wrote this header
    pub datestamp: String,
}

fn checksum(contents: &[u8]) -> u64 {
    let mut hasher = MetroHash64::new();
    (contents.len() as u64).to_be().hash(&mut hasher);
    hasher.write(contents);
    hasher.finish()
}

impl TapeHeader {
    /// Decode a header record read from tape.
    pub fn decode(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_LEN || MAGIC[..] != buffer[0..MAGIC_LEN] {
            return Err(Error::Label("not a taper tape".to_owned()));
        }
        let sum = BigEndian::read_u64(
            &buffer[MAGIC_LEN..MAGIC_LEN + CHECKSUM_LEN]);
        let length_start = MAGIC_LEN + CHECKSUM_LEN;
        let len = BigEndian::read_u64(&buffer[length_start..HEADER_LEN]);
        let contents = usize::try_from(len).ok()
            .and_then(|l| buffer.get(HEADER_LEN..HEADER_LEN + l))
            .ok_or_else(|| Error::Label("truncated label".to_owned()))?;
        if sum != checksum(contents) {
            return Err(Error::Label("label checksum mismatch".to_owned()));
        }
        bincode::deserialize(contents)
            .map_err(|e| Error::Label(format!("undecodable label: {e}")))
    }

    /// Encode this header as a complete record.
    pub fn encode(&self) -> Vec<u8> {
        // bincode can't fail to serialize a struct of strings and enums
        let contents = bincode::serialize(self).unwrap();
        let mut out = vec![0u8; HEADER_LEN];
        out[..MAGIC_LEN].copy_from_slice(&MAGIC[..]);
        BigEndian::write_u64(&mut out[MAGIC_LEN..MAGIC_LEN + CHECKSUM_LEN],
                             checksum(&contents));
        BigEndian::write_u64(&mut out[MAGIC_LEN + CHECKSUM_LEN..],
                             contents.len() as u64);
        out.extend_from_slice(&contents);
        out
    }

    pub fn end(label: &str, datestamp: &str) -> Self {
        TapeHeader {
            kind: HeaderKind::End,
            label: label.to_owned(),
            datestamp: datestamp.to_owned()
        }
    }

    pub fn start(label: &str, datestamp: &str) -> Self {
        TapeHeader {
            kind: HeaderKind::Start,
            label: label.to_owned(),
            datestamp: datestamp.to_owned()
        }
    }
}
