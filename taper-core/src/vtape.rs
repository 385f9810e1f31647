// vim: tw=80
//! Virtual tapes: directories that behave like tape media

use byteorder::{BigEndian, ByteOrder};
use crate::{
    device::TapeDevice,
    label::{HeaderKind, TapeHeader},
    types::*
};
use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/*
 * Tape Image Format (<dir>/tape):
 *
 * A sequence of records, each:
 *
 * Kind:        1 byte      b'L' label, b'B' block, b'F' filemark,
 *                          b'E' end marker
 * Length:      4 bytes     Big-endian length of Payload
 * Payload:     variable    Empty for filemarks.  Encoded TapeHeader for labels
 *                          and end markers.
 */
const KIND_LABEL: u8 = b'L';
const KIND_BLOCK: u8 = b'B';
const KIND_FILEMARK: u8 = b'F';
const KIND_END: u8 = b'E';
const FRAME_LEN: u64 = 5;

/// Name of the tape image within a virtual tape directory
pub const IMAGE: &str = "tape";

/// One record read back from a virtual tape
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record {
    Label(TapeHeader),
    Block(Vec<u8>),
    Filemark,
    End(TapeHeader),
}

fn no_tape() -> Error {
    Error::tape("tape not open")
}

/// Read one raw record.  Returns `None` at the end of the image.
///
/// The payload buffer only grows as data actually arrives, so a damaged length
/// field can't cause a huge allocation.
fn read_record<R: Read>(r: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut frame = [0u8; FRAME_LEN as usize];
    match r.read_exact(&mut frame) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e)
    }
    let len = u64::from(BigEndian::read_u32(&frame[1..]));
    let mut payload = Vec::new();
    r.take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
            format!("truncated record: {} of {len} bytes", payload.len())));
    }
    Ok(Some((frame[0], payload)))
}

/// Read back the complete contents of the virtual tape at `path`.
pub fn dump(path: &Path) -> Result<Vec<Record>> {
    let f = File::open(path.join(IMAGE))?;
    let mut r = BufReader::new(f);
    let mut records = Vec::new();
    while let Some((kind, payload)) = read_record(&mut r)? {
        let rec = match kind {
            KIND_LABEL => Record::Label(TapeHeader::decode(&payload)?),
            KIND_BLOCK => Record::Block(payload),
            KIND_FILEMARK => Record::Filemark,
            KIND_END => Record::End(TapeHeader::decode(&payload)?),
            k => return Err(Error::tape(format!("bad record kind {k:#04x}")))
        };
        records.push(rec);
    }
    Ok(records)
}

/// A tape drive whose media are directories.
///
/// Writing anywhere but at the end of the recorded data discards whatever
/// followed, just like a real tape.
#[derive(Debug, Default)]
pub struct VTape {
    file: Option<File>,
    /// Directory of the currently open medium
    path: PathBuf,
    /// If set, writes that would grow the image beyond this many bytes fail
    /// with `ENOSPC`.
    capacity: Option<u64>,
    /// Current position within the image
    pos: u64,
}

impl VTape {
    pub fn new(capacity: Option<u64>) -> Self {
        VTape { capacity, ..Default::default() }
    }

    /// The medium most recently opened
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        let f = self.file.as_mut().ok_or_else(no_tape)?;
        let len = FRAME_LEN + payload.len() as u64;
        if let Some(cap) = self.capacity {
            if self.pos + len > cap {
                let e = io::Error::from_raw_os_error(libc::ENOSPC);
                return Err(Error::tape(format!("{}: {e}",
                                               self.path.display())));
            }
        }
        let mut frame = [0u8; FRAME_LEN as usize];
        frame[0] = kind;
        BigEndian::write_u32(&mut frame[1..], payload.len() as u32);
        let r = f.set_len(self.pos)
            .and_then(|_| f.seek(SeekFrom::Start(self.pos)))
            .and_then(|_| f.write_all(&frame))
            .and_then(|_| f.write_all(payload));
        r.map_err(|e| Error::tape(format!("{}: {e}", self.path.display())))?;
        self.pos += len;
        Ok(())
    }
}

impl TapeDevice for VTape {
    fn close(&mut self) -> Result<()> {
        if let Some(f) = self.file.take() {
            f.sync_all()?;
        }
        Ok(())
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(IMAGE))
            .map_err(|e| Error::tape(format!("{}: {e}", path.display())))?;
        self.file = Some(f);
        self.path = path.to_owned();
        self.pos = 0;
        Ok(())
    }

    fn read_label(&mut self) -> Result<TapeHeader> {
        let f = self.file.as_mut().ok_or_else(no_tape)?;
        f.seek(SeekFrom::Start(0))?;
        match read_record(f)? {
            None => Err(Error::Label("blank tape".to_owned())),
            Some((KIND_LABEL, payload)) => {
                let hdr = TapeHeader::decode(&payload)?;
                if hdr.kind != HeaderKind::Start {
                    return Err(Error::Label("not a tape label".to_owned()));
                }
                self.pos = FRAME_LEN + payload.len() as u64;
                Ok(hdr)
            }
            Some(_) => Err(Error::Label("no label record".to_owned()))
        }
    }

    fn rewind(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Err(no_tape());
        }
        self.pos = 0;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.write_record(KIND_BLOCK, block)
    }

    fn write_end_marker(&mut self, label: &str, datestamp: &str) -> Result<()>
    {
        let rec = TapeHeader::end(label, datestamp).encode();
        self.write_record(KIND_END, &rec)
    }

    fn write_filemark(&mut self) -> Result<()> {
        self.write_record(KIND_FILEMARK, &[])
    }

    fn write_label(&mut self, label: &str, datestamp: &str) -> Result<()> {
        self.rewind()?;
        let rec = TapeHeader::start(label, datestamp).encode();
        self.write_record(KIND_LABEL, &rec)
    }
}
