// vim: tw=80
//! The producer side of the pipeline: fills buffers from a data source

use crate::{
    buffer::{BufState, BufferPool},
    channel::{ControlChannel, ReaderMsg, WriterMsg},
    types::*
};
use std::{
    fmt,
    io::{self, SeekFrom},
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite},
};
use tracing::{debug, info, warn};

/// Where a file's data comes from
pub enum Source {
    /// A holding-disk file.  Can be reread after a tape error.
    File(File),
    /// A network connection, or anything else that can only be read once
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl Source {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Source::File(File::open(path).await?))
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(f) => f.read(buf).await,
            Source::Stream(s) => s.read(buf).await,
        }
    }

    /// Go back to the beginning of the data, if possible.
    async fn rewind(&mut self) -> Result<bool> {
        match self {
            Source::File(f) => {
                f.seek(SeekFrom::Start(0)).await?;
                Ok(true)
            }
            Source::Stream(_) => Ok(false)
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(file) => f.debug_tuple("File").field(file).finish(),
            Source::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Transfer statistics for one file
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub elapsed: Duration,
    /// Bytes written to tape, including padding
    pub bytes: u64,
}

impl Stats {
    pub fn kb(&self) -> u64 {
        self.bytes / 1024
    }

    /// Rate in kilobytes per second
    pub fn kps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / 1024.0 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sec {:.3} kb {} kps {:.1}", self.elapsed.as_secs_f64(),
               self.kb(), self.kps())
    }
}

/// How a file transfer ended
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Done { label: String, filenum: u32, stats: Stats },
    /// A tape error that another tape might fix, but the data can't be reread
    TryAgain(String),
    /// The file can't be written
    Failed(String),
}

/// How one attempt at writing a file ended
#[derive(Debug)]
enum Attempt {
    Closed {
        label: String,
        filenum: u32,
        blocks: u64,
        /// An input error or desync that cut the file short
        problem: Option<Error>,
    },
    Retry(String),
    TapeError(String),
}

/// Result of filling one buffer
struct Filled {
    len: usize,
    error: Option<io::Error>,
}

pub struct Reader<S> {
    pool: Arc<BufferPool>,
    chan: ControlChannel<S>,
}

impl<S> Reader<S>
    where S: AsyncRead + AsyncWrite + Unpin
{
    pub fn new(pool: Arc<BufferPool>, chan: ControlChannel<S>) -> Self {
        Reader { pool, chan }
    }

    /// Make one pass over `source`
    async fn attempt(&mut self, desc: &str, source: &mut Source)
        -> Result<Attempt>
    {
        self.pool.reset();
        self.chan.send_to_writer(&ReaderMsg::Open(desc.to_owned())).await?;
        match self.chan.recv_from_writer().await? {
            WriterMsg::OpenAck => (),
            msg => return Err(unexpected(&msg))
        }
        let mut closed = false;
        let mut blocks = 0;
        let mut problem = None;
        loop {
            match self.chan.recv_from_writer().await? {
                WriterMsg::Grant(idx) if closed => {
                    debug!(idx, "ignoring grant after close");
                }
                WriterMsg::Grant(idx) => {
                    let last = match fill(&self.pool, idx, source).await {
                        Ok(filled) => {
                            if filled.len > 0 {
                                self.chan.send_to_writer(&ReaderMsg::Data(idx))
                                    .await?;
                                blocks += 1;
                            }
                            let short = filled.len < self.pool.block_size();
                            if let Some(e) = filled.error {
                                warn!(desc, "input error: {e}");
                                problem = Some(Error::Io(e));
                            }
                            short || problem.is_some()
                        }
                        Err(e) => {
                            problem = Some(e);
                            true
                        }
                    };
                    if last {
                        self.chan.send_to_writer(&ReaderMsg::Close).await?;
                        closed = true;
                    }
                }
                WriterMsg::Closed { label, filenum } if closed => {
                    return Ok(Attempt::Closed {
                        label, filenum, blocks, problem
                    });
                }
                WriterMsg::Retry(reason) => {
                    if !closed {
                        self.chan.send_to_writer(&ReaderMsg::Close).await?;
                    }
                    return Ok(Attempt::Retry(reason));
                }
                WriterMsg::TapeError(reason) => {
                    if !closed {
                        self.chan.send_to_writer(&ReaderMsg::Close).await?;
                    }
                    return Ok(Attempt::TapeError(reason));
                }
                msg => return Err(unexpected(&msg))
            }
        }
    }

    /// End the run.  The writer finishes the current tape.
    pub async fn quit(&mut self) -> Result<()> {
        self.chan.send_to_writer(&ReaderMsg::Quit).await?;
        match self.chan.recv_from_writer().await? {
            WriterMsg::QuitAck => Ok(()),
            msg => Err(unexpected(&msg))
        }
    }

    /// Begin a run.  On failure, returns the reason no tape could be used.
    pub async fn start(&mut self, datestamp: &str)
        -> Result<std::result::Result<(), String>>
    {
        let msg = ReaderMsg::Start(datestamp.to_owned());
        self.chan.send_to_writer(&msg).await?;
        match self.chan.recv_from_writer().await? {
            WriterMsg::TaperOk => Ok(Ok(())),
            WriterMsg::TapeError(reason) => Ok(Err(reason)),
            msg => Err(unexpected(&msg))
        }
    }

    /// Send one file to tape.
    ///
    /// If the writer switches tapes partway through, the file is sent again
    /// from the beginning, provided the source can be reread.  Errors are
    /// returned only for failures of the pipeline itself.
    pub async fn write_file(&mut self, desc: &str, mut source: Source)
        -> Result<Outcome>
    {
        let start = Instant::now();
        loop {
            let outcome = match self.attempt(desc, &mut source).await? {
                Attempt::Closed { problem: Some(Error::Io(e)), .. } => {
                    Outcome::Failed(format!("input error: {e}"))
                }
                Attempt::Closed { problem: Some(e), .. } => {
                    Outcome::Failed(e.to_string())
                }
                Attempt::Closed { label, filenum, blocks, problem: None } => {
                    let bytes = blocks * self.pool.block_size() as u64;
                    let stats = Stats { elapsed: start.elapsed(), bytes };
                    info!(desc, %label, filenum, %stats, "file done");
                    Outcome::Done { label, filenum, stats }
                }
                Attempt::Retry(reason) => {
                    if source.rewind().await? {
                        info!(desc, "retrying on a new tape: {reason}");
                        continue;
                    }
                    Outcome::TryAgain(reason)
                }
                Attempt::TapeError(reason) => Outcome::Failed(reason)
            };
            return Ok(outcome);
        }
    }
}

/// Fill granted buffer `idx` from `source`, zero-padding a short read.
///
/// Only a desync is returned as an error.  Input errors are reported
/// within the `Filled`, along with whatever was read before them.
async fn fill(pool: &BufferPool, idx: BufIdx, source: &mut Source)
    -> Result<Filled>
{
    pool.transition(idx, BufState::Empty, BufState::Filling)?;
    let (len, error) = {
        let mut buf = pool.contents(idx)?;
        let mut len = 0;
        let mut error = None;
        while len < buf.len() {
            match source.read(&mut buf[len..]).await {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        buf[len..].fill(0);
        (len, error)
    };
    let to = if len > 0 { BufState::Full } else { BufState::Empty };
    pool.transition(idx, BufState::Filling, to)?;
    Ok(Filled { len, error })
}

fn unexpected(msg: &WriterMsg) -> Error {
    Error::Channel(format!("unexpected {msg:?} from writer"))
}
