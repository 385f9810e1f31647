// vim: tw=80
//! The consumer side of the pipeline: writes full buffers to tape
//!
//! Tape drives are slow to start and stop, so the writer batches.  In the
//! STOPPED mode it only counts `DATA` messages, until all but one buffer are
//! full or the file is closed.  Then it drains every full buffer in ring order.
//! After draining it keeps streaming as long as the next buffer in ring order
//! is already full, even if its `DATA` message hasn't arrived yet; such
//! buffers are counted as "ahead" and their messages are discarded on arrival.
//!
//! Any tape error ends the file.  The writer moves on to the next tape if the
//! run allows one, and the reader must then resend the whole file.
//!
//! Tape and changer primitives are synchronous, so every tape operation runs
//! on tokio's blocking thread pool.  The reader keeps filling buffers while
//! the drive is busy.

use crate::{
    buffer::{BufState, BufferPool},
    changer::{ChangerCommand, ExternalCommand},
    channel::{ControlChannel, ReaderMsg, WriterMsg},
    device::TapeDevice,
    tape_manager::TapeManager,
    types::*
};
use std::{panic, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task,
};
use tracing::{debug, error, info, warn};

/// Per-file flow control state
#[derive(Debug)]
struct Flow {
    /// Next buffer to write
    next: BufIdx,
    /// Index expected in the next `DATA` message
    expect: BufIdx,
    /// Buffers announced by `DATA` but not yet written
    full: usize,
    /// Buffers written before their `DATA` message arrived
    ahead: usize,
    /// Has the reader sent `CLOSE`?
    closed: bool,
    /// Blocks written for this file
    blocks: u64,
}

impl Flow {
    fn new() -> Self {
        Flow { next: 0, expect: 0, full: 0, ahead: 0, closed: false, blocks: 0 }
    }
}

pub struct Writer<D, S, C = ExternalCommand> {
    pool: Arc<BufferPool>,
    chan: ControlChannel<S>,
    /// Lent to the blocking thread pool during each tape operation
    tapes: Option<TapeManager<D, C>>,
}

impl<D, S, C> Writer<D, S, C>
    where D: TapeDevice + 'static,
          S: AsyncRead + AsyncWrite + Unpin,
          C: ChangerCommand + 'static
{
    pub fn new(pool: Arc<BufferPool>, chan: ControlChannel<S>,
               tapes: TapeManager<D, C>) -> Self
    {
        Writer { pool, chan, tapes: Some(tapes) }
    }

    /// Run a tape operation on the blocking thread pool
    async fn blocking<F, T>(&mut self, f: F) -> Result<T>
        where F: FnOnce(&mut TapeManager<D, C>) -> Result<T> + Send + 'static,
              T: Send + 'static
    {
        let mut tapes = self.tapes.take().ok_or_else(lost)?;
        let (tapes, r) = task::spawn_blocking(move || {
            let r = f(&mut tapes);
            (tapes, r)
        }).await
        .map_err(|e| match e.try_into_panic() {
            Ok(payload) => panic::resume_unwind(payload),
            Err(e) => Error::tape(format!("tape operation: {e}"))
        })?;
        self.tapes = Some(tapes);
        r
    }

    /// Discard messages until the reader closes the file
    async fn drain(&mut self) -> Result<()> {
        loop {
            match self.chan.recv_from_reader().await? {
                ReaderMsg::Data(idx) => debug!(idx, "discarding"),
                ReaderMsg::Close => return Ok(()),
                msg => return Err(unexpected(&msg))
            }
        }
    }

    /// Receive one message while a file is open, and account for it
    async fn receive(&mut self, flow: &mut Flow) -> Result<()> {
        match self.chan.recv_from_reader().await? {
            ReaderMsg::Data(idx) => {
                if idx != flow.expect {
                    error!(idx, expected = flow.expect, "DATA out of order");
                    return Err(Error::Desync);
                }
                flow.expect = self.pool.next(idx);
                if flow.ahead > 0 {
                    flow.ahead -= 1;
                } else {
                    flow.full += 1;
                }
                Ok(())
            }
            ReaderMsg::Close => {
                flow.closed = true;
                Ok(())
            }
            msg => Err(unexpected(&msg))
        }
    }

    /// Serve the reader until it says to quit.  Returns the tape manager.
    pub async fn run(mut self) -> Result<TapeManager<D, C>> {
        loop {
            match self.chan.recv_from_reader().await? {
                ReaderMsg::Start(datestamp) => {
                    let r = self.blocking(move |tapes| {
                        tapes.first_tape(&datestamp)
                    }).await;
                    let reply = match r {
                        Ok(()) => WriterMsg::TaperOk,
                        Err(e) => {
                            error!("starting run: {e}");
                            WriterMsg::TapeError(e.to_string())
                        }
                    };
                    self.chan.send_to_reader(&reply).await?;
                }
                ReaderMsg::Open(desc) => self.write_file(&desc).await?,
                ReaderMsg::Quit => {
                    let r = self.blocking(|tapes| tapes.end_tape(false)).await;
                    if let Err(e) = r {
                        error!("ending tape: {e}");
                    }
                    self.chan.send_to_reader(&WriterMsg::QuitAck).await?;
                    return self.tapes.take().ok_or_else(lost);
                }
                msg => return Err(unexpected(&msg))
            }
        }
    }

    /// Run the flow control state machine until the file is closed and every
    /// full buffer has been written.
    async fn stream(&mut self, flow: &mut Flow) -> Result<()> {
        let n = self.pool.len();
        self.blocking(|tapes| tapes.start_file()).await?;
        loop {
            // STOPPED
            while !flow.closed && flow.full < n - 1 {
                self.receive(flow).await?;
            }
            // DRAINING-FULL
            while flow.full > 0 {
                self.write_next(flow).await?;
                flow.full -= 1;
            }
            if flow.closed {
                return Ok(());
            }
            // STREAMING
            while self.pool.state(flow.next) == BufState::Full {
                self.write_next(flow).await?;
                flow.ahead += 1;
            }
        }
    }

    /// Handle one file, from `OPEN` to `CLOSE`
    async fn write_file(&mut self, desc: &str) -> Result<()> {
        self.chan.send_to_reader(&WriterMsg::OpenAck).await?;
        if self.tapes()?.session().is_none() {
            warn!(desc, "no tape for file");
            let reason = "no tape is mounted".to_owned();
            self.chan.send_to_reader(&WriterMsg::TapeError(reason)).await?;
            return self.drain().await;
        }
        for idx in 0..self.pool.len() {
            self.chan.send_to_reader(&WriterMsg::Grant(idx)).await?;
        }
        let mut flow = Flow::new();
        let reply = match self.stream(&mut flow).await {
            Ok(()) => {
                let session = self.tapes()?.session()
                    .ok_or_else(|| Error::tape("no tape is mounted"))?;
                info!(desc, label = %session.label, filenum = session.filenum,
                      blocks = flow.blocks, "wrote file");
                WriterMsg::Closed {
                    label: session.label.clone(),
                    filenum: session.filenum
                }
            }
            Err(e @ Error::Channel(_)) => return Err(e),
            Err(Error::Desync) => {
                error!(desc, "{}", Error::Desync);
                WriterMsg::TapeError(Error::Desync.to_string())
            }
            Err(e) => {
                warn!(desc, "tape error: {e}");
                match self.blocking(|tapes| tapes.next_tape(true)).await {
                    Ok(()) => WriterMsg::Retry(e.to_string()),
                    Err(e2) => {
                        error!("no replacement tape: {e2}");
                        WriterMsg::TapeError(format!("{e}; {e2}"))
                    }
                }
            }
        };
        let failed = !matches!(reply, WriterMsg::Closed{..});
        self.chan.send_to_reader(&reply).await?;
        if failed && !flow.closed {
            self.drain().await?;
        }
        Ok(())
    }

    /// Write the next buffer in ring order, and grant it back to the reader.
    async fn write_next(&mut self, flow: &mut Flow) -> Result<()> {
        let idx = flow.next;
        if self.pool.state(idx) != BufState::Full {
            error!(idx, state = ?self.pool.state(idx), "writing a buffer that \
                   isn't full");
            return Err(Error::Desync);
        }
        let pool = self.pool.clone();
        self.blocking(move |tapes| {
            let data = pool.contents(idx)?;
            tapes.write_block(&data)
        }).await?;
        self.pool.transition(idx, BufState::Full, BufState::Empty)?;
        flow.next = self.pool.next(idx);
        flow.blocks += 1;
        self.chan.send_to_reader(&WriterMsg::Grant(idx)).await
    }

    fn tapes(&self) -> Result<&TapeManager<D, C>> {
        self.tapes.as_ref().ok_or_else(lost)
    }
}

fn lost() -> Error {
    Error::tape("tape manager was lost by a failed tape operation")
}

fn unexpected(msg: &ReaderMsg) -> Error {
    Error::Channel(format!("unexpected {msg:?} from reader"))
}
