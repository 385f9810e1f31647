// vim: tw=80
//! The command dispatcher
//!
//! Reads the driver's commands one line at a time and hands each file to the
//! reader.  Files are written strictly one after another, so at most one
//! transfer is ever in flight.

use crate::{
    buffer::BufferPool,
    changer::ChangerCommand,
    channel,
    command::{Command, Reply},
    config::Config,
    device::TapeDevice,
    reader::{Outcome, Reader, Source},
    tape_manager::TapeManager,
    types::*,
    writer::Writer,
};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{
        AsyncBufRead,
        AsyncBufReadExt,
        AsyncWrite,
        AsyncWriteExt,
        DuplexStream
    },
    net::TcpListener,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

async fn send<W>(output: &mut W, reply: &Reply) -> Result<()>
    where W: AsyncWrite + Unpin
{
    debug!(%reply, "reply");
    output.write_all(format!("{reply}\n").as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

fn tape_error(handle: String, reason: String) -> Reply {
    Reply::TapeError { handle: Some(handle), reason }
}

pub struct Taper {
    pool: Arc<BufferPool>,
    reader: Reader<DuplexStream>,
    writer: JoinHandle<Result<()>>,
    port_timeout: Duration,
    listen_address: IpAddr,
}

impl Taper {
    /// Start the writer task.  Must be called within a tokio runtime.
    pub fn new<D, C>(pool: BufferPool, tapes: TapeManager<D, C>) -> Self
        where D: TapeDevice + 'static,
              C: ChangerCommand + 'static
    {
        let pool = Arc::new(pool);
        let (rchan, wchan) = channel::pair();
        let writer = Writer::new(pool.clone(), wchan, tapes);
        let writer = tokio::spawn(async move {
            writer.run().await.map(drop)
        });
        let reader = Reader::new(pool.clone(), rchan);
        Taper {
            pool,
            reader,
            writer,
            port_timeout: Duration::from_secs(300),
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let pool = BufferPool::alloc(config.buffers, config.blocksize);
        let taper = Taper::new(pool, config.tape_manager()?)
            .port_timeout(config.port_timeout())
            .listen_address(config.listen_address);
        Ok(taper)
    }

    /// Tell the writer to finish its tape, and wait for it to exit.
    async fn finish(self) -> Result<()> {
        let Taper { mut reader, writer, .. } = self;
        let r = reader.quit().await;
        // Closes the channel, in case the writer didn't get the message
        drop(reader);
        let w = writer.await
            .map_err(|e| Error::Channel(format!("writer task: {e}")))?;
        w.and(r)
    }

    async fn file_write(&mut self, handle: String, path: &Path, desc: &str)
        -> Result<Reply>
    {
        match Source::open(path).await {
            Ok(source) => self.write(handle, desc, source).await,
            Err(e) => {
                warn!(%handle, path = %path.display(), "can't open: {e}");
                let reason = format!("input error: {}: {e}", path.display());
                Ok(tape_error(handle, reason))
            }
        }
    }

    pub fn listen_address(mut self, addr: IpAddr) -> Self {
        self.listen_address = addr;
        self
    }

    /// The buffer pool shared by the reader and the writer
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    async fn port_write<W>(&mut self, handle: String, desc: &str,
                           output: &mut W) -> Result<Reply>
        where W: AsyncWrite + Unpin
    {
        let listener = match TcpListener::bind((self.listen_address, 0)).await
        {
            Ok(listener) => listener,
            Err(e) => return Ok(tape_error(handle, format!("listen: {e}")))
        };
        let port = listener.local_addr()?.port();
        send(output, &Reply::Port(port)).await?;
        match timeout(self.port_timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!(%handle, %peer, "accepted data connection");
                let source = Source::Stream(Box::new(stream));
                self.write(handle, desc, source).await
            }
            Ok(Err(e)) => Ok(tape_error(handle, format!("accept: {e}"))),
            Err(_) => {
                warn!(%handle, port, "no data connection");
                let reason = format!("no data connection after {:?}",
                                     self.port_timeout);
                Ok(tape_error(handle, reason))
            }
        }
    }

    pub fn port_timeout(mut self, t: Duration) -> Self {
        self.port_timeout = t;
        self
    }

    /// Process commands from `input` until `QUIT` or end of input, writing
    /// reply lines to `output`.
    ///
    /// Returns an error if the run couldn't start, or if the pipeline itself
    /// failed.  Failures of individual files are only reported on `output`.
    pub async fn serve<R, W>(mut self, input: R, output: &mut W) -> Result<()>
        where R: AsyncBufRead + Unpin,
              W: AsyncWrite + Unpin
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            debug!(%line, "command");
            let reply = match Command::try_from(line.as_str()) {
                Ok(Command::StartTaper { datestamp }) => {
                    match self.reader.start(&datestamp).await? {
                        Ok(()) => Reply::TaperOk,
                        Err(reason) => {
                            error!(%datestamp, "can't start run: {reason}");
                            let reply = Reply::TapeError {
                                handle: None,
                                reason: reason.clone()
                            };
                            send(output, &reply).await?;
                            self.finish().await?;
                            return Err(Error::NoTape(reason));
                        }
                    }
                }
                Ok(Command::FileWrite { handle, path, host, disk, level }) => {
                    let desc = format!("{host}:{disk}.{level}");
                    self.file_write(handle, &path, &desc).await?
                }
                Ok(Command::PortWrite { handle, host, disk, level }) => {
                    let desc = format!("{host}:{disk}.{level}");
                    self.port_write(handle, &desc, output).await?
                }
                Ok(Command::Quit) => {
                    self.finish().await?;
                    return send(output, &Reply::Quitting).await;
                }
                Err(Error::Command(handle)) => {
                    warn!(%line, "bad command");
                    Reply::BadCommand(handle)
                }
                Err(e) => return Err(e)
            };
            send(output, &reply).await?;
        }
        info!("end of input");
        self.finish().await
    }

    async fn write(&mut self, handle: String, desc: &str, source: Source)
        -> Result<Reply>
    {
        let reply = match self.reader.write_file(desc, source).await? {
            Outcome::Done { label, filenum, stats } => {
                Reply::Done { handle, label, filenum, stats }
            }
            Outcome::TryAgain(reason) => Reply::TryAgain { handle, reason },
            Outcome::Failed(reason) => {
                error!(%handle, desc, "{reason}");
                tape_error(handle, reason)
            }
        };
        Ok(reply)
    }
}
