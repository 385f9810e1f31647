// vim: tw=80
//! The control channel between the reader and the writer
//!
//! On the wire, every message is a single-byte token, optionally followed by
//! big-endian 32-bit integers and length-prefixed strings.  A string whose
//! length prefix is zero or negative carries no data.
//!
//! Short reads and writes are retried until satisfied.  Any other stream
//! failure is fatal to the calling worker; the peer sees it as the stream
//! closing.

use crate::types::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use tokio::io::{
    AsyncRead,
    AsyncReadExt,
    AsyncWrite,
    AsyncWriteExt,
    DuplexStream,
    duplex
};

/// Capacity of each direction of an in-process channel.  Far larger than the
/// most that can ever be in flight: one token per buffer plus a few strings.
const PIPE_SIZE: usize = 64 * 1024;

/// Longest string we are willing to receive
const MAX_STRING: i32 = 64 * 1024;

/// Single-byte tokens.  Some are used in both directions with different
/// meanings.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Token {
    /// Both directions: begin a file, and its acknowledgement
    Open = b'O',
    /// Reader to writer: a buffer is full
    Data = b'D',
    /// Writer to reader: a buffer may be filled
    Grant = b'G',
    /// Both directions: end of file, and its acknowledgement
    Close = b'C',
    /// Writer to reader: the tape failed but another is mounted
    Retry = b'R',
    /// Writer to reader: the tape failed permanently
    TapeError = b'E',
    /// Reader to writer: mount the first tape
    Start = b'S',
    /// Writer to reader: the first tape is ready
    TaperOk = b'T',
    /// Both directions: shut down, and its acknowledgement
    Quit = b'Q',
}

/// Messages sent by the reader
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReaderMsg {
    /// Mount and label the first tape, using this datestamp.
    Start(String),
    /// A new file begins.  The description is used only for logging.
    Open(String),
    /// The buffer is `FULL`
    Data(BufIdx),
    /// No more `Data` will follow for the current file
    Close,
    Quit,
}

/// Messages sent by the writer
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriterMsg {
    TaperOk,
    /// The tape failed and no replacement is available
    TapeError(String),
    OpenAck,
    /// The buffer is `EMPTY` and may be filled
    Grant(BufIdx),
    /// The tape failed, but a fresh one is now mounted.  Start over.
    Retry(String),
    /// The file is complete on the tape with this label, at this file number
    Closed { label: String, filenum: u32 },
    QuitAck,
}

/// One end of a control channel, over any byte stream.
#[derive(Debug)]
pub struct ControlChannel<S> {
    stream: S,
}

/// Create a connected pair of in-process channels.  The first end is for the
/// reader, the second for the writer.
pub fn pair() -> (ControlChannel<DuplexStream>, ControlChannel<DuplexStream>) {
    let (a, b) = duplex(PIPE_SIZE);
    (ControlChannel::new(a), ControlChannel::new(b))
}

fn channel_err(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Channel("peer closed the stream".to_owned())
    } else {
        Error::Channel(e.to_string())
    }
}

impl<S> ControlChannel<S>
    where S: AsyncRead + AsyncWrite + Unpin
{
    pub fn new(stream: S) -> Self {
        ControlChannel { stream }
    }

    /// Read one token
    pub async fn get(&mut self) -> Result<Token> {
        let b = self.stream.read_u8().await.map_err(channel_err)?;
        Token::try_from(b)
            .map_err(|_| Error::Channel(format!("unknown token {b:#04x}")))
    }

    pub async fn get_int(&mut self) -> Result<i32> {
        self.stream.read_i32().await.map_err(channel_err)
    }

    /// Read a length-prefixed string.  `None` means "no data".
    pub async fn get_string(&mut self) -> Result<Option<String>> {
        let len = self.get_int().await?;
        if len <= 0 {
            return Ok(None);
        }
        if len > MAX_STRING {
            return Err(Error::Channel(format!("string too long: {len}")));
        }
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf).await.map_err(channel_err)?;
        String::from_utf8(buf)
            .map(Some)
            .map_err(|e| Error::Channel(e.to_string()))
    }

    pub async fn put(&mut self, token: Token) -> Result<()> {
        self.stream.write_u8(token.into()).await.map_err(channel_err)?;
        self.stream.flush().await.map_err(channel_err)
    }

    pub async fn put_int(&mut self, i: i32) -> Result<()> {
        self.stream.write_i32(i).await.map_err(channel_err)?;
        self.stream.flush().await.map_err(channel_err)
    }

    pub async fn put_string(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) if !s.is_empty() => {
                let len = i32::try_from(s.len())
                    .ok()
                    .filter(|l| *l <= MAX_STRING)
                    .ok_or_else(|| Error::Channel(
                            format!("string too long: {}", s.len())))?;
                self.put_int(len).await?;
                self.stream.write_all(s.as_bytes()).await
                    .map_err(channel_err)?;
                self.stream.flush().await.map_err(channel_err)
            }
            _ => self.put_int(0).await
        }
    }

    async fn get_idx(&mut self) -> Result<BufIdx> {
        let i = self.get_int().await?;
        BufIdx::try_from(i)
            .map_err(|_| Error::Channel(format!("bad buffer index {i}")))
    }

    async fn put_idx(&mut self, idx: BufIdx) -> Result<()> {
        let i = i32::try_from(idx)
            .map_err(|_| Error::Channel(format!("bad buffer index {idx}")))?;
        self.put_int(i).await
    }

    /// Receive a message sent by the reader.  Used by the writer.
    pub async fn recv_from_reader(&mut self) -> Result<ReaderMsg> {
        let msg = match self.get().await? {
            Token::Start => {
                ReaderMsg::Start(self.get_string().await?.unwrap_or_default())
            }
            Token::Open => {
                ReaderMsg::Open(self.get_string().await?.unwrap_or_default())
            }
            Token::Data => ReaderMsg::Data(self.get_idx().await?),
            Token::Close => ReaderMsg::Close,
            Token::Quit => ReaderMsg::Quit,
            t => {
                return Err(Error::Channel(
                        format!("unexpected token {t:?} from reader")));
            }
        };
        tracing::trace!(?msg, "writer received");
        Ok(msg)
    }

    /// Receive a message sent by the writer.  Used by the reader.
    pub async fn recv_from_writer(&mut self) -> Result<WriterMsg> {
        let msg = match self.get().await? {
            Token::TaperOk => WriterMsg::TaperOk,
            Token::TapeError => {
                WriterMsg::TapeError(self.get_string().await?
                                     .unwrap_or_default())
            }
            Token::Open => WriterMsg::OpenAck,
            Token::Grant => WriterMsg::Grant(self.get_idx().await?),
            Token::Retry => {
                WriterMsg::Retry(self.get_string().await?.unwrap_or_default())
            }
            Token::Close => {
                let label = self.get_string().await?.unwrap_or_default();
                let filenum = self.get_int().await?;
                let filenum = u32::try_from(filenum)
                    .map_err(|_| Error::Channel(
                            format!("bad file number {filenum}")))?;
                WriterMsg::Closed { label, filenum }
            }
            Token::Quit => WriterMsg::QuitAck,
            t => {
                return Err(Error::Channel(
                        format!("unexpected token {t:?} from writer")));
            }
        };
        tracing::trace!(?msg, "reader received");
        Ok(msg)
    }

    /// Send a message to the writer.  Used by the reader.
    pub async fn send_to_writer(&mut self, msg: &ReaderMsg) -> Result<()> {
        tracing::trace!(?msg, "reader sending");
        match msg {
            ReaderMsg::Start(datestamp) => {
                self.put(Token::Start).await?;
                self.put_string(Some(datestamp)).await
            }
            ReaderMsg::Open(desc) => {
                self.put(Token::Open).await?;
                self.put_string(Some(desc)).await
            }
            ReaderMsg::Data(idx) => {
                self.put(Token::Data).await?;
                self.put_idx(*idx).await
            }
            ReaderMsg::Close => self.put(Token::Close).await,
            ReaderMsg::Quit => self.put(Token::Quit).await,
        }
    }

    /// Send a message to the reader.  Used by the writer.
    pub async fn send_to_reader(&mut self, msg: &WriterMsg) -> Result<()> {
        tracing::trace!(?msg, "writer sending");
        match msg {
            WriterMsg::TaperOk => self.put(Token::TaperOk).await,
            WriterMsg::TapeError(reason) => {
                self.put(Token::TapeError).await?;
                self.put_string(Some(reason)).await
            }
            WriterMsg::OpenAck => self.put(Token::Open).await,
            WriterMsg::Grant(idx) => {
                self.put(Token::Grant).await?;
                self.put_idx(*idx).await
            }
            WriterMsg::Retry(reason) => {
                self.put(Token::Retry).await?;
                self.put_string(Some(reason)).await
            }
            WriterMsg::Closed{label, filenum} => {
                let filenum = i32::try_from(*filenum)
                    .map_err(|_| Error::Channel(
                            format!("bad file number {filenum}")))?;
                self.put(Token::Close).await?;
                self.put_string(Some(label)).await?;
                self.put_int(filenum).await
            }
            WriterMsg::QuitAck => self.put(Token::Quit).await,
        }
    }
}
