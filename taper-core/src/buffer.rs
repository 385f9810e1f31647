// vim: tw=80
//! The ring of fixed-size buffers shared by the reader and the writer
//!
//! Each buffer carries an atomic state tag.  The worker that owns a buffer
//! stores the new tag with `Release` ordering before sending the message that
//! hands the buffer over, and the peer loads it with `Acquire` ordering.  That
//! makes the writer's look-ahead at the next buffer in ring order well-defined
//! even though no message has arrived for it yet.
//!
//! The contents sit behind a `tokio::sync::Mutex`, but it is never contended
//! when the protocol is followed: ownership is conveyed by message.  A failure
//! to acquire it immediately therefore means the two sides disagree about who
//! owns the buffer, which is reported as [`Error::Desync`].

use crate::types::*;
use atomic_enum::atomic_enum;
use std::sync::atomic::Ordering;
use tokio::sync::{Mutex, MutexGuard};

/// Lifecycle of one buffer
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum BufState {
    /// Available to the reader
    Empty,
    /// The reader is writing into it
    Filling,
    /// Ready for the writer
    Full,
}

/// Callback invoked on every buffer state transition.  Used to audit the
/// protocol.
pub type Observer = Box<dyn Fn(BufIdx, BufState, BufState) + Send + Sync>;

struct Buffer {
    state: AtomicBufState,
    data: Mutex<Box<[u8]>>,
}

/// Number of buffers in each state at a given instant
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Census {
    pub empty: usize,
    pub filling: usize,
    pub full: usize,
}

impl Census {
    pub fn total(&self) -> usize {
        self.empty + self.filling + self.full
    }
}

pub struct BufferPool {
    bufs: Box<[Buffer]>,
    block_size: usize,
    observer: Option<Observer>,
}

impl BufferPool {
    /// Allocate a pool of `n` zero-filled buffers of `size` bytes each.
    pub fn alloc(n: usize, size: usize) -> Self {
        assert!(n >= 2, "The pool needs at least two buffers");
        assert!(size > 0);
        let bufs = (0..n).map(|_| Buffer {
            state: AtomicBufState::new(BufState::Empty),
            data: Mutex::new(vec![0u8; size].into_boxed_slice()),
        }).collect::<Vec<_>>()
        .into_boxed_slice();
        BufferPool { bufs, block_size: size, observer: None }
    }

    /// Size of each buffer in bytes.  Equal to the tape block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn census(&self) -> Census {
        let mut census = Census::default();
        for buf in self.bufs.iter() {
            match buf.state.load(Ordering::Acquire) {
                BufState::Empty => census.empty += 1,
                BufState::Filling => census.filling += 1,
                BufState::Full => census.full += 1,
            }
        }
        census
    }

    /// Lock the contents of buffer `idx`, which the caller must own.
    pub fn contents(&self, idx: BufIdx) -> Result<MutexGuard<'_, Box<[u8]>>>
    {
        self.bufs.get(idx)
            .ok_or(Error::Desync)?
            .data
            .try_lock()
            .map_err(|_| Error::Desync)
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    /// The index following `idx` in ring order
    pub fn next(&self, idx: BufIdx) -> BufIdx {
        (idx + 1) % self.bufs.len()
    }

    /// Return every buffer to `EMPTY`.  Only safe between files, when the
    /// writer holds no buffer.
    pub fn reset(&self) {
        for (i, buf) in self.bufs.iter().enumerate() {
            let old = buf.state.swap(BufState::Empty, Ordering::AcqRel);
            if old != BufState::Empty {
                self.observe(i, old, BufState::Empty);
            }
        }
    }

    /// Current state of buffer `idx`.
    ///
    /// # Panics
    ///
    /// If `idx` is out of range
    pub fn state(&self, idx: BufIdx) -> BufState {
        self.bufs[idx].state.load(Ordering::Acquire)
    }

    /// Atomically move buffer `idx` from state `from` to state `to`.
    ///
    /// Fails with [`Error::Desync`] if the buffer was not in state `from`.
    pub fn transition(&self, idx: BufIdx, from: BufState, to: BufState)
        -> Result<()>
    {
        let buf = self.bufs.get(idx).ok_or(Error::Desync)?;
        match buf.state.compare_exchange(from, to, Ordering::AcqRel,
                                         Ordering::Acquire)
        {
            Ok(_) => {
                tracing::trace!(idx, ?from, ?to, "buffer transition");
                self.observe(idx, from, to);
                Ok(())
            }
            Err(actual) => {
                tracing::error!(idx, ?from, ?to, ?actual,
                                "buffer in unexpected state");
                Err(Error::Desync)
            }
        }
    }

    /// Install a callback that will see every state transition.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    fn observe(&self, idx: BufIdx, from: BufState, to: BufState) {
        if let Some(o) = &self.observer {
            o(idx, from, to);
        }
    }
}
