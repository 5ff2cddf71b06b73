//! A per-stream FIFO that serializes concurrent writes onto one byte sink.
//!
//! `post` never blocks the caller: it appends to the queue and, if nothing
//! is already draining, spawns a local task that writes the queue's
//! contents in order, one whole chunk per write. A writer can be built
//! already paused, with no sink at all, so a channel can attach one to a
//! socket before that socket is actually connected (see `Channel::connect`
//! in `channel.rs`): [`QueuedWriter::pending`] builds it paused, and
//! [`QueuedWriter::attach_and_resume`] supplies the sink and unpauses it
//! once the connect future resolves.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::error;

use crate::io_util::is_benign;

/// The writer bound to the framed pipe's outbound direction, shared by all
/// channels on one side. Boxed because the concrete sink differs per side
/// (a child process's stdin on the multiplexer, this process's stdout on
/// the remote).
pub type PeerWriter = QueuedWriter<Box<dyn AsyncWrite + Unpin>>;

struct Inner<W> {
    sink: Option<W>,
    queue: VecDeque<Bytes>,
    paused: bool,
    draining: bool,
}

/// A queued writer bound to a single `AsyncWrite` sink.
///
/// Cloning shares the same underlying queue and sink (it is a handle, not a
/// copy) — this is how the channel and its drain task both refer to the
/// same writer.
pub struct QueuedWriter<W> {
    inner: Rc<RefCell<Inner<W>>>,
}

impl<W> Clone for QueuedWriter<W> {
    fn clone(&self) -> Self {
        QueuedWriter { inner: Rc::clone(&self.inner) }
    }
}

impl<W: AsyncWrite + Unpin + 'static> QueuedWriter<W> {
    /// A writer already bound to a connected sink, ready to drain.
    pub fn new(sink: W) -> Self {
        QueuedWriter {
            inner: Rc::new(RefCell::new(Inner {
                sink: Some(sink),
                queue: VecDeque::new(),
                paused: false,
                draining: false,
            })),
        }
    }

    /// A writer with no sink yet, paused until [`attach_and_resume`] is
    /// called. Used for the responding side's not-yet-connected channels.
    ///
    /// [`attach_and_resume`]: QueuedWriter::attach_and_resume
    pub fn pending() -> Self {
        QueuedWriter {
            inner: Rc::new(RefCell::new(Inner {
                sink: None,
                queue: VecDeque::new(),
                paused: true,
                draining: false,
            })),
        }
    }

    /// Appends `chunk` to the FIFO. If not paused and nothing is currently
    /// draining, starts a drain task. Never blocks the caller.
    pub fn post(&self, chunk: Bytes) {
        let mut inner = self.inner.borrow_mut();
        if inner.sink.is_none() && !inner.paused {
            // Closed: silently drop further writes, matching the "does not
            // retry" failure semantics in spec section 4.2.
            return;
        }
        inner.queue.push_back(chunk);
        let should_start = !inner.paused && !inner.draining;
        if should_start {
            inner.draining = true;
        }
        drop(inner);
        if should_start {
            self.spawn_drain();
        }
    }

    /// Forbids starting new writes. Writes already in flight are not
    /// aborted. Private: nothing outside [`attach_and_resume`] needs to
    /// pause a writer that already has a sink — a writer is only ever built
    /// paused (via [`pending`]) and unpaused exactly once, on connect.
    ///
    /// [`attach_and_resume`]: QueuedWriter::attach_and_resume
    /// [`pending`]: QueuedWriter::pending
    fn resume(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.paused = false;
        let should_start = !inner.draining && !inner.queue.is_empty();
        if should_start {
            inner.draining = true;
        }
        drop(inner);
        if should_start {
            self.spawn_drain();
        }
    }

    /// Supplies the sink for a writer built with [`pending`] and resumes it.
    ///
    /// [`pending`]: QueuedWriter::pending
    pub fn attach_and_resume(&self, sink: W) {
        self.inner.borrow_mut().sink = Some(sink);
        self.resume();
    }

    /// Schedules closing the underlying sink. Subsequent `post` calls drop
    /// their chunks silently; this does not retry or flush what remains
    /// queued.
    pub fn close(&self) {
        let this = self.clone();
        tokio::task::spawn_local(async move {
            let mut inner = this.inner.borrow_mut();
            inner.queue.clear();
            inner.sink.take();
        });
    }

    /// Whether a sink is currently attached. Only used by `channel.rs`'s
    /// connect-after-close regression test to confirm a stray connect never
    /// attaches a socket to an already-closed writer.
    #[cfg(test)]
    pub(crate) fn has_sink(&self) -> bool {
        self.inner.borrow().sink.is_some()
    }

    fn spawn_drain(&self) {
        let this = self.clone();
        tokio::task::spawn_local(async move { this.drain().await });
    }

    async fn drain(&self) {
        loop {
            let chunk = {
                let mut inner = self.inner.borrow_mut();
                if inner.paused {
                    inner.draining = false;
                    return;
                }
                match inner.queue.pop_front() {
                    Some(chunk) => chunk,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };

            let sink = self.inner.borrow_mut().sink.take();
            let Some(mut sink) = sink else {
                return;
            };

            match sink.write_all(&chunk).await {
                Ok(()) => {
                    self.inner.borrow_mut().sink = Some(sink);
                }
                Err(err) => {
                    if !is_benign(&err) {
                        error!(error = %err, "queued writer: write failed");
                    }
                    self.close();
                    return;
                }
            }
        }
    }
}
