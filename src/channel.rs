//! A single multiplexed TCP stream: its identifier, its socket, its queued
//! writer, and its lifecycle flags.
//!
//! `Channel` owns its `TcpStream` exclusively (split into read/write halves
//! once connected) and holds a back-reference to the shared peer writer —
//! the queued writer bound to the framed pipe — so that bytes read off the
//! local socket can be framed and posted there. The channel table (`Rc<RefCell<ChannelTable>>`)
//! is referenced weakly so that closing a channel can evict its own table
//! entry without the table having to reach back in.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::frame::{encode_frame, encode_sentinel, ChannelId, MAX_BODY};
use crate::io_util::is_benign;
use crate::table::ChannelTable;
use crate::writer::{PeerWriter, QueuedWriter};

/// Mirrors spec section 4.3's state machine. Purely observational — control
/// flow is driven by the writer's `Option<sink>` and the close-notify
/// signal, not by matching on this enum — but it is threaded through
/// tracing so a channel's lifecycle is visible in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Fresh,
    Connected,
    Reading,
    Closed,
}

pub struct Channel {
    id: ChannelId,
    local_writer: QueuedWriter<OwnedWriteHalf>,
    peer_writer: PeerWriter,
    table: Weak<std::cell::RefCell<ChannelTable>>,
    closed: Cell<bool>,
    state: Cell<ChannelState>,
    close_notify: Notify,
}

impl Channel {
    /// Built on the originating side: the socket is already connected
    /// (produced by `accept`), so there is no `Fresh` state — the read loop
    /// starts immediately.
    pub fn from_accepted(
        id: ChannelId,
        socket: TcpStream,
        peer_writer: PeerWriter,
        table: &Rc<std::cell::RefCell<ChannelTable>>,
    ) -> Rc<Channel> {
        let _ = socket.set_nodelay(true);
        let (read_half, write_half) = socket.into_split();
        let channel = Rc::new(Channel {
            id,
            local_writer: QueuedWriter::new(write_half),
            peer_writer,
            table: Rc::downgrade(table),
            closed: Cell::new(false),
            state: Cell::new(ChannelState::Connected),
            close_notify: Notify::new(),
        });
        channel.clone().start_read_socket(read_half);
        channel
    }

    /// Built on the responding side: no socket exists yet. The writer is
    /// paused until [`connect`](Channel::connect) succeeds.
    pub fn pending(
        id: ChannelId,
        peer_writer: PeerWriter,
        table: &Rc<std::cell::RefCell<ChannelTable>>,
    ) -> Rc<Channel> {
        Rc::new(Channel {
            id,
            local_writer: QueuedWriter::pending(),
            peer_writer,
            table: Rc::downgrade(table),
            closed: Cell::new(false),
            state: Cell::new(ChannelState::Fresh),
            close_notify: Notify::new(),
        })
    }

    /// A channel with no socket and no runtime dependency, for table tests
    /// that only need a HashMap value with the right id.
    #[cfg(test)]
    pub(crate) fn test_stub(id: ChannelId) -> Rc<Channel> {
        Rc::new(Channel {
            id,
            local_writer: QueuedWriter::pending(),
            peer_writer: PeerWriter::pending(),
            table: Weak::new(),
            closed: Cell::new(false),
            state: Cell::new(ChannelState::Fresh),
            close_notify: Notify::new(),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Delivers peer bytes to the local TCP endpoint.
    pub fn post(&self, body: bytes::Bytes) {
        if self.closed.get() {
            return;
        }
        self.local_writer.post(body);
    }

    /// Responding-side only: begins an asynchronous connect. On success,
    /// starts the read loop and resumes the queued writer. On failure,
    /// closes the channel (which emits the sentinel so the peer learns the
    /// dial failed).
    #[instrument(skip(self), fields(channel = %self.id))]
    pub fn connect(self: Rc<Self>, addr: SocketAddr) {
        tokio::task::spawn_local(async move {
            match TcpStream::connect(addr).await {
                Ok(socket) => {
                    // A sentinel for this id may already have closed the
                    // channel while this connect was in flight. Drop the
                    // socket instead of attaching it; an already-closed
                    // channel must not go on posting frames for an id whose
                    // sentinel the peer already saw.
                    if self.closed.get() {
                        debug!("connect succeeded on an already-closed channel, dropping socket");
                        return;
                    }
                    let _ = socket.set_nodelay(true);
                    self.state.set(ChannelState::Connected);
                    let (read_half, write_half) = socket.into_split();
                    self.local_writer.attach_and_resume(write_half);
                    self.clone().start_read_socket(read_half);
                }
                Err(err) => {
                    warn!(error = %err, "connect failed");
                    self.close();
                }
            }
        });
    }

    /// Begins a cooperative read loop on the local TCP socket. Each
    /// completed read (up to `MAX_BODY` bytes) is framed with this
    /// channel's identifier and posted to the peer writer. Re-issued on
    /// success; closes the channel on any error.
    fn start_read_socket(self: Rc<Self>, mut read_half: OwnedReadHalf) {
        self.state.set(ChannelState::Reading);
        tokio::task::spawn_local(async move {
            let mut buf = vec![0u8; MAX_BODY];
            loop {
                let read = tokio::select! {
                    biased;
                    () = self.close_notify.notified() => return,
                    result = read_half.read(&mut buf) => result,
                };
                match read {
                    Ok(0) => {
                        self.close();
                        return;
                    }
                    Ok(n) => {
                        self.peer_writer.post(encode_frame(self.id, &buf[..n]));
                    }
                    Err(err) => {
                        if !is_benign(&err) {
                            warn!(error = %err, channel = %self.id, "socket read failed");
                        }
                        self.close();
                        return;
                    }
                }
            }
        });
    }

    /// Idempotent. The first call schedules a sequence that emits a
    /// zero-length sentinel frame to the peer, closes the local socket,
    /// closes the queued writer, wakes any in-flight read loop, and evicts
    /// the table entry. Subsequent calls are no-ops.
    ///
    /// Because this is posted onto the single-threaded executor, the
    /// sentinel is guaranteed to be enqueued on the peer writer before any
    /// subsequent work for this identifier runs.
    #[instrument(skip(self), fields(channel = %self.id))]
    pub fn close(self: &Rc<Self>) {
        if self.closed.replace(true) {
            return;
        }
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            debug!("closing channel");
            this.peer_writer.post(encode_sentinel(this.id));
            this.local_writer.close();
            this.close_notify.notify_waiters();
            this.state.set(ChannelState::Closed);
            if let Some(table) = this.table.upgrade() {
                table.borrow_mut().remove(this.id);
            }
        });
    }
}
