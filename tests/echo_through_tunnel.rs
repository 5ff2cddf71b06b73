//! End-to-end scenarios from spec section 8, wired directly against the
//! core components rather than the `multiplex`/`remote` binaries, so these
//! tests have no external-process dependency (no `cat`, no real SSH pipe).
//!
//! Both sides of the tunnel are simulated with an in-memory `tokio::io::duplex`
//! standing in for the framed pipe, and real loopback `TcpListener`s standing
//! in for the client and the dialed-out target — exactly the "two in-process
//! TCP listeners" approach SPEC_FULL.md commits to for the echo-through-tunnel
//! scenario.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;

use stream_mux::channel::Channel;
use stream_mux::driver::{self, UnknownChannelPolicy};
use stream_mux::frame::ChannelId;
use stream_mux::table::ChannelTable;
use stream_mux::writer::QueuedWriter;

struct DropUnknown;

impl UnknownChannelPolicy for DropUnknown {
    fn on_unknown(&self, _id: ChannelId, _table: &Rc<RefCell<ChannelTable>>) -> Option<Rc<Channel>> {
        None
    }
}

struct DialOnUnknown {
    target: std::net::SocketAddr,
    peer_writer: stream_mux::writer::PeerWriter,
}

impl UnknownChannelPolicy for DialOnUnknown {
    fn on_unknown(&self, id: ChannelId, table: &Rc<RefCell<ChannelTable>>) -> Option<Rc<Channel>> {
        let channel = Channel::pending(id, self.peer_writer.clone(), table);
        channel.clone().connect(self.target);
        table.borrow_mut().insert(Rc::clone(&channel));
        Some(channel)
    }
}

/// A bare TCP echo server: every byte read is written straight back. Stands
/// in for `cat` / the remote's dialed-out target.
async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::task::spawn_local(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::task::spawn_local(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Wires an originating side (a `TcpListener` plus an allocating channel
/// table) to one half of an in-memory framed pipe, and a responding side (a
/// dial-on-unknown policy pointed at `target`) to the other half. Returns
/// the originating listener's address, for clients to connect to.
async fn wire_tunnel(target: std::net::SocketAddr) -> std::net::SocketAddr {
    let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client_listener.local_addr().unwrap();

    let (origin_pipe, remote_pipe) = tokio::io::duplex(64 * 1024);
    let (origin_read, origin_write) = tokio::io::split(origin_pipe);
    let (remote_read, remote_write) = tokio::io::split(remote_pipe);

    let origin_table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));
    let origin_peer_writer = QueuedWriter::new(Box::new(origin_write) as Box<dyn tokio::io::AsyncWrite + Unpin>);

    tokio::task::spawn_local({
        let table = Rc::clone(&origin_table);
        let peer_writer = origin_peer_writer.clone();
        async move {
            loop {
                let (socket, _) = match client_listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let id = table.borrow().allocate();
                let channel = Channel::from_accepted(id, socket, peer_writer.clone(), &table);
                table.borrow_mut().insert(channel);
            }
        }
    });
    tokio::task::spawn_local(driver::run(origin_read, origin_table, DropUnknown));

    let remote_table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));
    let remote_peer_writer = QueuedWriter::new(Box::new(remote_write) as Box<dyn tokio::io::AsyncWrite + Unpin>);
    tokio::task::spawn_local(driver::run(
        remote_read,
        remote_table,
        DialOnUnknown { target, peer_writer: remote_peer_writer },
    ));

    client_addr
}

#[tokio::test(flavor = "current_thread")]
async fn echo_through_tunnel() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let target = spawn_echo_server().await;
            let client_addr = wire_tunnel(target).await;

            let mut client = TcpStream::connect(client_addr).await.unwrap();
            client.write_all(b"hello").await.unwrap();

            let mut buf = [0u8; 5];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn two_concurrent_channels_do_not_cross_talk() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let target = spawn_echo_server().await;
            let client_addr = wire_tunnel(target).await;

            let mut a = TcpStream::connect(client_addr).await.unwrap();
            let mut b = TcpStream::connect(client_addr).await.unwrap();

            a.write_all(b"AAAA").await.unwrap();
            b.write_all(b"BBBB").await.unwrap();

            let mut abuf = [0u8; 4];
            let mut bbuf = [0u8; 4];
            a.read_exact(&mut abuf).await.unwrap();
            b.read_exact(&mut bbuf).await.unwrap();

            assert_eq!(&abuf, b"AAAA");
            assert_eq!(&bbuf, b"BBBB");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn client_close_emits_exactly_one_sentinel() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (pipe_a, pipe_b) = tokio::io::duplex(64 * 1024);
            let (_origin_read, mut peer_read) = tokio::io::split(pipe_b);
            let (origin_write, _remote_write) = tokio::io::split(pipe_a);

            let table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));
            let peer_writer = QueuedWriter::new(Box::new(origin_write) as Box<dyn tokio::io::AsyncWrite + Unpin>);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let client = TcpStream::connect(addr).await.unwrap();
            let (socket, _) = listener.accept().await.unwrap();

            let id = ChannelId(1234);
            let channel = Channel::from_accepted(id, socket, peer_writer, &table);
            table.borrow_mut().insert(Rc::clone(&channel));

            drop(client);

            let mut header = [0u8; 4];
            peer_read.read_exact(&mut header).await.unwrap();
            let (got_id, length) = stream_mux::frame::decode_header(&header);
            assert_eq!(got_id, id);
            assert_eq!(length, 0, "socket close must emit a zero-length sentinel");

            // Give the close sequence's spawned task a chance to evict the
            // table entry before asserting on it.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert!(table.borrow().get(id).is_none(), "closed channel must be evicted");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn remote_dial_failure_emits_sentinel_and_drops_channel() {
    let local = LocalSet::new();
    local
        .run_until(async {
            // Bind and immediately drop a listener to get a port nothing is
            // listening on, for an unreachable `--to` target.
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let unreachable = probe.local_addr().unwrap();
            drop(probe);

            let (pipe_a, pipe_b) = tokio::io::duplex(64 * 1024);
            let (remote_read, remote_write_half) = tokio::io::split(pipe_b);
            let (origin_write, mut origin_read_back) = tokio::io::split(pipe_a);

            let remote_table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));
            let remote_peer_writer =
                QueuedWriter::new(Box::new(remote_write_half) as Box<dyn tokio::io::AsyncWrite + Unpin>);
            tokio::task::spawn_local(driver::run(
                remote_read,
                Rc::clone(&remote_table),
                DialOnUnknown { target: unreachable, peer_writer: remote_peer_writer },
            ));

            let origin_peer_writer =
                QueuedWriter::new(Box::new(origin_write) as Box<dyn tokio::io::AsyncWrite + Unpin>);
            let id = ChannelId(7);
            origin_peer_writer.post(stream_mux::frame::encode_frame(id, b"hi"));

            let mut header = [0u8; 4];
            origin_read_back.read_exact(&mut header).await.unwrap();
            let (got_id, length) = stream_mux::frame::decode_header(&header);
            assert_eq!(got_id, id);
            assert_eq!(length, 0, "a failed dial must be reported back as a sentinel");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn framed_pipe_eof_closes_all_live_channels() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (pipe_a, pipe_b) = tokio::io::duplex(64 * 1024);
            let (remote_read, remote_write_half) = tokio::io::split(pipe_b);
            drop(pipe_a);

            let remote_table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));
            let remote_peer_writer =
                QueuedWriter::new(Box::new(remote_write_half) as Box<dyn tokio::io::AsyncWrite + Unpin>);
            let target = "127.0.0.1:1".parse().unwrap();
            let result = driver::run(
                remote_read,
                Rc::clone(&remote_table),
                DialOnUnknown { target, peer_writer: remote_peer_writer },
            )
            .await;

            assert!(result.is_ok(), "a clean EOF on the framed pipe must not be a fatal error");
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn oversized_length_is_a_fatal_framed_pipe_error() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut write_half, read_half) = tokio::io::duplex(64 * 1024);
            let table: Rc<RefCell<ChannelTable>> = Rc::new(RefCell::new(ChannelTable::new()));

            let mut oversized = Vec::new();
            oversized.extend_from_slice(&stream_mux::frame::encode_header(ChannelId(1), u16::MAX));
            write_half.write_all(&oversized).await.unwrap();

            let result = driver::run(read_half, table, DropUnknown).await;
            assert!(result.is_err(), "length exceeding MAX_BODY must be rejected, not allocated");
        })
        .await;
}
