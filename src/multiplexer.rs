//! The originating side: accepts inbound TCP connections, spawns a
//! long-lived child process, and shuttles each accepted connection's bytes
//! over that child's stdio in framed form.
//!
//! Channel ids are allocated here (random probe, spec section 4.4) at
//! accept time, so the demultiplexer driver never has to create a channel
//! on the fly — a non-sentinel frame for an unrecognized id is simply
//! dropped, which can only happen for a channel that already closed and was
//! evicted from the table.

use std::cell::RefCell;
use std::process::Stdio;
use std::rc::Rc;

use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::channel::Channel;
use crate::driver::{self, UnknownChannelPolicy};
use crate::frame::ChannelId;
use crate::table::ChannelTable;
use crate::writer::{PeerWriter, QueuedWriter};

struct DropUnknown;

impl UnknownChannelPolicy for DropUnknown {
    fn on_unknown(&self, id: ChannelId, _table: &Rc<RefCell<ChannelTable>>) -> Option<Rc<Channel>> {
        warn!(channel = %id, "frame for unknown channel on originating side, dropping");
        None
    }
}

/// Binds `listen_port`, spawns `run_cmd`, and runs until the framed pipe
/// (the child's stdio) closes or the process receives a shutdown signal.
#[instrument(skip(run_cmd))]
pub async fn run(listen_port: u16, run_cmd: &str) -> crate::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", listen_port)).await?;
    info!(port = listen_port, command = run_cmd, "multiplexer listening");

    let mut child = spawn_child(run_cmd)?;
    let child_stdout = child.stdout.take().expect("child spawned with piped stdout");
    let child_stdin = child.stdin.take().expect("child spawned with piped stdin");

    let table = Rc::new(RefCell::new(ChannelTable::new()));
    let peer_writer: PeerWriter = QueuedWriter::new(Box::new(child_stdin));

    let accept_loop = accept_loop(listener, Rc::clone(&table), peer_writer.clone());
    let drive = driver::run(child_stdout, Rc::clone(&table), DropUnknown);

    tokio::select! {
        result = drive => {
            info!("framed pipe closed, shutting down");
            result?;
        }
        _ = accept_loop => {
            unreachable!("accept loop never returns Ok");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    let _ = child.kill().await;
    Ok(())
}

fn spawn_child(run_cmd: &str) -> crate::Result<tokio::process::Child> {
    Command::new("sh")
        .arg("-c")
        .arg(run_cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(Into::into)
}

async fn accept_loop(listener: TcpListener, table: Rc<RefCell<ChannelTable>>, peer_writer: PeerWriter) -> ! {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let id = table.borrow().allocate();
                info!(channel = %id, %peer_addr, "accepted connection");
                let channel = Channel::from_accepted(id, socket, peer_writer.clone(), &table);
                table.borrow_mut().insert(channel);
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
            }
        }
    }
}
