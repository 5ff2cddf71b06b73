//! The responding side: reads framed traffic from its own stdin,
//! demultiplexes it into outbound TCP connections to a configured target,
//! and reframes replies back onto its stdout.
//!
//! Channels here are created lazily: the first non-sentinel frame for an
//! id the table hasn't seen triggers a connect to `--to`. Per spec section
//! 4.4's edge policy, a sentinel racing ahead of that connect is handled
//! the same as any other sentinel: closing an already-`Fresh` channel is
//! just as idempotent as closing a connected one, and its pending writer
//! queue is dropped when the (not yet attached) sink closes.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::io::{stdin, stdout};
use tracing::{info, instrument};

use crate::channel::Channel;
use crate::driver::{self, UnknownChannelPolicy};
use crate::frame::ChannelId;
use crate::table::ChannelTable;
use crate::writer::{PeerWriter, QueuedWriter};

struct DialOnUnknown {
    target: SocketAddr,
    peer_writer: PeerWriter,
}

impl UnknownChannelPolicy for DialOnUnknown {
    fn on_unknown(&self, id: ChannelId, table: &Rc<RefCell<ChannelTable>>) -> Option<Rc<Channel>> {
        let channel = Channel::pending(id, self.peer_writer.clone(), table);
        channel.clone().connect(self.target);
        table.borrow_mut().insert(Rc::clone(&channel));
        Some(channel)
    }
}

/// Reads framed traffic from stdin, dials `target` on first sight of each
/// new channel id, and runs until stdin closes or the process receives a
/// shutdown signal.
#[instrument]
pub async fn run(target: SocketAddr) -> crate::Result<()> {
    info!(%target, "remote starting");

    let table = Rc::new(RefCell::new(ChannelTable::new()));
    let peer_writer: PeerWriter = QueuedWriter::new(Box::new(stdout()));

    let drive = driver::run(stdin(), Rc::clone(&table), DialOnUnknown { target, peer_writer });

    tokio::select! {
        result = drive => {
            info!("stdin closed, shutting down");
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
