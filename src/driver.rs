//! The loop that reads alternating header/body frames off the framed pipe,
//! routes bodies to channels, and interprets zero-length frames as close
//! sentinels.
//!
//! The read loop is strictly two-phase (spec section 4.5): read exactly 4
//! header bytes, then either treat a zero length as a sentinel or read
//! exactly `length` body bytes and route them. This guarantees frame
//! alignment under any interleaving, since nothing else ever reads from the
//! framed pipe concurrently.
//!
//! Both sides share this loop; they differ only in how an unrecognized
//! channel id is handled for a non-sentinel frame. The originating side
//! (multiplexer) never sees one — it allocates ids itself at accept time —
//! so it passes a policy that drops the frame. The responding side (remote)
//! passes a policy that dials out and inserts a new channel.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, instrument};

use crate::channel::Channel;
use crate::frame::{decode_header, ChannelId, HEADER_SIZE, MAX_BODY};
use crate::table::ChannelTable;

/// What to do when a non-sentinel frame names a channel id not currently in
/// the table.
///
/// The originating side (multiplexer) never sees this case — it allocates
/// ids itself at accept time — and returns `None` to drop the frame. The
/// responding side (remote) creates a channel, inserts it into the table,
/// begins connecting it to the configured target, and returns it so the
/// driver can post this frame's body as its first bytes.
pub trait UnknownChannelPolicy {
    fn on_unknown(&self, id: ChannelId, table: &Rc<RefCell<ChannelTable>>) -> Option<Rc<Channel>>;
}

/// Drives one framed pipe to completion. Returns `Ok(())` on a clean EOF
/// (the framed pipe closed between frames); any other I/O error or an
/// oversized `length` is a fatal framed-pipe error per spec section 7.
#[instrument(skip_all)]
pub async fn run<R, P>(
    mut reader: R,
    table: Rc<RefCell<ChannelTable>>,
    policy: P,
) -> crate::Result<()>
where
    R: AsyncRead + Unpin,
    P: UnknownChannelPolicy,
{
    loop {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("framed pipe closed");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let (id, length) = decode_header(&header);

        if length == 0 {
            if let Some(channel) = table.borrow().get(id) {
                channel.close();
            }
            continue;
        }

        if length as usize > MAX_BODY {
            error!(channel = %id, length, "frame exceeds maximum body size");
            return Err(format!(
                "frame for channel {id} announced length {length}, exceeding the {MAX_BODY} byte maximum"
            )
            .into());
        }

        let mut body = vec![0u8; length as usize];
        reader.read_exact(&mut body).await?;

        let existing = table.borrow().get(id);
        let channel = match existing {
            Some(channel) => Some(channel),
            None => policy.on_unknown(id, &table),
        };
        if let Some(channel) = channel {
            channel.post(body.into());
        }
    }
}
