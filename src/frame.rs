//! The wire codec for the framed pipe.
//!
//! A frame is `<channel_id:u16 big-endian><length:u16 big-endian><body:length
//! bytes>`. `length == 0` is a reserved sentinel meaning "close this
//! channel"; such a frame carries no body. These functions are pure and
//! non-failing: the header is always exactly [`HEADER_SIZE`] bytes, so
//! decoding never has to reject a short buffer.

use bytes::{BufMut, Bytes, BytesMut};

/// Identifies one multiplexed TCP stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u16);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Size of the `<channel_id><length>` header, in bytes.
pub const HEADER_SIZE: usize = 4;

/// Conventional transfer unit minus the header; the largest body this system
/// produces, and the largest it will accept before treating `length` as a
/// fatal framed-pipe error.
pub const MAX_BODY: usize = 4096 - HEADER_SIZE;

/// Reads the 4-byte big-endian header into `(channel, length)`.
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> (ChannelId, u16) {
    let channel = u16::from_be_bytes([buf[0], buf[1]]);
    let length = u16::from_be_bytes([buf[2], buf[3]]);
    (ChannelId(channel), length)
}

/// Encodes just the header, independent of any body. Exposed for the
/// round-trip property test; [`encode_frame`] and [`encode_sentinel`] are
/// what the rest of the crate actually calls.
pub fn encode_header(channel: ChannelId, length: u16) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..2].copy_from_slice(&channel.0.to_be_bytes());
    buf[2..4].copy_from_slice(&length.to_be_bytes());
    buf
}

/// Frames `body` for `channel`. `body.len()` must be in `[1, MAX_BODY]`;
/// callers only ever hand this a chunk already bounded by a single socket
/// read, so this never needs to fail.
pub fn encode_frame(channel: ChannelId, body: &[u8]) -> Bytes {
    debug_assert!(!body.is_empty() && body.len() <= MAX_BODY);
    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len());
    out.put_slice(&encode_header(channel, body.len() as u16));
    out.put_slice(body);
    out.freeze()
}

/// The zero-length sentinel frame that signals "close channel `channel`".
pub fn encode_sentinel(channel: ChannelId) -> Bytes {
    Bytes::copy_from_slice(&encode_header(channel, 0))
}
