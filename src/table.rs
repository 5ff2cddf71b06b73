//! The mapping from channel identifier to channel.
//!
//! Mutated only from the demultiplexer driver and channel-allocation code,
//! both of which run on the same single-threaded executor — so a plain
//! `HashMap` behind a `RefCell` is all the synchronization this needs.

use std::collections::HashMap;
use std::rc::Rc;

use rand::RngCore;

use crate::channel::Channel;
use crate::frame::ChannelId;

#[derive(Default)]
pub struct ChannelTable {
    channels: HashMap<ChannelId, Rc<Channel>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable { channels: HashMap::new() }
    }

    pub fn get(&self, id: ChannelId) -> Option<Rc<Channel>> {
        self.channels.get(&id).cloned()
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn insert(&mut self, channel: Rc<Channel>) {
        self.channels.insert(channel.id(), channel);
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Rc<Channel>> {
        self.channels.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Draws a uniformly random channel id and probes the table; on
    /// collision, redraws. Expected attempts are small provided the
    /// live-channel count stays well below 2^16 (spec section 4.4) — this
    /// is not meant to saturate the identifier space.
    pub fn allocate(&self) -> ChannelId {
        self.allocate_with(&mut rand::thread_rng())
    }

    /// Same as [`allocate`](ChannelTable::allocate) but with an injectable
    /// RNG, so tests can force a collision by handing it a sequence that
    /// repeats a value.
    pub fn allocate_with<R: RngCore>(&self, rng: &mut R) -> ChannelId {
        loop {
            let candidate = ChannelId(rng.next_u32() as u16);
            if !self.channels.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
