//! `stream-mux` is a bidirectional TCP stream multiplexer: many independent
//! TCP byte streams are tunneled over a single pair of ordered byte pipes
//! using a compact length-prefixed framing.
//!
//! The crate ships two binaries built on the types here:
//!
//! - `multiplex` accepts inbound TCP connections, spawns a long-lived child
//!   process, and shuttles each accepted connection's bytes over that
//!   child's stdio in framed form ([`multiplexer::run`]).
//! - `remote` reads framed traffic from its own stdin, demultiplexes it
//!   into outbound TCP connections to a configured target, and reframes
//!   replies back onto its stdout ([`remote::run`]).
//!
//! Composing the two — typically piping `multiplex`'s child process stdio
//! across a network transport such as an SSH subprocess, with `remote` on
//! the far end — yields a general-purpose TCP-over-stdio tunnel.
//!
//! The hard part, and the part worth reading first, is the core shared by
//! both sides: [`frame`] (the wire codec), [`writer`] (the queued,
//! backpressure-aware writer), [`channel`] (one multiplexed stream's
//! lifecycle), [`table`] (channel id allocation and lookup), and [`driver`]
//! (the two-phase demultiplexing read loop).
//!
//! No reliability layer sits on top of the framed pipe: if it loses bytes
//! or reorders them, behavior is undefined. There is no authentication,
//! encryption, flow-control windowing, or retransmission. The core assumes
//! a single-threaded cooperative executor; nothing here uses `Arc`, a
//! `Mutex`, or an atomic.

pub mod channel;
pub mod driver;
pub mod frame;
mod io_util;
pub mod multiplexer;
pub mod remote;
pub mod table;
pub mod writer;

/// The crate's catch-all error type. Concrete I/O and parse errors are
/// boxed into this rather than modeled as a dedicated enum, since nothing
/// in the core needs to distinguish error variants programmatically —
/// everything is either logged or turned into a sentinel frame.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` that most functions in this crate return.
pub type Result<T> = std::result::Result<T, Error>;
