//! Small shared helpers for classifying I/O errors.
//!
//! Mirrors `mux::is_common_error` from the original implementation: a
//! handful of error kinds are expected whenever a peer simply hangs up, and
//! are not worth logging at error severity (spec section 7, "Benign
//! end-of-stream").

use std::io::{Error, ErrorKind};

pub fn is_benign(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}
