use thiserror::Error;

/// Programmer-error conditions raised by [`crate::Message`] field I/O.
///
/// Both variants indicate misuse of the dual-cursor API (writing past
/// capacity, reading past the assembled size, or seeking outside the
/// payload) rather than anything a remote peer can trigger directly.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    #[error("write/read of {attempted} bytes at cursor {cursor} would exceed limit {limit}")]
    Overflow { cursor: usize, attempted: usize, limit: usize },

    #[error("seek target {requested} is out of range for a payload of length {payload_len}")]
    OutOfRange { requested: i64, payload_len: usize },
}
