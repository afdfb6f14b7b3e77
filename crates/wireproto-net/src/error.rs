use thiserror::Error;

/// Conditions raised by the frame reader while reassembling messages from
/// the byte stream. Both are the peer's fault; the connection is closed and
/// the reason surfaces through the disconnect event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("declared message length {declared} is outside [HEADER_SIZE, max_packet_size]")]
    HeaderLengthOutOfRange { declared: usize },

    #[error("message exceeded {limit} partial reads before completing")]
    FragmentLimitExceeded { limit: usize },
}

/// Conditions raised by the transport layer: I/O failures and
/// call-site misuse (starting an operation that's already in progress).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("already listening on this address")]
    AlreadyListening,

    #[error("a read loop is already running on this connection")]
    AlreadyReading,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The reason a connection's receive loop ended, passed to the
/// disconnect callback. Never fired at all if the connection's owner
/// initiated the close locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its write side (a clean, benign end of stream).
    PeerClosed,
    /// A transport-level I/O error terminated the connection.
    Io(String),
    /// The frame reader rejected something the peer sent.
    Protocol(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}
