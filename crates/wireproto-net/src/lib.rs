//! Framed-message TCP transport built on `wireproto-codec` and
//! `wireproto-pool`: connections, a listener, and the frame reassembly
//! state machine that turns a raw byte stream into delivered messages.

mod config;
mod error;
pub mod tcp;

pub use config::{Config, ConnectionConfig, ListenerConfig};
pub use error::{DisconnectReason, ProtocolError, TransportError};
pub use tcp::{Connection, FrameAction, Listener};
