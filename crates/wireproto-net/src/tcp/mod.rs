pub(crate) mod byte_ring;
mod connection;
mod framer;
mod listener;
mod socket;

pub use connection::Connection;
pub use framer::{FrameAction, FrameReader};
pub use listener::Listener;
