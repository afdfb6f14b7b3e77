mod error;
mod message;
mod primitives;

pub use error::MessageError;
pub use message::{HEADER_SIZE, MAX_PACKET_SIZE, Message, SeekFrom};
