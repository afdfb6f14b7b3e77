//! The receive-side state machine: turns an arbitrarily chunked byte stream
//! into a sequence of complete [`Message`]s.

use wireproto_codec::{HEADER_SIZE, Message, SeekFrom};
use wireproto_pool::MessagePool;

use crate::error::ProtocolError;

/// What happens to a just-delivered message once its callback returns.
pub enum FrameAction {
    /// Reset the message and keep using its allocation for the next one —
    /// the synchronous, allocation-free path.
    Recycle(Box<Message>),
    /// The callback is retaining the message (e.g. handing it to another
    /// thread). The framer allocates a fresh message from the pool to keep
    /// going; the retained one must eventually be returned via
    /// [`MessagePool::free`] by whoever ends up owning it.
    Retain,
}

enum Phase {
    AwaitingHeader,
    AwaitingPayload,
}

/// Drives one connection's receive-side assembly. Not `Send`-shared between
/// threads; a connection's drainer thread owns one of these exclusively.
pub struct FrameReader {
    pool: MessagePool,
    current: Option<Box<Message>>,
    phase: Phase,
    max_packet_size: usize,
    max_fragments: usize,
    fragments_seen: usize,
}

impl FrameReader {
    pub fn new(pool: MessagePool, max_packet_size: usize, max_fragments: usize) -> Self {
        let current = Some(pool.allocate());
        Self { pool, current, phase: Phase::AwaitingHeader, max_packet_size, max_fragments, fragments_seen: 0 }
    }

    fn current_mut(&mut self) -> &mut Message {
        self.current.as_mut().expect("a message is always in progress between callbacks")
    }

    /// Feeds a contiguous span of freshly-read bytes into the state machine,
    /// invoking `on_message` for every message completed along the way.
    ///
    /// Returns the number of bytes consumed from `bytes` on success — always
    /// all of them. On a protocol violation, returns `Err` and the caller
    /// must close the connection; nothing further should be fed to this
    /// reader.
    pub fn feed<F>(&mut self, mut bytes: &[u8], on_message: &mut F) -> Result<usize, ProtocolError>
    where
        F: FnMut(Box<Message>) -> FrameAction,
    {
        let total = bytes.len();

        while !bytes.is_empty() {
            match self.phase {
                Phase::AwaitingHeader => {
                    let have = self.current_mut().raw_cursor();
                    let need = HEADER_SIZE - have;
                    let take = need.min(bytes.len());
                    if take > 0 {
                        self.current_mut()
                            .raw_write(&bytes[..take])
                            .expect("header bytes always fit: HEADER_SIZE << capacity");
                        bytes = &bytes[take..];
                        self.fragments_seen += 1;
                        if self.fragments_seen > self.max_fragments {
                            return Err(ProtocolError::FragmentLimitExceeded { limit: self.max_fragments });
                        }
                    }

                    if self.current_mut().raw_cursor() < HEADER_SIZE {
                        break;
                    }

                    let declared = self.current_mut().packet_size_according_to_header();
                    if declared < HEADER_SIZE || declared > self.max_packet_size {
                        return Err(ProtocolError::HeaderLengthOutOfRange { declared });
                    }
                    self.current_mut().raw_sync_from_header();
                    self.phase = Phase::AwaitingPayload;
                }

                Phase::AwaitingPayload => {
                    let declared = self.current_mut().packet_size_according_to_header();
                    let needed = declared - self.current_mut().raw_cursor();
                    let take = needed.min(bytes.len());
                    if take > 0 {
                        self.current_mut()
                            .raw_write(&bytes[..take])
                            .expect("payload write is bounded by the header-checked declared length");
                        bytes = &bytes[take..];
                        self.fragments_seen += 1;
                        if self.fragments_seen > self.max_fragments {
                            return Err(ProtocolError::FragmentLimitExceeded { limit: self.max_fragments });
                        }
                    }

                    if self.current_mut().raw_cursor() == declared {
                        self.current_mut()
                            .seek(0, SeekFrom::Begin)
                            .expect("seeking to payload start always succeeds");
                        let completed = self.current.take().expect("message always present here");
                        self.fragments_seen = 0;
                        self.phase = Phase::AwaitingHeader;

                        match on_message(completed) {
                            FrameAction::Recycle(mut msg) => {
                                msg.reset();
                                self.current = Some(msg);
                            }
                            FrameAction::Retain => {
                                self.current = Some(self.pool.allocate());
                            }
                        }
                    }
                }
            }
        }

        Ok(total)
    }
}
