//! A bounded free list recycling [`wireproto_codec::Message`] buffers.
//!
//! Message buffers are large (up to 10 MiB) and reused on a connection's hot
//! path, so allocation/deallocation on every message is avoided: instead,
//! [`MessagePool::free`] returns a message's buffer to a shared free list
//! for [`MessagePool::allocate`] to hand back out. The free list has a hard
//! capacity; messages returned past it are simply dropped rather than kept
//! alive indefinitely.

use std::sync::{Arc, Mutex};

use tracing::debug;
use wireproto_codec::Message;

/// Default number of spare messages kept on the free list.
pub const DEFAULT_POOL_CAPACITY: usize = 100;

/// Thread-safe, cloneable handle to a bounded pool of [`Message`] buffers.
///
/// Cloning is cheap (an `Arc` bump) and every clone shares the same
/// underlying free list, so a pool can be handed to a filler thread and a
/// drainer thread alike.
#[derive(Clone)]
pub struct MessagePool {
    free: Arc<Mutex<Vec<Box<Message>>>>,
    capacity: usize,
}

impl MessagePool {
    /// Creates an empty pool with room for up to `capacity` spare messages.
    /// Messages are allocated lazily, on first [`allocate`](Self::allocate).
    pub fn new(capacity: usize) -> Self {
        Self { free: Arc::new(Mutex::new(Vec::with_capacity(capacity))), capacity }
    }

    /// Takes a message from the free list, or allocates a fresh one if the
    /// list is empty. Either way the returned message is freshly [`reset`](Message::reset),
    /// positioned past the header with zeroed contents.
    pub fn allocate(&self) -> Box<Message> {
        let popped = self.free.lock().unwrap().pop();
        match popped {
            Some(mut msg) => {
                msg.reset();
                msg
            }
            None => Box::new(Message::new()),
        }
    }

    /// Returns a message to the free list for reuse. If the list is already
    /// at capacity the message is dropped instead of queuing it further.
    pub fn free(&self, msg: Box<Message>) {
        let mut free = self.free.lock().unwrap();
        if free.len() < self.capacity {
            free.push(msg);
        } else {
            debug!(capacity = self.capacity, "message pool full, dropping message");
        }
    }

    /// Number of spare messages currently sitting on the free list.
    pub fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
