//! A bounded, blocking SPSC byte ring connecting a connection's filler
//! thread (socket reader) to its drainer thread (frame assembler).
//!
//! The filler writes raw bytes as they arrive off the wire; the drainer
//! reads the currently-buffered contiguous span, hands it to the frame
//! reader, and reports back how many bytes it actually consumed via
//! [`RingReader::read_with`]'s return value. Only that many bytes are freed
//! — the rest stay buffered for the next call, which is what lets the frame
//! reader stop mid-span on a header/payload boundary without copying
//! anything out of the ring itself.

use std::sync::{Arc, Condvar, Mutex};

/// Default ring size, used when a connection isn't configured with its own.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

struct Inner {
    buf: Vec<u8>,
    /// Next byte to write.
    head: usize,
    /// Next byte to read.
    tail: usize,
    /// Bytes currently buffered.
    len: usize,
    /// Set once the writer side is done; the reader drains what's left and
    /// then observes end-of-stream.
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Writer half, owned by a connection's filler thread.
pub struct RingWriter {
    shared: Arc<Shared>,
}

/// Reader half, owned by a connection's drainer thread.
pub struct RingReader {
    shared: Arc<Shared>,
}

/// Builds a ring of the given byte capacity and returns its two halves.
pub fn byte_ring(capacity: usize) -> (RingWriter, RingReader) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner { buf: vec![0u8; capacity.max(1)], head: 0, tail: 0, len: 0, closed: false }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
    });
    (RingWriter { shared: shared.clone() }, RingReader { shared })
}

impl RingWriter {
    /// Blocks until at least one byte of free space is available, then
    /// copies as much of `src` as fits in one contiguous or wrapped pass.
    /// Returns the number of bytes actually written; `0` only if `src` was
    /// empty or the ring has been closed.
    pub fn write(&mut self, src: &[u8]) -> usize {
        if src.is_empty() {
            return 0;
        }
        let mut inner = self.shared.inner.lock().unwrap();
        inner = self.shared.not_full.wait_while(inner, |i| i.len == i.buf.len() && !i.closed).unwrap();
        if inner.closed {
            return 0;
        }

        let capacity = inner.buf.len();
        let free = capacity - inner.len;
        let to_write = src.len().min(free);
        let head = inner.head;
        let first = to_write.min(capacity - head);
        inner.buf[head..head + first].copy_from_slice(&src[..first]);
        if to_write > first {
            inner.buf[..to_write - first].copy_from_slice(&src[first..to_write]);
        }
        inner.head = (head + to_write) % capacity;
        inner.len += to_write;
        drop(inner);
        self.shared.not_empty.notify_one();
        to_write
    }

    /// Signals end-of-stream. The reader drains whatever is still buffered
    /// and then sees `read_with` return `false` forever after.
    pub fn close(&mut self) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.shared.not_empty.notify_all();
    }
}

impl RingReader {
    /// Blocks until at least one byte is readable or the ring is closed and
    /// drained. Calls `f` with the currently-readable contiguous span
    /// (capped at the physical end of the buffer, even if more data is
    /// buffered past the wrap point) and frees however many bytes `f`
    /// reports consuming. Returns `false` once there is nothing left and
    /// the writer has closed.
    pub fn read_with<F: FnOnce(&[u8]) -> usize>(&mut self, f: F) -> bool {
        let mut inner = self.shared.inner.lock().unwrap();
        inner = self.shared.not_empty.wait_while(inner, |i| i.len == 0 && !i.closed).unwrap();
        if inner.len == 0 {
            return false;
        }

        let capacity = inner.buf.len();
        let tail = inner.tail;
        let contiguous = inner.len.min(capacity - tail);
        let consumed = f(&inner.buf[tail..tail + contiguous]).min(contiguous);
        inner.tail = (tail + consumed) % capacity;
        inner.len -= consumed;
        drop(inner);
        self.shared.not_full.notify_one();
        true
    }

    /// True once the writer has closed the ring and every buffered byte has
    /// been consumed.
    pub fn is_drained(&self) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        inner.closed && inner.len == 0
    }
}
