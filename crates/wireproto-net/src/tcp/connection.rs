use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::debug;
use wireproto_codec::Message;
use wireproto_pool::MessagePool;
use wireproto_utils::thread_boot;

use crate::config::ConnectionConfig;
use crate::error::{DisconnectReason, TransportError};
use crate::tcp::byte_ring::byte_ring;
use crate::tcp::framer::{FrameAction, FrameReader};
use crate::tcp::socket::{set_short_linger, set_socket_buf_size};

/// Bound on write-retry iterations in [`Connection::send`], matching the
/// connection's own cap on fragmenting the receive side: a connection that
/// can't make progress after this many partial writes is treated as stuck,
/// not infinitely retried.
const MAX_SEND_ATTEMPTS: usize = 1000;

/// Records the first disconnect reason observed for a `read_loop`, ignoring
/// every subsequent attempt.
///
/// A protocol error detected by the drainer shuts the socket down to
/// unblock the filler; the filler then observes that shutdown as an
/// ordinary `Ok(0)`/peer-close (or `Err`) and would otherwise overwrite the
/// drainer's `Protocol` reason with `PeerClosed`, since both threads are
/// joined before `reason` is read. Whichever thread gets here first wins.
fn set_reason_once(reason: &Mutex<Option<DisconnectReason>>, value: DisconnectReason) {
    let mut guard = reason.lock().unwrap();
    if guard.is_none() {
        *guard = Some(value);
    }
}

/// One framed-message TCP connection: owns the socket, and — once
/// [`read_loop`](Connection::read_loop) is running — a dedicated filler
/// thread (raw socket reads) and drainer thread (frame assembly) connected
/// by a [bounded byte ring](crate::tcp::byte_ring).
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    pool: MessagePool,
    config: ConnectionConfig,
    closing: Arc<AtomicBool>,
    reading: Arc<AtomicBool>,
    send_lock: Mutex<()>,
}

impl Connection {
    /// Wraps an already-connected (or just-accepted) blocking stream.
    pub fn from_stream(
        stream: TcpStream,
        peer_addr: SocketAddr,
        pool: MessagePool,
        config: ConnectionConfig,
    ) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        if let Some(size) = config.config.socket_buf_size() {
            set_socket_buf_size(&stream, size);
        }
        Ok(Self {
            stream,
            peer_addr,
            pool,
            config,
            closing: Arc::new(AtomicBool::new(false)),
            reading: Arc::new(AtomicBool::new(false)),
            send_lock: Mutex::new(()),
        })
    }

    /// Opens an outbound connection to `addr`.
    pub fn connect(addr: SocketAddr, pool: MessagePool, config: ConnectionConfig) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self::from_stream(stream, peer_addr, pool, config)?)
    }

    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Writes a fully-populated message's packet memory to the socket,
    /// looping over short writes. Bounded by [`MAX_SEND_ATTEMPTS`] partial
    /// writes to avoid spinning forever against a peer that never drains.
    pub fn send(&self, msg: &mut Message) -> Result<usize, TransportError> {
        let _guard = self.send_lock.lock().unwrap();
        let mut remaining = msg.get_packet_memory();
        let mut stream = &self.stream;
        let mut total = 0;
        let mut attempts = 0;

        while !remaining.is_empty() {
            attempts += 1;
            if attempts > MAX_SEND_ATTEMPTS {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("exceeded {MAX_SEND_ATTEMPTS} write attempts without completing send"),
                )));
            }
            match stream.write(remaining) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    remaining = &remaining[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        Ok(total)
    }

    /// Allocates a message from `pool`, lets `populate` fill in its payload,
    /// and sends it. The message is returned to the pool afterwards.
    pub fn send_with<F>(&self, message_type: u8, populate: F) -> Result<usize, TransportError>
    where
        F: FnOnce(&mut Message),
    {
        let mut msg = self.pool.allocate();
        msg.set_message_type(message_type);
        populate(&mut msg);
        let sent = self.send(&mut msg);
        self.pool.free(msg);
        sent
    }

    /// Sets the closing flag, closes with a short linger, and shuts down the
    /// socket. If a `read_loop` is currently running, its filler thread
    /// observes the shutdown, and the disconnect callback is suppressed (the
    /// owner already knows).
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        set_short_linger(&self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// Runs the receive pipeline until the peer closes, an I/O error
    /// occurs, a protocol error is detected, or [`close`](Self::close) is
    /// called. Blocks the calling thread until both the filler and drainer
    /// threads have exited. `on_message` runs on the drainer thread for
    /// every completed message; `on_disconnected` runs once afterwards,
    /// unless the connection was closed locally.
    pub fn read_loop<M, D>(&self, mut on_message: M, on_disconnected: D) -> Result<(), TransportError>
    where
        M: FnMut(Box<Message>) -> FrameAction + Send + 'static,
        D: FnOnce(DisconnectReason) + Send + 'static,
    {
        if self.reading.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(TransportError::AlreadyReading);
        }

        let mut filler_stream = self.stream.try_clone().map_err(TransportError::Io)?;
        let drainer_shutdown_stream = self.stream.try_clone().map_err(TransportError::Io)?;

        let core_affinity = self.config.core_affinity;
        let thread_priority = self.config.thread_priority;
        let pool = self.pool.clone();
        let peer_addr = self.peer_addr;
        let max_packet_size = self.config.config.max_client_packet_size();
        let max_fragments = self.config.config.max_receive_fragments_per_packet();

        let (mut writer, mut reader) = byte_ring(self.config.config.byte_ring_capacity());

        let reason: Arc<Mutex<Option<DisconnectReason>>> = Arc::new(Mutex::new(None));
        let filler_reason = reason.clone();
        let drainer_reason = reason.clone();
        let filler_closing = self.closing.clone();
        let drainer_closing = self.closing.clone();

        let filler = thread::Builder::new()
            .name(format!("wireproto-fill-{peer_addr}"))
            .spawn(move || {
                thread_boot(core_affinity, thread_priority);
                let mut buf = [0u8; 8192];
                loop {
                    match filler_stream.read(&mut buf) {
                        Ok(0) => {
                            if !filler_closing.load(Ordering::Acquire) {
                                set_reason_once(&filler_reason, DisconnectReason::PeerClosed);
                            }
                            break;
                        }
                        Ok(n) => {
                            let mut sent = 0;
                            while sent < n {
                                sent += writer.write(&buf[sent..n]);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            if !filler_closing.load(Ordering::Acquire) {
                                set_reason_once(&filler_reason, DisconnectReason::Io(e.to_string()));
                            }
                            break;
                        }
                    }
                }
                writer.close();
            })
            .expect("failed to spawn filler thread");

        let drainer = thread::Builder::new()
            .name(format!("wireproto-drain-{peer_addr}"))
            .spawn(move || {
                thread_boot(core_affinity, thread_priority);
                let mut framer = FrameReader::new(pool, max_packet_size, max_fragments);
                let mut proto_err = None;

                while reader.read_with(|span| match framer.feed(span, &mut on_message) {
                    Ok(n) => n,
                    Err(e) => {
                        proto_err = Some(e);
                        span.len()
                    }
                }) {
                    if proto_err.is_some() {
                        break;
                    }
                }

                if let Some(e) = proto_err {
                    if !drainer_closing.load(Ordering::Acquire) {
                        set_reason_once(&drainer_reason, DisconnectReason::Protocol(e.to_string()));
                    }
                    let _ = drainer_shutdown_stream.shutdown(std::net::Shutdown::Both);
                }
            })
            .expect("failed to spawn drainer thread");

        let _ = filler.join();
        let _ = drainer.join();
        self.reading.store(false, Ordering::Release);
        debug!(%peer_addr, "read loop finished");

        if let Some(reason) = reason.lock().unwrap().take() {
            on_disconnected(reason);
        }

        Ok(())
    }
}
