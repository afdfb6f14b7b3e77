use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};
use wireproto_pool::MessagePool;

use crate::config::ListenerConfig;
use crate::error::TransportError;
use crate::tcp::connection::Connection;
use crate::tcp::socket::set_short_linger;

const ACCEPT_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

struct ListenerHandle {
    stop_flag: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Accepts inbound connections on a background thread using a non-blocking
/// `mio` reactor, handing each accepted socket off as a blocking
/// [`Connection`] for the caller to drive with its own `read_loop`.
#[derive(Default)]
pub struct Listener {
    handle: Mutex<Option<ListenerHandle>>,
}

impl Listener {
    pub fn new() -> Self {
        Self { handle: Mutex::new(None) }
    }

    /// Binds `addr` and starts accepting. `filter` is consulted with each
    /// peer address before the connection is constructed; returning `false`
    /// drops the socket immediately. `on_accept` is called once per accepted
    /// connection, on the listener's background thread.
    pub fn listen<A, F>(
        &self,
        addr: SocketAddr,
        pool: MessagePool,
        config: ListenerConfig,
        filter: Option<F>,
        on_accept: A,
    ) -> Result<(), TransportError>
    where
        A: Fn(Connection) + Send + 'static,
        F: Fn(SocketAddr) -> bool + Send + 'static,
    {
        let mut guard = self.handle.lock().unwrap();
        if guard.is_some() {
            return Err(TransportError::AlreadyListening);
        }

        let mut mio_listener = MioTcpListener::bind(addr).map_err(TransportError::Io)?;
        let mut poll = Poll::new().map_err(TransportError::Io)?;
        poll.registry().register(&mut mio_listener, ACCEPT_TOKEN, Interest::READABLE).map_err(TransportError::Io)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop_flag = stop_flag.clone();

        let thread = thread::Builder::new()
            .name(format!("wireproto-accept-{addr}"))
            .spawn(move || {
                let mut events = Events::with_capacity(16);
                while !thread_stop_flag.load(Ordering::Acquire) {
                    if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                        if e.kind() == io::ErrorKind::Interrupted {
                            continue;
                        }
                        warn!(%e, "accept poll failed");
                        break;
                    }

                    for event in &events {
                        if event.token() != ACCEPT_TOKEN {
                            continue;
                        }
                        loop {
                            match mio_listener.accept() {
                                Ok((mio_stream, peer_addr)) => {
                                    if let Some(filter) = &filter {
                                        if !filter(peer_addr) {
                                            debug!(%peer_addr, "connection rejected by filter");
                                            set_short_linger(&mio_stream);
                                            continue;
                                        }
                                    }
                                    match to_blocking(mio_stream) {
                                        Ok(std_stream) => match Connection::from_stream(
                                            std_stream,
                                            peer_addr,
                                            pool.clone(),
                                            config.connection.clone(),
                                        ) {
                                            Ok(conn) => on_accept(conn),
                                            Err(e) => warn!(%peer_addr, %e, "failed to prepare accepted connection"),
                                        },
                                        Err(e) => warn!(%peer_addr, %e, "failed to convert accepted socket to blocking mode"),
                                    }
                                }
                                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                                Err(e) => {
                                    warn!(%e, "accept failed");
                                    break;
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn accept thread");

        *guard = Some(ListenerHandle { stop_flag, thread });
        Ok(())
    }

    /// Stops accepting and joins the background thread. A no-op if not
    /// currently listening.
    pub fn stop(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop_flag.store(true, Ordering::Release);
            let _ = handle.thread.join();
        }
    }
}

/// Converts an accepted non-blocking `mio` stream into a blocking
/// `std::net::TcpStream` by transplanting the underlying file descriptor —
/// cheaper than tearing the socket down and reconnecting, and avoids mio's
/// non-blocking semantics leaking into the per-connection thread model.
#[cfg(unix)]
fn to_blocking(stream: mio::net::TcpStream) -> io::Result<std::net::TcpStream> {
    use std::os::fd::{FromRawFd, IntoRawFd};
    let fd = stream.into_raw_fd();
    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(false)?;
    Ok(std_stream)
}

#[cfg(not(unix))]
fn to_blocking(_stream: mio::net::TcpStream) -> io::Result<std::net::TcpStream> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "accepted-socket handoff only supported on unix"))
}
