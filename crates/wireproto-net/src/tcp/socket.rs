use std::net::TcpStream;
use std::os::fd::AsRawFd;

/// Sets kernel `SO_SNDBUF` and `SO_RCVBUF` on a connected stream.
pub(crate) fn set_socket_buf_size(stream: &TcpStream, size: usize) {
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            std::ptr::addr_of!(size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            std::ptr::addr_of!(size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

/// Enables `SO_LINGER` with a zero timeout, so the kernel drops the socket
/// immediately (an RST rather than a graceful `FIN`/`TIME_WAIT` wait) on the
/// next close. Used when a connection is closed locally and when a
/// pre-accept filter rejects a peer — both want the socket gone right away
/// rather than lingering to flush.
///
/// Takes any fd-owning socket type (`std::net::TcpStream` or
/// `mio::net::TcpStream`) so the same helper serves `Connection::close` and
/// the listener's filter-rejection path.
pub(crate) fn set_short_linger<S: AsRawFd>(stream: &S) {
    let fd = stream.as_raw_fd();
    let linger = libc::linger { l_onoff: 1, l_linger: 0 };
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            std::ptr::addr_of!(linger).cast(),
            core::mem::size_of::<libc::linger>() as libc::socklen_t,
        );
    }
}
