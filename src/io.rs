//! Datagram substrate consumed by the transport engine.
//!
//! The engine is written against `DatagramIo` rather than a concrete socket
//! type, the same separation the teacher draws between `tcp::TCB` (pure
//! state machine) and the TUN device that actually moves bytes. `UdpIo` is
//! the real-world implementation; tests substitute an in-memory channel pair.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{setsockopt, sockopt::RcvBuf};

use crate::err::Error;

/// Non-blocking datagram I/O, addressed by `SocketAddr`.
pub trait DatagramIo {
    /// Sends `bytes` to `dest`. Never blocks; a transient failure (e.g. a full
    /// kernel send buffer) is surfaced as `Err` and left to the retransmission
    /// path rather than retried here.
    fn send_to(&mut self, dest: SocketAddr, bytes: &[u8]) -> Result<usize, Error>;

    /// Copies one pending datagram into `buf`, returning its length and source
    /// address. Returns `Ok(None)` when nothing is pending.
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Error>;

    /// Blocks up to `timeout` waiting for the socket to become readable.
    /// Returns whether it became readable before the deadline.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, Error>;

    /// The local address bound by this endpoint, when known (clients that
    /// have never sent may not yet have one assigned by the kernel).
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// `DatagramIo` over a real `std::net::UdpSocket`.
#[derive(Debug)]
pub struct UdpIo {
    socket: UdpSocket,
}

impl UdpIo {
    /// Binds a server-role socket to `addr`, enlarges its receive buffer to
    /// `sock_rcvbuf` bytes, and puts it in non-blocking mode.
    pub fn bind<A: ToSocketAddrs>(addr: A, sock_rcvbuf: usize) -> Result<UdpIo, Error> {
        let socket = UdpSocket::bind(addr)?;
        Self::configure(socket, sock_rcvbuf)
    }

    /// Binds an ephemeral client-role socket and connects it to `peer`, so
    /// `send_to`/`recv_from` only ever observe that one peer.
    pub fn connect<A: ToSocketAddrs>(peer: A, sock_rcvbuf: usize) -> Result<UdpIo, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        Self::configure(socket, sock_rcvbuf)
    }

    fn configure(socket: UdpSocket, sock_rcvbuf: usize) -> Result<UdpIo, Error> {
        socket.set_nonblocking(true)?;
        set_recv_buffer_size(&socket, sock_rcvbuf);
        Ok(UdpIo { socket })
    }
}

impl DatagramIo for UdpIo {
    fn send_to(&mut self, dest: SocketAddr, bytes: &[u8]) -> Result<usize, Error> {
        match self.socket.send_to(bytes, dest) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Error> {
        match self.socket.recv_from(buf) {
            Ok((n, src)) => Ok(Some((n, src))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, Error> {
        let mut pfd = [PollFd::new(self.socket.as_raw_fd(), PollFlags::POLLIN)];
        let timeout_ms: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        let n = poll(&mut pfd[..], timeout_ms).map_err(std::io::Error::from)?;
        Ok(n > 0)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}

fn set_recv_buffer_size(socket: &UdpSocket, size: usize) {
    // Best-effort: a platform/kernel that refuses the hint still functions,
    // just with a smaller receive queue, matching the reference's behavior
    // of ignoring a failed `setsockopt(SO_RCVBUF)`.
    let _ = setsockopt(socket.as_raw_fd(), RcvBuf, &size);
}
