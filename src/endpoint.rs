//! Public façade: `Endpoint` ties a `DatagramIo` to an `Engine` and exposes
//! the four operations an application actually calls (`send`, `recv`,
//! `byebye`, `update`), plus `dump` for diagnostics.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use crate::config::Config;
use crate::engine::{Engine, Role, Stats};
use crate::err::Error;
use crate::io::{DatagramIo, UdpIo};

/// One side of an FFRDP session.
///
/// A client `Endpoint` knows its peer from construction; a server `Endpoint`
/// learns its peer from the first datagram it receives (see `Engine::update`)
/// and rejects datagrams from any other source thereafter.
pub struct Endpoint<IO: DatagramIo> {
    io: IO,
    engine: Engine,
}

impl Endpoint<UdpIo> {
    /// Binds an ephemeral socket, connects it to `server_addr`, and returns a
    /// client-role endpoint. No handshake is performed here; the session is
    /// considered live as soon as the first ACK comes back.
    pub fn client<A: ToSocketAddrs>(server_addr: A, config: Config) -> Result<Endpoint<UdpIo>, Error> {
        let sock_rcvbuf = config.sock_rcvbuf;
        let resolved = server_addr
            .to_socket_addrs()?
            .next()
            .expect("address resolved to at least one socket address");
        let io = UdpIo::connect(resolved, sock_rcvbuf)?;
        Ok(Endpoint::with_io(io, Role::Client, Some(resolved), config))
    }

    /// Binds to `bind_addr` and returns a server-role endpoint with no peer
    /// yet; the peer is adopted from the first inbound datagram.
    pub fn server<A: ToSocketAddrs>(bind_addr: A, config: Config) -> Result<Endpoint<UdpIo>, Error> {
        let sock_rcvbuf = config.sock_rcvbuf;
        let io = UdpIo::bind(bind_addr, sock_rcvbuf)?;
        Ok(Endpoint::with_io(io, Role::Server, None, config))
    }
}

impl<IO: DatagramIo> Endpoint<IO> {
    /// Constructs an endpoint around an already-configured `DatagramIo`.
    /// Exposed so tests can drive the engine with an in-memory substrate.
    pub fn with_io(io: IO, role: Role, peer_addr: Option<SocketAddr>, config: Config) -> Endpoint<IO> {
        let engine = Engine::new(role, peer_addr, config, Instant::now());
        Endpoint { io, engine }
    }

    /// Enqueues `bytes` for delivery, splitting it into `<= mtu`-sized DATA
    /// frames. Rejects the whole message rather than partially admitting it
    /// when the send queue is already at `max_waitsnd`, and refuses outright
    /// on a server endpoint that has not yet accepted a peer.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        if self.engine.role() == Role::Server && !self.engine.is_connected() {
            self.engine.bump_send_failed();
            return Err(Error::NotConnected);
        }
        if self.engine.mtu() == 0 {
            return Err(Error::PayloadTooLarge);
        }
        let needed = self.engine.frames_needed(bytes.len());
        if self.engine.wait_snd() + needed > self.engine.max_waitsnd() {
            self.engine.bump_send_failed();
            return Err(Error::SendQueueFull);
        }
        Ok(self.engine.enqueue_send(bytes))
    }

    /// Copies as many bytes as are ready, in order, into `out`. Returns the
    /// number of bytes copied; `0` means nothing is ready yet.
    pub fn recv(&mut self, out: &mut [u8]) -> usize {
        self.engine.recv(out)
    }

    /// Marks the session for teardown. The actual BYE frame (and its
    /// retransmission, if the peer never answers) is sent from within
    /// `update`, matching the reference's cooperative-tick model rather than
    /// sending synchronously here.
    pub fn byebye(&mut self) -> Result<(), Error> {
        if self.engine.role() != Role::Client {
            return Err(Error::NotClient);
        }
        self.engine.set_bye_local();
        Ok(())
    }

    /// Runs one send/receive/ack tick. Must be called repeatedly (e.g. in a
    /// loop or timer) for the session to make any progress at all — there is
    /// no background thread.
    pub fn update(&mut self) {
        let now = Instant::now();
        self.engine.update(&mut self.io, now);
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Diagnostic snapshot of the session's current state.
    pub fn dump(&self) -> Stats {
        self.engine.stats()
    }

    /// Direct access to the underlying transport, for tests that need to
    /// drive or inspect the substrate itself (e.g. simulating packet loss).
    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }
}

