//! Integration tests driving the transport engine end-to-end through an
//! in-memory `DatagramIo` pair instead of real sockets, the same style the
//! pack uses for testing a protocol stack against a mock transport rather
//! than the kernel.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use ffrdp::{Config, DatagramIo, Endpoint, Error, Role};

type Queue = Rc<RefCell<VecDeque<(Vec<u8>, SocketAddr)>>>;

/// One side of an in-memory datagram link. `send_to` pushes onto the peer's
/// inbox; `recv_from` pops this node's own inbox. `drop_next` lets a test
/// simulate exactly one lost datagram without needing a real lossy network.
#[derive(Clone)]
struct MockIo {
    local: SocketAddr,
    inbox: Queue,
    peer_inbox: Queue,
    /// `Some(k)` means: skip `k` more sends, then silently drop the next one
    /// and clear back to `None`. `None` means no drop is armed.
    drop_at: Rc<Cell<Option<u32>>>,
}

impl MockIo {
    fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (MockIo, MockIo) {
        let inbox_a: Queue = Rc::new(RefCell::new(VecDeque::new()));
        let inbox_b: Queue = Rc::new(RefCell::new(VecDeque::new()));
        let a = MockIo {
            local: addr_a,
            inbox: inbox_a.clone(),
            peer_inbox: inbox_b.clone(),
            drop_at: Rc::new(Cell::new(None)),
        };
        let b = MockIo {
            local: addr_b,
            inbox: inbox_b,
            peer_inbox: inbox_a,
            drop_at: Rc::new(Cell::new(None)),
        };
        (a, b)
    }

    /// Drops exactly one datagram out of this node's next `skip + 1` sends:
    /// the first `skip` go through untouched, and the one right after that
    /// is silently discarded.
    fn drop_nth_send(&self, skip: u32) {
        self.drop_at.set(Some(skip));
    }
}

impl DatagramIo for MockIo {
    fn send_to(&mut self, _dest: SocketAddr, bytes: &[u8]) -> Result<usize, Error> {
        if let Some(remaining) = self.drop_at.get() {
            if remaining == 0 {
                self.drop_at.set(None);
                return Ok(bytes.len());
            }
            self.drop_at.set(Some(remaining - 1));
        }
        self.peer_inbox.borrow_mut().push_back((bytes.to_vec(), self.local));
        Ok(bytes.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Error> {
        match self.inbox.borrow_mut().pop_front() {
            Some((bytes, src)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(Some((n, src)))
            }
            None => Ok(None),
        }
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool, Error> {
        Ok(!self.inbox.borrow().is_empty())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }
}

fn addrs() -> (SocketAddr, SocketAddr) {
    ("127.0.0.1:40001".parse().unwrap(), "127.0.0.1:40002".parse().unwrap())
}

fn endpoints(config: Config) -> (Endpoint<MockIo>, Endpoint<MockIo>) {
    let (client_addr, server_addr) = addrs();
    let (client_io, server_io) = MockIo::pair(client_addr, server_addr);
    let client = Endpoint::with_io(client_io, Role::Client, Some(server_addr), config);
    let server = Endpoint::with_io(server_io, Role::Server, None, config);
    (client, server)
}

fn pump(client: &mut Endpoint<MockIo>, server: &mut Endpoint<MockIo>, ticks: usize) {
    for _ in 0..ticks {
        client.update();
        server.update();
    }
}

#[test]
fn loss_free_short_send_delivers_in_order() {
    let (mut client, mut server) = endpoints(Config::default());
    client.send(b"hello ffrdp").unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    for _ in 0..50 {
        client.update();
        server.update();
        let n = server.recv(&mut buf);
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
        }
        if received.len() == b"hello ffrdp".len() {
            break;
        }
    }

    assert_eq!(received, b"hello ffrdp");
}

#[test]
fn large_payload_splits_across_mtu_and_reassembles_in_order() {
    let mut config = Config::default();
    config.mtu = 256;
    let (mut client, mut server) = endpoints(config);

    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    client.send(&payload).unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    for _ in 0..200 {
        client.update();
        server.update();
        let n = server.recv(&mut buf);
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
        }
        if received.len() == payload.len() {
            break;
        }
    }

    assert_eq!(received, payload);
}

#[test]
fn mid_stream_loss_triggers_fast_retransmit_without_waiting_for_rto() {
    // Losing the very first frame of a session can only ever be recovered by
    // RTO: the cumulative ack can't move past a hole at the head of the send
    // list, and the selective-ack/fast-retransmit bookkeeping in `Engine`
    // only runs once it has. So to exercise the fast path this test loses a
    // frame in the middle of an 8-frame burst: the five frames ahead of it
    // get cumulatively acked, which lets the selective-ack bits for the
    // frames behind it flag the gap on the very next ack.
    let mut config = Config::default();
    config.mtu = 64;
    // A generous RTO: if the frame is recovered before it would ever expire,
    // the recovery can only have come from the selective-ack fast path.
    config.min_rto = Duration::from_secs(5);
    let (mut client, mut server) = endpoints(config);

    client.io_mut().drop_nth_send(5); // drop the 6th DATA frame (seq 5)
    let payloads: Vec<[u8; 64]> = (0..8u8).map(|i| [i; 64]).collect();
    for payload in &payloads {
        client.send(payload).unwrap();
    }

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    for _ in 0..200 {
        client.update();
        server.update();
        let n = server.recv(&mut buf);
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
        }
        if received.len() == 64 * 8 {
            break;
        }
    }

    assert_eq!(received.len(), 64 * 8);
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(&received[i * 64..(i + 1) * 64], &payload[..]);
    }
    assert!(client.dump().counters.resend_fast >= 1);
}

#[test]
fn lone_lost_frame_is_recovered_by_rto_retransmit() {
    let mut config = Config::default();
    config.mtu = 64;
    config.min_rto = Duration::from_millis(5);
    config.max_rto = Duration::from_millis(50);
    let (mut client, mut server) = endpoints(config);

    client.io_mut().drop_nth_send(0);
    client.send(&[9u8; 64]).unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    for _ in 0..500 {
        client.update();
        server.update();
        let n = server.recv(&mut buf);
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
        }
        if received.len() == 64 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(received, vec![9u8; 64]);
    assert!(client.dump().counters.resend_rto >= 1);
}

#[test]
fn exhausted_receive_window_triggers_probe_and_reply() {
    let mut config = Config::default();
    config.mtu = 64;
    config.recv_ring_size = 64;
    config.win_cycle = Duration::from_millis(5);
    let (mut client, mut server) = endpoints(config);

    // Larger than the client's initial guess at the peer's window
    // (recv_ring_size / 2 == 32), so the first send must wait on a probe.
    client.send(&[5u8; 48]).unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    for _ in 0..200 {
        client.update();
        server.update();
        let n = server.recv(&mut buf);
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
        }
        if received.len() == 48 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(received, vec![5u8; 48]);
    assert!(client.dump().counters.query_rwin >= 1);
}

#[test]
fn send_is_rejected_on_a_server_endpoint_before_a_peer_connects() {
    let (_client, mut server) = endpoints(Config::default());
    assert!(matches!(server.send(b"too early"), Err(Error::NotConnected)));
    assert_eq!(server.dump().counters.send_failed, 1);
}

#[test]
fn send_succeeds_on_a_server_endpoint_once_a_peer_has_connected() {
    let (mut client, mut server) = endpoints(Config::default());
    client.send(b"hello").unwrap(); // gives the server a datagram to adopt its peer from
    pump(&mut client, &mut server, 5);
    assert!(server.is_connected());
    assert!(server.send(b"hi").is_ok());
}

#[test]
fn byebye_is_rejected_on_a_server_endpoint() {
    let (_client, mut server) = endpoints(Config::default());
    assert!(matches!(server.byebye(), Err(Error::NotClient)));
}

#[test]
fn byebye_tears_down_both_sides() {
    let (mut client, mut server) = endpoints(Config::default());

    client.byebye().unwrap();
    pump(&mut client, &mut server, 20); // client's BYE lets the server adopt it as a peer, then tear down

    assert!(client.dump().bye_peer);
    assert!(!server.dump().connected);
}
