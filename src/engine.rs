//! The transport engine: the `update` tick that drives retransmission,
//! reception, ACK assembly, flow-control probing, and BYE teardown.
//!
//! Everything above this module (seq, wire, frame, ring, rtt, fec) is a leaf
//! component; `Engine` is the orchestrator the spec calls out as "the hard
//! part". It is written against `DatagramIo` rather than a concrete socket so
//! tests can drive it with an in-memory substrate, the same separation the
//! teacher draws between `tcp::TCB` and the TUN device that actually moves
//! bytes.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::fec::{FecCodec, FecStats, NoFec, XorFec};
use crate::frame::{Frame, FrameFlags, FrameList};
use crate::io::DatagramIo;
use crate::ring::RecvRing;
use crate::rtt::RttEstimator;
use crate::seq::Seq;
use crate::wire::{self, WireFrame};

/// How long `update` waits for the socket to become readable before it drains
/// it. Purely a throttle against busy-spinning when idle; whether or not the
/// wait actually observed readability, the drain loop below still runs (and
/// simply finds nothing queued), so no protocol state depends on it.
const RECV_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub send_firsttime: u64,
    pub send_failed: u64,
    pub resend_rto: u64,
    pub resend_fast: u64,
    pub query_rwin: u64,
}

/// Diagnostic snapshot returned by `Endpoint::dump`. Pure observation — no
/// side effects, no text formatting, so tests can assert on fields directly
/// instead of scraping a log line.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub role: Role,
    pub connected: bool,
    pub bye_local: bool,
    pub bye_peer: bool,
    pub send_seq: u32,
    pub recv_seq: u32,
    pub recv_win: u32,
    pub wait_snd: usize,
    pub rtt_smoothed: Option<Duration>,
    pub rtt_deviation: Duration,
    pub rto: Duration,
    pub counters: Counters,
    /// `None` when FEC is disabled; `Some` with the codec's recovered/unrecoverable tally otherwise.
    pub fec: Option<FecStats>,
}

/// The send/receive sliding-window state machine for one peer. Knows nothing
/// about sockets or threads; `update` is handed a `DatagramIo` each call.
#[derive(Debug)]
pub struct Engine {
    role: Role,
    connected: bool,
    bye_local: bool,
    bye_peer: bool,

    send_seq: Seq,
    recv_seq: Seq,
    recv_win: u32,

    send_list: FrameList,
    recv_list: FrameList,
    ring: RecvRing,
    rtt: RttEstimator,
    tick_query_rwin: Instant,

    peer_addr: Option<SocketAddr>,
    counters: Counters,
    fec: Box<dyn FecCodec + Send>,
    config: Config,
}

impl Engine {
    pub fn new(role: Role, peer_addr: Option<SocketAddr>, config: Config, now: Instant) -> Engine {
        let fec: Box<dyn FecCodec + Send> = match config.fec {
            Some(fec_config) => Box::new(XorFec::with_redundancy(fec_config.redundancy)),
            None => Box::new(NoFec),
        };
        Engine {
            role,
            connected: role == Role::Client && peer_addr.is_some(),
            bye_local: false,
            bye_peer: false,
            send_seq: Seq::ZERO,
            recv_seq: Seq::ZERO,
            recv_win: (config.recv_ring_size / 2) as u32,
            send_list: FrameList::new(),
            recv_list: FrameList::new(),
            ring: RecvRing::new(config.recv_ring_size),
            rtt: RttEstimator::with_bounds(config.min_rto, config.max_rto),
            tick_query_rwin: now,
            peer_addr,
            counters: Counters::default(),
            fec,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn wait_snd(&self) -> usize {
        self.send_list.len()
    }

    pub fn set_bye_local(&mut self) {
        self.bye_local = true;
    }

    /// Splits `bytes` into `<= mtu`-sized DATA frames and enqueues them in
    /// the send list, assigning each the next `send_seq`. Returns the number
    /// of bytes accepted (always `bytes.len()` once admitted, since a
    /// rejection is whole-message).
    pub fn enqueue_send(&mut self, bytes: &[u8]) -> usize {
        let mtu = self.config.mtu;
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + mtu).min(bytes.len());
            let frame = Frame::new(self.send_seq, bytes[offset..end].to_vec());
            self.send_seq = self.send_seq.next();
            self.send_list.enqueue(frame);
            offset = end;
        }
        bytes.len()
    }

    /// Number of additional `<= mtu` frames admitting `len` more bytes would
    /// add to the send list, for the `MAX_WAITSND` admission check.
    pub fn frames_needed(&self, len: usize) -> usize {
        if self.config.mtu == 0 {
            return 0;
        }
        len.div_ceil(self.config.mtu)
    }

    pub fn max_waitsnd(&self) -> usize {
        self.config.max_waitsnd
    }

    pub fn mtu(&self) -> usize {
        self.config.mtu
    }

    pub fn bump_send_failed(&mut self) {
        self.counters.send_failed += 1;
    }

    pub fn recv(&mut self, out: &mut [u8]) -> usize {
        self.ring.read(out)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            role: self.role,
            connected: self.connected,
            bye_local: self.bye_local,
            bye_peer: self.bye_peer,
            send_seq: self.send_seq.get(),
            recv_seq: self.recv_seq.get(),
            recv_win: self.recv_win,
            wait_snd: self.send_list.len(),
            rtt_smoothed: self.rtt.smoothed(),
            rtt_deviation: self.rtt.deviation(),
            rto: self.rtt.rto(),
            counters: self.counters,
            fec: self.config.fec.is_some().then(|| self.fec.stats()),
        }
    }

    /// One cooperative tick: send/retransmit, receive, deliver+ACK, apply ACKs.
    pub fn update(&mut self, io: &mut impl DatagramIo, now: Instant) {
        self.phase_send_retransmit(io, now);
        let (got_data, send_una_local, send_mack, advertised_win) = self.phase_receive(io, now);
        if got_data {
            self.phase_deliver_and_ack(io, now);
        }
        self.phase_apply_acks(send_una_local, send_mack, advertised_win, now);
    }

    fn dest(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn transmit_data(&mut self, io: &mut impl DatagramIo, dest: SocketAddr, seq: Seq, payload: &[u8]) {
        let header_and_payload = wire::encode_data_header_and_payload(seq, payload);
        for encoded in self.fec.encode_out(&header_and_payload) {
            let mut out = encoded.bytes;
            out.extend_from_slice(&encoded.fec_seq.to_le_bytes());
            if let Err(e) = io.send_to(dest, &out) {
                log::debug!("ffrdp: send_to failed for seq {seq}: {e}");
            }
        }
    }

    fn send_small(&mut self, io: &mut impl DatagramIo, dest: SocketAddr, bytes: &[u8]) {
        if let Err(e) = io.send_to(dest, bytes) {
            log::debug!("ffrdp: send_to failed: {e}");
        }
    }

    fn phase_send_retransmit(&mut self, io: &mut impl DatagramIo, now: Instant) {
        let Some(dest) = self.dest() else { return };
        let mut i = 0;
        while i < self.config.flowctl {
            enum Decision {
                FirstSend(Seq, Vec<u8>),
                ProbeOrStop,
                Resend(Seq, Vec<u8>, bool),
                Skip,
                Done,
            }
            let decision = match self.send_list.get_mut(i) {
                None => Decision::Done,
                Some(frame) => {
                    if !frame.flags.contains(FrameFlags::FIRST_SENT) {
                        if frame.payload.len() <= self.recv_win as usize {
                            Decision::FirstSend(frame.seq, frame.payload.clone())
                        } else {
                            Decision::ProbeOrStop
                        }
                    } else if now >= frame.tick_timeout.expect("sent frame has a timeout")
                        || frame.flags.contains(FrameFlags::FAST_RESEND)
                    {
                        let fast = frame.flags.contains(FrameFlags::FAST_RESEND);
                        Decision::Resend(frame.seq, frame.payload.clone(), fast)
                    } else {
                        Decision::Skip
                    }
                }
            };

            match decision {
                Decision::Done => break,
                Decision::FirstSend(seq, payload) => {
                    self.transmit_data(io, dest, seq, &payload);
                    let rto = self.rtt.rto();
                    let frame = self.send_list.get_mut(i).expect("frame still present");
                    frame.tick_send = Some(now);
                    frame.tick_timeout = Some(now + rto);
                    frame.flags.insert(FrameFlags::FIRST_SENT);
                    self.recv_win = self.recv_win.saturating_sub(payload.len() as u32);
                    self.counters.send_firsttime += 1;
                    log::trace!("ffrdp: first send seq={seq}");
                }
                Decision::ProbeOrStop => {
                    if now.saturating_duration_since(self.tick_query_rwin) > self.config.win_cycle {
                        self.send_small(io, dest, &wire::encode_win_probe());
                        self.counters.query_rwin += 1;
                    }
                    break;
                }
                Decision::Resend(seq, payload, was_fast) => {
                    self.transmit_data(io, dest, seq, &payload);
                    let frame = self.send_list.get_mut(i).expect("frame still present");
                    let interval = frame
                        .tick_timeout
                        .expect("resent frame has a timeout")
                        .saturating_duration_since(frame.tick_send.expect("resent frame was sent"));
                    frame.tick_timeout = Some(frame.tick_timeout.unwrap() + interval / 2);
                    frame.flags.remove(FrameFlags::FAST_RESEND);
                    frame.flags.insert(FrameFlags::RETRANSMITTED);
                    if was_fast {
                        self.counters.resend_fast += 1;
                        log::debug!("ffrdp: fast resend seq={seq}");
                    } else {
                        self.counters.resend_rto += 1;
                        log::debug!("ffrdp: rto resend seq={seq}");
                    }
                    if self.rtt.rto() == self.rtt.max_rto() {
                        break;
                    }
                }
                Decision::Skip => {}
            }
            i += 1;
        }
    }

    /// Drains the socket and classifies every datagram. Returns whether any
    /// DATA frame was usefully received, plus the locally-accumulated
    /// cumulative-ack state needed by `phase_apply_acks` (these mirror the
    /// reference's per-tick local variables; they are never stored on
    /// `Engine` itself).
    fn phase_receive(&mut self, io: &mut impl DatagramIo, now: Instant) -> (bool, Seq, u32, u32) {
        let _ = io.wait_readable(RECV_WAIT);

        let mut got_data = false;
        let mut send_una_local = self.send_list.head_seq().unwrap_or(self.send_seq);
        let mut send_mack: u32 = 0;
        let mut advertised_win = self.recv_win;

        let mut buf = vec![0u8; self.config.mtu + 8];
        loop {
            let (n, src) = match io.recv_from(&mut buf) {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(e) => {
                    log::debug!("ffrdp: recv_from failed: {e}");
                    break;
                }
            };
            let datagram = &buf[..n];

            match self.role {
                Role::Server => {
                    if !self.connected {
                        self.peer_addr = Some(src);
                        self.connected = true;
                    } else if self.peer_addr != Some(src) {
                        log::debug!("ffrdp: dropped datagram from unexpected peer {src}");
                        continue;
                    }
                }
                Role::Client => {
                    if self.peer_addr.is_some() && self.peer_addr != Some(src) {
                        continue;
                    }
                }
            }

            let Some(wire_frame) = wire::decode(datagram) else {
                log::debug!("ffrdp: dropped malformed frame from {src}");
                continue;
            };

            match wire_frame {
                WireFrame::Data { fec_seq: _, .. } => {
                    if let Some(header_and_payload) = self.fec.decode_in(datagram) {
                        if let Some((seq, payload)) =
                            wire::decode_data_header_and_payload(&header_and_payload)
                        {
                            got_data = true;
                            if seq.distance(self.recv_seq) >= 0 {
                                self.recv_list.enqueue(Frame::new(seq, payload));
                            }
                        }
                    }
                }
                WireFrame::Ack { una, mack, window } => {
                    let mack = mack as u32;
                    let d = una.distance(send_una_local);
                    if d == 0 {
                        send_mack |= mack;
                    } else if d > 0 {
                        send_una_local = una;
                        send_mack = send_mack.checked_shr(d as u32).unwrap_or(0) | mack;
                        advertised_win = window as u32;
                    }
                }
                WireFrame::WinProbe => {
                    let hole = self
                        .recv_list
                        .head_seq()
                        .is_some_and(|head| head != self.recv_seq);
                    let free = if hole { 0 } else { self.ring.free_space() as u32 };
                    if let Some(dest) = self.dest() {
                        self.send_small(io, dest, &wire::encode_win_reply(free as u16));
                    }
                }
                WireFrame::WinReply { window } => {
                    self.recv_win = window as u32;
                    self.tick_query_rwin = now;
                }
                WireFrame::Bye => {
                    log::debug!("ffrdp: received BYE");
                    match self.role {
                        Role::Server => {
                            if let Some(dest) = self.dest() {
                                self.send_small(io, dest, &wire::encode_bye());
                            }
                            self.reset(now);
                        }
                        Role::Client => {
                            self.bye_peer = true;
                            self.reset(now);
                        }
                    }
                    // The reference synchronously drains every datagram still
                    // queued at reset time rather than classifying it against
                    // fresh (post-reset) session state. Mirror that here.
                    loop {
                        match io.recv_from(&mut buf) {
                            Ok(Some(_)) => continue,
                            _ => break,
                        }
                    }
                    return (false, send_una_local, send_mack, advertised_win);
                }
            }
        }

        if self.role == Role::Client && self.bye_local && !self.bye_peer {
            if let Some(dest) = self.dest() {
                self.send_small(io, dest, &wire::encode_bye());
            }
        }

        (got_data, send_una_local, send_mack, advertised_win)
    }

    fn phase_deliver_and_ack(&mut self, io: &mut impl DatagramIo, _now: Instant) {
        while let Some(head) = self.recv_list.front() {
            if head.seq != self.recv_seq {
                break;
            }
            if head.payload.len() > self.ring.free_space() {
                break;
            }
            let frame = self.recv_list.pop_front().expect("front just checked Some");
            self.ring.write(&frame.payload);
            self.recv_seq = self.recv_seq.next();
        }

        let mut mack: u16 = 0;
        for (i, frame) in self.recv_list.iter().enumerate() {
            if i >= 16 {
                break;
            }
            let dist = frame.seq.distance(self.recv_seq);
            if (2..=16).contains(&dist) {
                mack |= 1 << (dist - 1);
            }
        }

        let hole = self
            .recv_list
            .head_seq()
            .is_some_and(|head| head != self.recv_seq);
        let window = if hole { self.ring.free_space() as u16 } else { 0 };

        if let Some(dest) = self.dest() {
            let ack = wire::encode_ack(self.recv_seq, mack, window);
            self.send_small(io, dest, &ack);
        }
    }

    fn phase_apply_acks(&mut self, send_una_local: Seq, send_mack: u32, advertised_win: u32, now: Instant) {
        let Some(head_seq) = self.send_list.head_seq() else { return };
        if send_una_local.distance(head_seq) <= 0 {
            return;
        }
        self.recv_win = advertised_win;
        self.tick_query_rwin = now;

        let highest_bit = (0..16).rev().find(|i| send_mack & (1 << i) != 0);
        let maxack = match highest_bit {
            Some(i) => send_una_local.wrapping_add(i as u32 + 1),
            None => send_una_local.wrapping_add(0u32.wrapping_sub(1)),
        };

        let mut i = 0;
        while let Some(frame) = self.send_list.get_mut(i) {
            let d = frame.seq.distance(send_una_local);
            if d > 16 || !frame.flags.contains(FrameFlags::FIRST_SENT) {
                break;
            }
            let acked = d < 0 || (d > 0 && send_mack & (1 << (d - 1)) != 0);
            if acked {
                if !frame.flags.contains(FrameFlags::RETRANSMITTED) {
                    let sample = now.saturating_duration_since(
                        frame.tick_send.expect("acked frame was sent"),
                    );
                    self.rtt.sample(sample);
                }
                self.send_list.remove_at(i);
                continue;
            } else if maxack.distance(frame.seq) > 0 {
                frame.flags.insert(FrameFlags::FAST_RESEND);
            }
            i += 1;
        }
    }

    /// Drops both lists, zeroes sequences and RTT state, and clears the
    /// connected/bye-local flags. `bye_peer` is deliberately left untouched —
    /// the reference sets it and then clears it again in the very same
    /// teardown, a no-op; this implementation keeps it set so a client can
    /// observe that the last session ended because the peer said goodbye.
    fn reset(&mut self, now: Instant) {
        self.send_seq = Seq::ZERO;
        self.recv_seq = Seq::ZERO;
        self.send_list.clear();
        self.recv_list.clear();
        self.ring = RecvRing::new(self.config.recv_ring_size);
        self.rtt = RttEstimator::with_bounds(self.config.min_rto, self.config.max_rto);
        self.recv_win = (self.config.recv_ring_size / 2) as u32;
        self.tick_query_rwin = now;
        self.connected = false;
        self.bye_local = false;
        if self.role == Role::Server {
            self.peer_addr = None;
        }
        self.counters = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_list_splits_into_mtu_chunks() {
        let now = Instant::now();
        let mut config = Config::default();
        config.mtu = 1024;
        let mut engine = Engine::new(Role::Client, None, config, now);
        let accepted = engine.enqueue_send(&vec![7u8; 2500]);
        assert_eq!(accepted, 2500);
        assert_eq!(engine.wait_snd(), 3);
    }

    #[test]
    fn frames_needed_rounds_up() {
        let config = Config::default();
        let engine = Engine::new(Role::Client, None, config, Instant::now());
        assert_eq!(engine.frames_needed(1), 1);
        assert_eq!(engine.frames_needed(1024), 1);
        assert_eq!(engine.frames_needed(1025), 2);
    }
}
