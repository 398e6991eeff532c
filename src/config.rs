//! Tuning knobs for an `Endpoint`.
//!
//! The reference hardcodes these as C `#define`s; this crate keeps the exact
//! same default values (§6 of the design notes) but exposes them as fields so
//! callers can tune a single endpoint without touching the transport engine,
//! the way the teacher exposes `r2`/`r2_syn` as settable fields on `TcpStream`
//! rather than baking them into the protocol logic.

use std::time::Duration;

use crate::rtt::{MAX_RTO, MIN_RTO};
use crate::wire::MTU_PAYLOAD;

#[derive(Debug, Clone, Copy)]
pub struct FecConfig {
    /// Number of full-MTU data frames per parity group, including the parity frame itself.
    pub redundancy: u16,
}

impl Default for FecConfig {
    fn default() -> Self {
        FecConfig {
            redundancy: crate::fec::FEC_REDUNDANCY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub mtu: usize,
    pub recv_ring_size: usize,
    pub min_rto: Duration,
    pub max_rto: Duration,
    pub win_cycle: Duration,
    pub max_waitsnd: usize,
    pub flowctl: usize,
    pub sock_rcvbuf: usize,
    /// `None` disables FEC (the default); `Some` selects `XorFec` at construction time.
    pub fec: Option<FecConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: MTU_PAYLOAD,
            recv_ring_size: crate::ring::RECV_RING_CAPACITY,
            min_rto: MIN_RTO,
            max_rto: MAX_RTO,
            win_cycle: Duration::from_millis(100),
            max_waitsnd: 256,
            flowctl: 32,
            sock_rcvbuf: 128 * MTU_PAYLOAD,
            fec: None,
        }
    }
}
