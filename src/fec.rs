//! Optional XOR forward error correction over groups of full-MTU DATA frames.
//!
//! Modeled as a pluggable coder (Design Notes §9) rather than a compile-time
//! `#[cfg]` switch: the engine only ever talks to the `FecCodec` trait, so
//! `NoFec` (the default) and `XorFec` are interchangeable at `Endpoint`
//! construction time.

use crate::wire::MTU_PAYLOAD;

/// Number of consecutive full-MTU data frames per FEC group, including the
/// trailing parity frame (`R - 1` data frames + 1 parity frame).
pub const FEC_REDUNDANCY: u16 = 8;

/// One outbound frame as seen by the FEC layer: header-and-payload bytes (sans
/// the 2-byte FEC trailer) plus the trailer value to stamp on it.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub fec_seq: u16,
}

/// FEC-specific counters surfaced by `Endpoint::dump`, per the data model's
/// "FEC counters when enabled". `NoFec` always reports zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FecStats {
    /// Frames reconstructed from parity after exactly one group member was missing.
    pub recovered: u64,
    /// Parity groups with more than one missing member, left unrecovered.
    pub unrecoverable: u64,
}

/// Engine-facing coder interface: transforms one logical send into zero or
/// more wire transmissions, and reconstructs missing frames on receive.
pub trait FecCodec: std::fmt::Debug {
    /// Called once per outbound full-wire-size DATA frame (header + payload,
    /// trailer not yet appended). Returns the frames to actually put on the
    /// wire: normally just the input frame, stamped with a FEC sequence,
    /// occasionally followed by a parity frame.
    fn encode_out(&mut self, header_and_payload: &[u8]) -> Vec<EncodedFrame>;

    /// Called for every inbound DATA frame (full header+payload+trailer
    /// bytes as received off the wire). Returns `Some(header_and_payload)` —
    /// trailer stripped — when a usable frame is available: either the frame
    /// itself (pass-through / pure data member) or a recovered frame
    /// reconstructed from parity. Returns `None` when the frame is consumed
    /// only to update internal FEC state (e.g. an unrecoverable parity frame).
    fn decode_in(&mut self, full_wire_frame: &[u8]) -> Option<Vec<u8>>;

    /// Recovery counters accumulated so far. `NoFec` reports zeros; `XorFec`
    /// tracks how many frames it reconstructed versus gave up on.
    fn stats(&self) -> FecStats {
        FecStats::default()
    }
}

/// Default no-op coder: every frame passes straight through, with a zeroed trailer.
#[derive(Debug, Default)]
pub struct NoFec;

impl FecCodec for NoFec {
    fn encode_out(&mut self, header_and_payload: &[u8]) -> Vec<EncodedFrame> {
        vec![EncodedFrame {
            bytes: header_and_payload.to_vec(),
            fec_seq: 0,
        }]
    }

    fn decode_in(&mut self, full_wire_frame: &[u8]) -> Option<Vec<u8>> {
        Some(full_wire_frame[..full_wire_frame.len() - 2].to_vec())
    }
}

/// Full on-wire frame length for a full-MTU DATA frame: 4-byte header + MTU payload + 2-byte trailer.
const FULL_FRAME_LEN: usize = 4 + MTU_PAYLOAD + 2;

#[derive(Debug)]
pub struct XorFec {
    /// Group size, including the parity frame. Defaults to `FEC_REDUNDANCY`
    /// but configurable per `FecConfig::redundancy`.
    redundancy: u16,
    tx_accumulator: Vec<u8>,
    tx_group_seq: u16,
    rx_accumulator: Vec<u8>,
    rx_group_seq: u16,
    /// Bitmask of which of the `redundancy` positions in the current rx group have arrived.
    rx_mask: u32,
    stats: FecStats,
}

/// Length of a full-MTU frame's header+payload, i.e. `FULL_FRAME_LEN` minus the 2-byte trailer.
const MEMBER_LEN: usize = FULL_FRAME_LEN - 2;

impl Default for XorFec {
    fn default() -> Self {
        XorFec::with_redundancy(FEC_REDUNDANCY)
    }
}

impl XorFec {
    pub fn new() -> XorFec {
        XorFec::default()
    }

    /// Builds a coder with a non-default group size, per `FecConfig::redundancy`.
    pub fn with_redundancy(redundancy: u16) -> XorFec {
        XorFec {
            redundancy,
            tx_accumulator: vec![0u8; MEMBER_LEN],
            tx_group_seq: 0,
            rx_accumulator: vec![0u8; MEMBER_LEN],
            rx_group_seq: 0,
            rx_mask: 0,
            stats: FecStats::default(),
        }
    }

    fn position(&self, seq: u16) -> u16 {
        seq % self.redundancy
    }
}

impl FecCodec for XorFec {
    fn encode_out(&mut self, header_and_payload: &[u8]) -> Vec<EncodedFrame> {
        // Short frames bypass FEC entirely.
        if header_and_payload.len() != MEMBER_LEN {
            return vec![EncodedFrame {
                bytes: header_and_payload.to_vec(),
                fec_seq: 0,
            }];
        }

        let mut out = Vec::with_capacity(2);
        let this_seq = self.tx_group_seq;
        self.tx_group_seq = self.tx_group_seq.wrapping_add(1);

        out.push(EncodedFrame {
            bytes: header_and_payload.to_vec(),
            fec_seq: this_seq,
        });

        for (acc, b) in self.tx_accumulator.iter_mut().zip(header_and_payload) {
            *acc ^= *b;
        }

        if self.position(this_seq) == self.redundancy - 1 {
            let parity_seq = self.tx_group_seq;
            self.tx_group_seq = self.tx_group_seq.wrapping_add(1);
            // Parity frame's type byte is overwritten to DATA (0) by the caller
            // when it transmits this as a DATA frame; here we only hand back
            // the accumulated header+payload bytes.
            out.push(EncodedFrame {
                bytes: self.tx_accumulator.clone(),
                fec_seq: parity_seq,
            });
            self.tx_accumulator.iter_mut().for_each(|b| *b = 0);
        }

        out
    }

    fn decode_in(&mut self, full_wire_frame: &[u8]) -> Option<Vec<u8>> {
        if full_wire_frame.len() != FULL_FRAME_LEN {
            // Short frame, bypass.
            return Some(full_wire_frame[..full_wire_frame.len() - 2].to_vec());
        }
        let member = &full_wire_frame[..MEMBER_LEN];
        let fec_seq = u16::from_le_bytes(
            full_wire_frame[MEMBER_LEN..]
                .try_into()
                .expect("slice has exactly 2 bytes"),
        );
        let this_group = fec_seq / self.redundancy;
        let tracked_group = self.rx_group_seq / self.redundancy;

        if this_group != tracked_group {
            self.rx_accumulator.copy_from_slice(member);
            self.rx_group_seq = fec_seq;
            let pos = self.position(fec_seq);
            self.rx_mask = 1 << pos;
            // A fresh group's first member can't yet be verified as complete;
            // surface it as-is (pass-through), same as the reference — unless
            // it's the parity position itself, which carries no payload to
            // deliver (the reference's `fecseq % R != R-1 ? 0 : -1`).
            if pos == self.redundancy - 1 {
                return None;
            }
            return Some(member.to_vec());
        }

        self.rx_group_seq = fec_seq;
        let pos = self.position(fec_seq);
        if self.rx_mask & (1 << pos) == 0 {
            for (acc, b) in self.rx_accumulator.iter_mut().zip(member) {
                *acc ^= *b;
            }
            self.rx_mask |= 1 << pos;
        }

        if pos == self.redundancy - 1 {
            let full_mask = (1u32 << self.redundancy) - 1;
            if self.rx_mask == full_mask {
                // Nothing missing; the parity frame itself carries no payload we need.
                return None;
            }
            let missing = (0..self.redundancy - 1)
                .filter(|i| self.rx_mask & (1 << i) == 0)
                .count();
            if missing != 1 {
                self.stats.unrecoverable += 1;
                return None;
            }
            self.stats.recovered += 1;
            let mut recovered = self.rx_accumulator.clone();
            recovered[0] = 0; // DATA frame type
            return Some(recovered);
        }

        Some(member.to_vec())
    }

    fn stats(&self) -> FecStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_frame(fill: u8) -> Vec<u8> {
        vec![fill; FULL_FRAME_LEN - 2]
    }

    #[test]
    fn no_fec_passes_through_unchanged() {
        let mut codec = NoFec;
        let frame = full_frame(9);
        let out = codec.encode_out(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, frame);
        assert_eq!(out[0].fec_seq, 0);
    }

    #[test]
    fn xor_fec_emits_parity_after_redundancy_minus_one_frames() {
        let mut codec = XorFec::new();
        let mut total_out = 0;
        for i in 0..(FEC_REDUNDANCY - 1) {
            let out = codec.encode_out(&full_frame(i as u8));
            total_out += out.len();
        }
        // R-1 data frames queued, parity emitted on the last one.
        assert_eq!(total_out, FEC_REDUNDANCY as usize);
    }

    #[test]
    fn short_frames_bypass_fec() {
        let mut codec = XorFec::new();
        let short = vec![1, 2, 3];
        let out = codec.encode_out(&short);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fec_seq, 0);
    }

    #[test]
    fn recovers_single_missing_frame_from_parity() {
        let mut tx = XorFec::new();
        let mut members = Vec::new();
        for i in 0..(FEC_REDUNDANCY - 1) {
            let frame = full_frame(i as u8 + 1);
            let encoded = tx.encode_out(&frame);
            for e in encoded {
                let mut full = e.bytes.clone();
                full.extend_from_slice(&e.fec_seq.to_le_bytes());
                members.push(full);
            }
        }
        assert_eq!(members.len(), FEC_REDUNDANCY as usize);

        let mut rx = XorFec::new();
        // Drop position 2 (index 2), feed everything else including parity.
        let dropped_index = 2;
        let mut recovered = None;
        for (i, m) in members.iter().enumerate() {
            if i == dropped_index {
                continue;
            }
            if let Some(bytes) = rx.decode_in(m) {
                if i == members.len() - 1 {
                    recovered = Some(bytes);
                }
            }
        }
        let recovered = recovered.expect("parity frame should have recovered the missing member");
        let missing_original = &members[dropped_index][..FULL_FRAME_LEN - 2];
        assert_eq!(&recovered[1..FULL_FRAME_LEN - 2], &missing_original[1..]);
        assert_eq!(rx.stats().recovered, 1);
        assert_eq!(rx.stats().unrecoverable, 0);
    }

    #[test]
    fn fresh_group_whose_first_seen_member_is_the_parity_frame_yields_no_payload() {
        let mut tx = XorFec::new();
        let mut members = Vec::new();
        // Two full groups: group 0 (positions 0..7) and group 1 (positions 8..15).
        for group in 0..2u8 {
            for i in 0..(FEC_REDUNDANCY - 1) {
                let frame = full_frame(group * FEC_REDUNDANCY as u8 + i as u8 + 1);
                let encoded = tx.encode_out(&frame);
                for e in encoded {
                    let mut full = e.bytes.clone();
                    full.extend_from_slice(&e.fec_seq.to_le_bytes());
                    members.push(full);
                }
            }
        }
        assert_eq!(members.len(), 2 * FEC_REDUNDANCY as usize);

        // Rx has never seen group 0 at all; the very first frame it observes
        // is group 1's parity frame (position redundancy-1). It must not be
        // surfaced as a deliverable payload.
        let mut rx = XorFec::new();
        let group_1_parity = &members[2 * FEC_REDUNDANCY as usize - 1];
        assert_eq!(rx.decode_in(group_1_parity), None);
    }

    #[test]
    fn gives_up_when_more_than_one_member_missing() {
        let mut tx = XorFec::new();
        let mut members = Vec::new();
        for i in 0..(FEC_REDUNDANCY - 1) {
            let frame = full_frame(i as u8 + 1);
            let encoded = tx.encode_out(&frame);
            for e in encoded {
                let mut full = e.bytes.clone();
                full.extend_from_slice(&e.fec_seq.to_le_bytes());
                members.push(full);
            }
        }

        let mut rx = XorFec::new();
        let mut last = None;
        for (i, m) in members.iter().enumerate() {
            if i == 1 || i == 3 {
                continue; // drop two members
            }
            last = rx.decode_in(m);
        }
        assert!(last.is_none());
        assert_eq!(rx.stats().unrecoverable, 1);
        assert_eq!(rx.stats().recovered, 0);
    }
}
