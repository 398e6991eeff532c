//! Wire frame encode/decode.
//!
//! Every frame begins with a 4-byte header: byte 0 is the frame type, and for
//! DATA/ACK frames bytes 1..4 hold a little-endian 24-bit sequence number
//! packed as `type | (seq << 8)` inside the first 32-bit word.

use crate::seq::Seq;

pub const MTU_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data = 0,
    Ack = 1,
    WinProbe = 2,
    WinReply = 3,
    Bye = 4,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<FrameType> {
        match b {
            0 => Some(FrameType::Data),
            1 => Some(FrameType::Ack),
            2 => Some(FrameType::WinProbe),
            3 => Some(FrameType::WinReply),
            4 => Some(FrameType::Bye),
            _ => None,
        }
    }
}

/// A decoded wire message. Owns its payload so it can be queued without
/// borrowing the receive scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Data {
        seq: Seq,
        payload: Vec<u8>,
        /// FEC group sequence trailer; zero when FEC is disabled.
        fec_seq: u16,
    },
    Ack {
        una: Seq,
        mack: u16,
        window: u16,
    },
    WinProbe,
    WinReply {
        window: u16,
    },
    Bye,
}

fn pack_type_seq(ty: FrameType, seq: Seq) -> [u8; 4] {
    let word = (ty as u32) | (seq.get() << 8);
    word.to_le_bytes()
}

fn unpack_seq(word: u32) -> Seq {
    Seq::new(word >> 8)
}

/// Encodes a DATA frame: 4-byte header, payload (<= MTU_PAYLOAD), 2-byte FEC trailer.
pub fn encode_data(seq: Seq, payload: &[u8], fec_seq: u16) -> Vec<u8> {
    debug_assert!(payload.len() <= MTU_PAYLOAD);
    let mut out = Vec::with_capacity(4 + payload.len() + 2);
    out.extend_from_slice(&pack_type_seq(FrameType::Data, seq));
    out.extend_from_slice(payload);
    out.extend_from_slice(&fec_seq.to_le_bytes());
    out
}

/// Encodes just the 4-byte header plus payload of a DATA frame, with no FEC
/// trailer appended. This is the shape the `FecCodec` seam operates on: the
/// codec stamps its own trailer (or splits into multiple wire frames) on top
/// of this.
pub fn encode_data_header_and_payload(seq: Seq, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MTU_PAYLOAD);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&pack_type_seq(FrameType::Data, seq));
    out.extend_from_slice(payload);
    out
}

/// Decodes header+payload bytes (no trailer) produced by `FecCodec::decode_in`
/// back into a sequence number and payload. Unlike `decode`, this never looks
/// at a trailer, since the FEC seam has already consumed or stripped it.
pub fn decode_data_header_and_payload(buf: &[u8]) -> Option<(Seq, Vec<u8>)> {
    if buf.len() < 4 {
        return None;
    }
    let word = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    if (word & 0xFF) as u8 != FrameType::Data as u8 {
        return None;
    }
    Some((unpack_seq(word), buf[4..].to_vec()))
}

/// Encodes an ACK frame: 4-byte header, 2-byte selective-ack mask, 2-byte window.
pub fn encode_ack(una: Seq, mack: u16, window: u16) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&pack_type_seq(FrameType::Ack, una));
    out[4..6].copy_from_slice(&mack.to_le_bytes());
    out[6..8].copy_from_slice(&window.to_le_bytes());
    out
}

pub fn encode_win_probe() -> [u8; 1] {
    [FrameType::WinProbe as u8]
}

pub fn encode_win_reply(window: u16) -> [u8; 3] {
    let mut out = [0u8; 3];
    out[0] = FrameType::WinReply as u8;
    out[1..3].copy_from_slice(&window.to_le_bytes());
    out
}

pub fn encode_bye() -> [u8; 1] {
    [FrameType::Bye as u8]
}

/// Decodes a raw datagram into a `WireFrame`. Returns `None` for truncated or
/// unrecognized frames; these are silently dropped per the error-handling design
/// (peer misbehavior never causes a panic or teardown).
pub fn decode(buf: &[u8]) -> Option<WireFrame> {
    if buf.is_empty() {
        return None;
    }
    let ty = FrameType::from_byte(buf[0])?;
    match ty {
        FrameType::Data => {
            if buf.len() < 6 {
                return None;
            }
            let word = u32::from_le_bytes(buf[0..4].try_into().ok()?);
            let seq = unpack_seq(word);
            let payload = buf[4..buf.len() - 2].to_vec();
            let fec_seq = u16::from_le_bytes(buf[buf.len() - 2..].try_into().ok()?);
            Some(WireFrame::Data {
                seq,
                payload,
                fec_seq,
            })
        }
        FrameType::Ack => {
            if buf.len() < 8 {
                return None;
            }
            let word = u32::from_le_bytes(buf[0..4].try_into().ok()?);
            let una = unpack_seq(word);
            let mack = u16::from_le_bytes(buf[4..6].try_into().ok()?);
            let window = u16::from_le_bytes(buf[6..8].try_into().ok()?);
            Some(WireFrame::Ack { una, mack, window })
        }
        FrameType::WinProbe => Some(WireFrame::WinProbe),
        FrameType::WinReply => {
            if buf.len() < 3 {
                return None;
            }
            let window = u16::from_le_bytes(buf[1..3].try_into().ok()?);
            Some(WireFrame::WinReply { window })
        }
        FrameType::Bye => Some(WireFrame::Bye),
    }
}
