//! The bit-exact packet codec.
//!
//! A packet is a 32-bit little-endian header word followed by the
//! sender and receiver addresses at their rank widths, an optional
//! six-byte forwarding origin, and the content. Header fields are
//! packed low-to-high:
//!
//! | bits  | field                                   |
//! |-------|-----------------------------------------|
//! | 0-1   | sender address rank                     |
//! | 2-3   | receiver address rank                   |
//! | 4     | request flag (request = 1, ack = 0)     |
//! | 5     | sample flag (always 1)                  |
//! | 6-9   | sender life tick                        |
//! | 10-13 | receiver life tick                      |
//! | 14    | origin present                          |
//! | 15    | sealed (1 = encrypted content)          |
//! | 16-31 | reserved, must be zero                  |

use crate::ship::{rank_len, Ship};
use crate::ProtoError;
use bytes::Bytes;

pub const ORIGIN_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sndr: Ship,
    pub rcvr: Ship,
    pub req: bool,
    pub sam: bool,
    pub sndr_tick: u8,
    pub rcvr_tick: u8,
    pub origin: Option<[u8; ORIGIN_LEN]>,
    pub sealed: bool,
    pub content: Bytes,
}

impl Packet {
    pub fn encode(&self) -> Bytes {
        let sndr_rank = self.sndr.rank();
        let rcvr_rank = self.rcvr.rank();

        let mut header: u32 = 0;
        header |= sndr_rank as u32;
        header |= (rcvr_rank as u32) << 2;
        header |= (self.req as u32) << 4;
        header |= (self.sam as u32) << 5;
        header |= ((self.sndr_tick & 0xf) as u32) << 6;
        header |= ((self.rcvr_tick & 0xf) as u32) << 10;
        header |= (self.origin.is_some() as u32) << 14;
        header |= (self.sealed as u32) << 15;

        let sndr_len = rank_len(sndr_rank);
        let rcvr_len = rank_len(rcvr_rank);
        let mut out = Vec::with_capacity(
            4 + sndr_len + rcvr_len + self.origin.map_or(0, |_| ORIGIN_LEN) + self.content.len(),
        );
        out.extend_from_slice(&header.to_le_bytes());
        out.extend_from_slice(&self.sndr.0.to_le_bytes()[..sndr_len]);
        out.extend_from_slice(&self.rcvr.0.to_le_bytes()[..rcvr_len]);
        if let Some(origin) = self.origin {
            out.extend_from_slice(&origin);
        }
        out.extend_from_slice(&self.content);
        Bytes::from(out)
    }

    pub fn decode(blob: &[u8]) -> Result<Packet, ProtoError> {
        if blob.len() < 4 {
            return Err(ProtoError::Malformed("short header"));
        }
        let header = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        if header >> 16 != 0 {
            return Err(ProtoError::ReservedBits);
        }

        let sndr_rank = (header & 0b11) as u8;
        let rcvr_rank = ((header >> 2) & 0b11) as u8;
        let req = (header >> 4) & 1 == 1;
        let sam = (header >> 5) & 1 == 1;
        let sndr_tick = ((header >> 6) & 0xf) as u8;
        let rcvr_tick = ((header >> 10) & 0xf) as u8;
        let has_origin = (header >> 14) & 1 == 1;
        let sealed = (header >> 15) & 1 == 1;

        let mut at = 4;
        let sndr = take_ship(blob, &mut at, sndr_rank)?;
        let rcvr = take_ship(blob, &mut at, rcvr_rank)?;

        let origin = if has_origin {
            if blob.len() < at + ORIGIN_LEN {
                return Err(ProtoError::Malformed("short origin"));
            }
            let mut origin = [0u8; ORIGIN_LEN];
            origin.copy_from_slice(&blob[at..at + ORIGIN_LEN]);
            at += ORIGIN_LEN;
            Some(origin)
        } else {
            None
        };

        Ok(Packet {
            sndr,
            rcvr,
            req,
            sam,
            sndr_tick,
            rcvr_tick,
            origin,
            sealed,
            content: Bytes::copy_from_slice(&blob[at..]),
        })
    }
}

fn take_ship(blob: &[u8], at: &mut usize, rank: u8) -> Result<Ship, ProtoError> {
    let len = rank_len(rank);
    if blob.len() < *at + len {
        return Err(ProtoError::Malformed("short address"));
    }
    let mut word = [0u8; 16];
    word[..len].copy_from_slice(&blob[*at..*at + len]);
    *at += len;
    Ok(Ship(u128::from_le_bytes(word)))
}
