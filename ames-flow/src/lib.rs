//! # Ames Flow
//!
//! The per-flow engines of the transport: the outbound [`MessagePump`]
//! (fragmentation, retransmission, in-order ack delivery), the
//! [`PacketPump`] it owns (congestion control and the retransmit
//! queue), and the inbound [`MessageSink`] (reassembly, duplicate
//! suppression, ack scheduling).
//!
//! Everything is a synchronous state machine: entry points take
//! `now: Instant`, mutate state, and push gifts for the caller to
//! interpret. No clocks, no I/O, no async.

pub mod packet_pump;
pub mod pump;
pub mod rtt;
pub mod sink;

use ames_proto::{AckMeat, ErrorTrace, FragmentNum, MessageNum, FRAGMENT_SIZE};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Flow-level protocol violations. These crash the event, not the
/// process; the dispatch layer drops the packet and logs a trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("fragment count mismatch on message {0}")]
    FragmentCountMismatch(MessageNum),
    #[error("fragment {1} out of range on message {0}")]
    FragmentOutOfRange(MessageNum, FragmentNum),
}

/// A fragment that has not been sliced out of its message yet. The
/// whole blob is shared; the 1 KiB window is cut at encryption time so
/// large messages never pay a quadratic copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticFragment {
    pub message_num: MessageNum,
    pub num_fragments: FragmentNum,
    pub fragment_num: FragmentNum,
    pub blob: Bytes,
}

impl StaticFragment {
    /// Number of fragments a blob of this size divides into. The empty
    /// message still occupies one fragment.
    pub fn count_for(blob_len: usize) -> FragmentNum {
        FragmentNum(blob_len.div_ceil(FRAGMENT_SIZE).max(1) as u32)
    }

    /// The actual payload window for this fragment.
    pub fn slice(&self) -> Bytes {
        let start = self.fragment_num.0 as usize * FRAGMENT_SIZE;
        let end = (start + FRAGMENT_SIZE).min(self.blob.len());
        self.blob.slice(start..end)
    }

    pub fn key(&self) -> (MessageNum, FragmentNum) {
        (self.message_num, self.fragment_num)
    }
}

/// What a message pump hands back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpGift {
    /// Encrypt and transmit this fragment.
    Send(StaticFragment),
    /// The peer's final word on a message, in strict send order.
    Done {
        num: MessageNum,
        error: Option<ErrorTrace>,
    },
    /// Arm the flow timer at this instant.
    Wait(Instant),
    /// Cancel the flow timer.
    Rest,
}

/// What a message sink hands back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkGift {
    /// Transmit this acknowledgment on the flow.
    Ack { num: MessageNum, meat: AckMeat },
    /// Offer a completed message to the local consumer. At most one is
    /// outstanding; the next is offered when `done` comes back.
    Deliver { num: MessageNum, blob: Bytes },
}

pub use packet_pump::{LivePacket, Metrics, PacketPump};
pub use pump::{MessagePump, QueuedAck};
pub use sink::MessageSink;
