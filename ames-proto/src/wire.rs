//! Message-level wire structures and their serialization.
//!
//! Packet *headers* are hand-packed bitfields (see [`crate::packet`]).
//! Everything above them goes through the MessagePack codec behind
//! [`jam`]/[`cue`]: shut-packet plaintexts, attestation bodies, pleas,
//! naxplanations, and persisted snapshots.

use crate::ship::Ship;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

macro_rules! wire_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            Serialize,
            Deserialize,
        )]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

wire_newtype!(Life, u32, "Key epoch of a ship; bumps on every rekey.");
wire_newtype!(
    Rift,
    u32,
    "Continuity epoch of a ship; bumping it discards all message state."
);
wire_newtype!(
    MessageNum,
    u32,
    "Per-flow message sequence number, starting at 0."
);
wire_newtype!(
    FragmentNum,
    u32,
    "Index of a fragment within a message (0 to num_fragments - 1)."
);

impl Life {
    /// Four-bit epoch tick carried in the packet header.
    pub fn tick(self) -> u8 {
        (self.0 % 16) as u8
    }
}

impl MessageNum {
    pub fn next(self) -> Self {
        MessageNum(self.0 + 1)
    }
}

/// Per-peer flow identifier. The low two bits classify the flow; the
/// rest is an ossuary-assigned counter (advancing by 4).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Bone(pub u32);

/// What a bone means from the holder's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// bit pattern ..00: we are the requester; pump sends pleas, sink
    /// hears boons.
    ForwardOurs,
    /// ..01: we are the responder; sink hears pleas, pump sends boons.
    BackwardTheirs,
    /// ..10: sink hears naxplanations for our pleas on `bone ^ 0b10`.
    NaxTraceHear,
    /// ..11: pump sends naxplanations for pleas heard on `bone ^ 0b10`.
    NaxTraceSend,
}

impl Bone {
    /// The two peers view one flow with opposite polarity: flip the low
    /// bit when moving a bone across the wire.
    pub fn flip_side(self) -> Bone {
        Bone(self.0 ^ 0b1)
    }

    /// The paired nack-trace bone (both directions of the pairing).
    pub fn nax_partner(self) -> Bone {
        Bone(self.0 ^ 0b10)
    }

    pub fn kind(self) -> FlowKind {
        match self.0 & 0b11 {
            0b00 => FlowKind::ForwardOurs,
            0b01 => FlowKind::BackwardTheirs,
            0b10 => FlowKind::NaxTraceHear,
            _ => FlowKind::NaxTraceSend,
        }
    }

    /// Backward flows carry responses we originate (boons and
    /// naxplanations).
    pub fn is_backward(self) -> bool {
        matches!(self.kind(), FlowKind::BackwardTheirs | FlowKind::NaxTraceSend)
    }
}

impl std::fmt::Display for Bone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The plaintext of a shut packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutPayload {
    pub bone: Bone,
    pub message_num: MessageNum,
    pub meat: Meat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meat {
    Fragment {
        num_fragments: FragmentNum,
        fragment_num: FragmentNum,
        bytes: Bytes,
    },
    Ack(AckMeat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckMeat {
    /// A single fragment arrived.
    Fragment(FragmentNum),
    /// The whole message was processed; `ok = false` is a nack. `lag`
    /// reports receiver-side processing delay in milliseconds.
    Message { ok: bool, lag_ms: u64 },
}

/// Unencrypted packet content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMeat {
    /// Ask a comet to introduce itself with an attestation.
    KeysRequest,
    /// A comet self-attestation: `signature` covers `body`, the
    /// serialized [`Attestation`], exactly as transmitted.
    Attest { signature: Bytes, body: Bytes },
}

/// The signed body of a comet self-attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub pass: crate::crypto::Pass,
    pub sndr: Ship,
    pub sndr_life: Life,
    pub rcvr: Ship,
    pub rcvr_life: Life,
}

/// Terminal-failure payload carried by nacks and naxplanations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub tag: String,
    pub stack: Vec<String>,
}

impl ErrorTrace {
    pub fn new(tag: impl Into<String>) -> Self {
        ErrorTrace {
            tag: tag.into(),
            stack: Vec::new(),
        }
    }
}

/// A full message on a nack-trace flow explaining why `num` on the
/// paired flow was nacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Naxplanation {
    pub num: MessageNum,
    pub error: ErrorTrace,
}

/// Request envelope offered to (and accepted from) the local router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plea {
    /// Target subsystem tag on the remote ship.
    pub vane: String,
    pub path: Vec<String>,
    pub payload: Bytes,
}

pub fn jam<T: Serialize>(val: &T) -> Result<Bytes, crate::ProtoError> {
    Ok(Bytes::from(rmp_serde::to_vec(val)?))
}

pub fn cue<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, crate::ProtoError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
