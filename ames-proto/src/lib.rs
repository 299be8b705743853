//! # Ames Proto
//!
//! Wire-level building blocks for the Ames transport: ship identity,
//! epoch newtypes, the bit-exact packet codec, message payload
//! serialization, and the packet crypto (AES-SIV shut packets and
//! signed open-packet attestations).
//!
//! Everything here is pure data: no clocks, no I/O, no per-peer state.

pub mod crypto;
pub mod mug;
pub mod packet;
pub mod ship;
pub mod wire;

use thiserror::Error;

/// Errors produced while encoding, decoding, or unsealing wire data.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("reserved header bits set")]
    ReservedBits,
    #[error("packet decryption failed")]
    Decrypt,
    #[error("attestation signature invalid")]
    BadSignature,
    #[error("attestation key does not hash to sender address")]
    BadFingerprint,
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
}

pub use crypto::{shared_key, Pass, Ring, SymmetricKey};
pub use mug::mug;
pub use packet::Packet;
pub use ship::{Class, Ship};
pub use wire::{
    cue, jam, AckMeat, Attestation, Bone, ErrorTrace, FlowKind, FragmentNum, Life, Meat,
    MessageNum, Naxplanation, OpenMeat, Plea, Rift, ShutPayload,
};

/// Fragments are at most this many bytes of message payload.
pub const FRAGMENT_SIZE: usize = 1024;
