//! # Ames Core
//!
//! The peer state machine and event dispatch of the transport. One
//! [`Ames`] value owns the full peer map. Every external input (a
//! packet, a local request, a timer fire, a PKI notification) is one
//! [`Task`] handed to [`Ames::handle`], which runs to completion and
//! returns the [`Effect`]s for the host to interpret: packets to
//! write, timers to arm, gifts for local subsystems.
//!
//! The core is single-threaded and deterministic: no clocks are read,
//! no I/O is performed, and identical task sequences replay to
//! identical state and effects.

pub mod channel;
pub mod engine;
pub mod hear;
pub mod peer;
pub mod routing;
pub mod state;

use ames_flow::FlowError;
use ames_proto::{Bone, ErrorTrace, Life, Pass, Plea, ProtoError, Rift, Ring, Ship};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmesError {
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("no keys for {0}")]
    UnknownPeer(Ship),
    #[error("life tick mismatch from {0}")]
    TickMismatch(Ship),
    #[error("attestation rejected: {0}")]
    BadAttestation(&'static str),
    #[error("no private keys at life {0}")]
    MissingRing(Life),
}

/// Opaque local-caller identifier, mapped to a bone by the ossuary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Duct(pub Vec<String>);

impl Duct {
    pub fn new(path: &[&str]) -> Self {
        Duct(path.iter().map(|s| s.to_string()).collect())
    }
}

/// A network-layer address: either a galaxy the runtime resolves, or
/// opaque bytes the runtime hands back to the OS as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lane {
    Galaxy(Ship),
    Opaque(Bytes),
}

impl Lane {
    /// The six-byte forwarding breadcrumb, when this lane fits one.
    pub fn origin(&self) -> Option<[u8; 6]> {
        match self {
            Lane::Opaque(bytes) if bytes.len() == 6 => {
                let mut origin = [0u8; 6];
                origin.copy_from_slice(bytes);
                Some(origin)
            }
            _ => None,
        }
    }

    pub fn from_origin(origin: [u8; 6]) -> Lane {
        Lane::Opaque(Bytes::copy_from_slice(&origin))
    }
}

/// Canonical timer identity: timers are armed and cancelled by this
/// key, never by an opaque handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerWire {
    pub ship: Ship,
    pub bone: Bone,
}

/// Wire attached to local deliveries; `done`/`boon` come back on it.
/// Events carrying a rift older than the peer's current one are
/// silently discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoneWire {
    pub ship: Ship,
    pub rift: Rift,
    pub bone: Bone,
}

/// One record of a ship in the PKI's public state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkiRecord {
    pub life: Life,
    pub pass: Pass,
    pub rift: Rift,
    pub sponsor: Option<Ship>,
}

/// Notifications from the PKI oracle.
#[derive(Debug, Clone)]
pub enum PkiEvent {
    /// Our own key material changed.
    OurPrivateKeys {
        life: Life,
        rings: BTreeMap<Life, Ring>,
    },
    /// Full public-state snapshot.
    Full(BTreeMap<Ship, PkiRecord>),
    /// A ship rotated its keys.
    Rekey { ship: Ship, life: Life, pass: Pass },
    /// A ship changed sponsors.
    Sponsor { ship: Ship, sponsor: Ship },
    /// A ship declared a new continuity epoch.
    Rift { ship: Ship, rift: Rift },
    /// A ship breached continuity outright.
    Breach(Ship),
}

/// Requests back to the PKI oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkiRequest {
    /// Subscribe to a ship's public keys.
    View(Ship),
}

/// Everything the host can ask of the transport.
#[derive(Debug, Clone)]
pub enum Task {
    /// Host restarted; remember this duct for host-directed gifts.
    Born { duct: Duct },
    /// A raw packet arrived on `lane`. `dud` reports that a previous
    /// delivery of this event crashed upstream.
    Hear {
        lane: Lane,
        blob: Bytes,
        dud: Option<ErrorTrace>,
    },
    /// The local consumer's verdict on the outstanding delivery.
    Done {
        wire: BoneWire,
        error: Option<ErrorTrace>,
    },
    /// A local response on an inbound request flow.
    Boon { wire: BoneWire, payload: Bytes },
    /// Subscribe to a peer's liveness events.
    Heed { duct: Duct, ship: Ship },
    Jilt { duct: Duct, ship: Ship },
    /// Enqueue a request message to `ship`.
    Plea { duct: Duct, ship: Ship, plea: Plea },
    /// Reset congestion state for these peers.
    Prod(Vec<Ship>),
    /// Restrict debug output to these ships (empty clears).
    Sift(Vec<Ship>),
    /// Toggle verbosity flags by tag name.
    Spew(Vec<String>),
    /// Drop all inbound packets from these ships.
    Snub(Vec<Ship>),
    /// Re-arm timers lost across a reload.
    Stir,
    /// Memory-pressure notification; nothing to shed here.
    Trim,
    /// Kernel reload notification; nothing to migrate here.
    Vega,
    /// A named timer fired.
    Wake(TimerWire),
    Pki(PkiEvent),
}

/// Gifts to local subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gift {
    /// Final word on a plea this duct sent: `None` is success, `Some`
    /// carries the peer's naxplanation.
    Done(Option<ErrorTrace>),
    /// A response message on a flow this duct opened.
    Boon(Bytes),
    /// A response arrived but could not be processed locally.
    Lost,
    /// The peer is unresponsive and its response flows are backed up.
    Clog(Ship),
    /// Current galaxy domains, given to the host duct at birth.
    Turf(Vec<String>),
}

/// Everything the transport can ask of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send { lane: Lane, blob: Bytes },
    Wait { wire: TimerWire, at: Instant },
    Rest { wire: TimerWire },
    Give { duct: Duct, gift: Gift },
    /// An inbound plea for a local subsystem; `done` comes back on the
    /// wire.
    Deliver { wire: BoneWire, plea: Plea },
    Pki(PkiRequest),
    Log(String),
}

pub use channel::Channel;
pub use engine::Ames;
pub use peer::{AlienAgenda, Ossuary, Peer, PeerState, Qos, QosKind, Route};
pub use state::StateSnapshot;
