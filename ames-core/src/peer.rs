//! Per-peer state: crypto material, route, QoS, the duct-to-bone
//! ossuary, and the flow maps.

use crate::{Duct, Lane};
use ames_flow::{MessagePump, MessageSink};
use ames_proto::{Bone, Life, MessageNum, Pass, Plea, Rift, Ship, SymmetricKey};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

/// A peer we have referenced but hold no keys for yet. Everything is
/// queued until the PKI (or a comet attestation) promotes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlienAgenda {
    /// Pleas awaiting keys, with the ducts that sent them.
    pub messages: Vec<(Duct, Plea)>,
    /// Raw packet blobs awaiting a route.
    pub packets: Vec<Bytes>,
    /// Liveness subscriptions awaiting the peer itself.
    pub heeds: HashSet<Duct>,
}

/// Liveness classification with the time of last contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosKind {
    /// Never heard from.
    Unborn,
    Live,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qos {
    pub kind: QosKind,
    #[serde(skip)]
    pub last_contact: Option<Instant>,
}

impl Default for Qos {
    fn default() -> Self {
        Qos {
            kind: QosKind::Unborn,
            last_contact: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// A direct route ends the sponsor walk; an indirect one keeps
    /// relaying through sponsors in case it is stale.
    pub direct: bool,
    pub lane: Lane,
}

/// Bidirectional duct-to-bone map. Bones advance by four so the two
/// low bits stay free for flow classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ossuary {
    by_duct: HashMap<Duct, Bone>,
    by_bone: HashMap<Bone, Duct>,
    next_bone: u32,
}

impl Ossuary {
    /// The bone for a local caller, allocating on first reference.
    pub fn bone_for(&mut self, duct: &Duct) -> Bone {
        if let Some(bone) = self.by_duct.get(duct) {
            return *bone;
        }
        let bone = Bone(self.next_bone);
        self.next_bone += 4;
        self.by_duct.insert(duct.clone(), bone);
        self.by_bone.insert(bone, duct.clone());
        bone
    }

    pub fn duct_for(&self, bone: Bone) -> Option<&Duct> {
        self.by_bone.get(&bone)
    }

    pub fn is_empty(&self) -> bool {
        self.by_duct.is_empty()
    }
}

/// Full state for a peer whose keys we hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    pub symmetric_key: SymmetricKey,
    pub life: Life,
    pub rift: Rift,
    pub pass: Pass,
    pub sponsor: Ship,
    pub route: Option<Route>,
    pub qos: Qos,
    pub ossuary: Ossuary,
    pub snd: HashMap<Bone, MessagePump>,
    pub rcv: HashMap<Bone, MessageSink>,
    /// Nacked inbound messages awaiting the sender's drop
    /// acknowledgement, keyed by the flow that nacked.
    pub nax: BTreeSet<(Bone, MessageNum)>,
    /// Ducts subscribed to this peer's liveness.
    pub heeds: HashSet<Duct>,
}

impl PeerState {
    pub fn new(symmetric_key: SymmetricKey, life: Life, rift: Rift, pass: Pass, sponsor: Ship) -> Self {
        PeerState {
            symmetric_key,
            life,
            rift,
            pass,
            sponsor,
            route: None,
            qos: Qos::default(),
            ossuary: Ossuary::default(),
            snd: HashMap::new(),
            rcv: HashMap::new(),
            nax: BTreeSet::new(),
            heeds: HashSet::new(),
        }
    }

    /// In-flight plus unsent load across response flows, the clog
    /// metric.
    pub fn backward_backlog(&self) -> usize {
        self.snd
            .iter()
            .filter(|(bone, _)| bone.is_backward())
            .map(|(_, pump)| pump.backlog())
            .sum()
    }

    /// Oldest outstanding nack on one flow, for correlating a
    /// naxplanation delivery back to the message it explained.
    pub fn oldest_nack_on(&self, bone: Bone) -> Option<MessageNum> {
        self.nax
            .iter()
            .find(|(nack_bone, _)| *nack_bone == bone)
            .map(|(_, num)| *num)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum Peer {
    Alien(AlienAgenda),
    Known(PeerState),
}
