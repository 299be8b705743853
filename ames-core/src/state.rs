//! Persisted state and the migration ladder.
//!
//! A snapshot is the whole transport value: identity, key rings, and
//! the peer map. Transient timing (armed timers, send timestamps, QoS
//! clocks) is deliberately excluded; a post-load `stir` re-arms what
//! matters. Old snapshot shapes migrate forward one version at a
//! time.

use crate::engine::{Ames, Verb};
use crate::peer::Peer;
use crate::{AmesError, Duct};
use ames_proto::{Life, Rift, Ring, Ship};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The shape shipped before the snub list and debug surface existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateV1 {
    pub our: Ship,
    pub life: Life,
    pub rift: Rift,
    pub rings: BTreeMap<Life, Ring>,
    pub peers: HashMap<Ship, Peer>,
    pub unix_duct: Option<Duct>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateSnapshot {
    V1(StateV1),
    V2(Ames),
}

impl StateSnapshot {
    pub fn current(ames: Ames) -> Self {
        StateSnapshot::V2(ames)
    }

    /// Advance the snapshot to the newest shape by composing the
    /// per-version transforms.
    pub fn migrate(self) -> Ames {
        match self {
            StateSnapshot::V1(v1) => StateSnapshot::V2(v1_to_v2(v1)).migrate(),
            StateSnapshot::V2(ames) => ames,
        }
    }

    pub fn encode(&self) -> Result<Bytes, AmesError> {
        Ok(ames_proto::jam(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AmesError> {
        Ok(ames_proto::cue(bytes)?)
    }
}

fn v1_to_v2(v1: StateV1) -> Ames {
    Ames {
        our: v1.our,
        life: v1.life,
        rift: v1.rift,
        rings: v1.rings,
        peers: v1.peers,
        unix_duct: v1.unix_duct,
        turfs: Vec::new(),
        snub: Default::default(),
        veb: Verb::default(),
        sift: Default::default(),
    }
}
