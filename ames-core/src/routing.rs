//! Sponsor-chain routing: where a blob for a ship actually goes.

use crate::engine::Ames;
use crate::peer::Peer;
use crate::{Effect, Lane};
use ames_proto::Ship;
use bytes::Bytes;
use smallvec::SmallVec;

impl Ames {
    /// Walk the sponsor chain from `to` until the blob has somewhere
    /// to go. Direct routes end the walk; indirect routes transmit
    /// and keep climbing so a galaxy can relay around a stale lane;
    /// galaxies always have a synthetic direct route by address.
    pub(crate) fn send_blob(&mut self, to: Ship, blob: Bytes, fx: &mut Vec<Effect>) {
        let mut visited: SmallVec<[Ship; 8]> = SmallVec::new();
        let mut candidate = to;
        let mut sent = false;
        loop {
            if visited.contains(&candidate) || candidate == self.our {
                break;
            }
            visited.push(candidate);
            if candidate.is_galaxy() {
                fx.push(Effect::Send {
                    lane: Lane::Galaxy(candidate),
                    blob: blob.clone(),
                });
                sent = true;
                break;
            }
            match self.peers.get(&candidate) {
                Some(Peer::Known(peer)) => match &peer.route {
                    Some(route) => {
                        fx.push(Effect::Send {
                            lane: route.lane.clone(),
                            blob: blob.clone(),
                        });
                        sent = true;
                        if route.direct {
                            break;
                        }
                        candidate = peer.sponsor;
                    }
                    None => candidate = peer.sponsor,
                },
                // Unknown ships (comets included) climb their address
                // hierarchy.
                _ => candidate = candidate.default_sponsor(),
            }
        }
        if !sent {
            // Nowhere to send it yet; hold the blob on the alien
            // agenda until keys or a route appear.
            if let Some(Peer::Alien(agenda)) = self.peers.get_mut(&to) {
                agenda.packets.push(blob);
            }
        }
    }
}
