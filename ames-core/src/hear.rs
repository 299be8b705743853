//! The inbound packet path: decode, snub, forward-or-consume, tick
//! check, decrypt, and dispatch to the owning flow.

use crate::engine::Ames;
use crate::peer::{PeerState, Route};
use crate::{AmesError, Effect, Lane, PkiRequest};
use ames_proto::crypto::verify_attestation;
use ames_proto::packet::Packet;
use ames_proto::{
    cue, jam, shared_key, AckMeat, Bone, Class, ErrorTrace, FragmentNum, Life, Meat, MessageNum,
    OpenMeat, Rift,
};
use bytes::Bytes;
use tracing::debug;

impl Ames {
    pub(crate) fn on_hear(
        &mut self,
        now: std::time::Instant,
        lane: Lane,
        blob: Bytes,
        dud: Option<ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) {
        let packet = match Packet::decode(&blob) {
            Ok(packet) => packet,
            Err(error) => {
                self.verb(self.veb.odd, self.our, || format!("undecodable packet: {}", error));
                return;
            }
        };
        if self.snub.contains(&packet.sndr) {
            self.verb(self.veb.odd, packet.sndr, || "snubbed".to_string());
            return;
        }
        if packet.rcvr != self.our {
            self.forward(lane, packet, fx);
            return;
        }
        let her = packet.sndr;
        let result = if packet.sealed {
            self.hear_shut(now, lane, packet, dud.as_ref(), fx)
        } else {
            self.hear_open(now, lane, packet, fx)
        };
        if let Err(error) = result {
            // Protocol failure: drop the packet, skip the ack path.
            self.verb(self.veb.odd, her, || format!("dropped packet: {}", error));
            debug!(ship = %her, %error, "dropped inbound packet");
        }
    }

    /// An encrypted packet from a known peer: check both life ticks,
    /// decrypt under the channel, learn the route, and dispatch the
    /// payload to its flow.
    fn hear_shut(
        &mut self,
        now: std::time::Instant,
        lane: Lane,
        packet: Packet,
        dud: Option<&ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) -> Result<(), AmesError> {
        let her = packet.sndr;
        let Some(peer) = self.known(her) else {
            // No keys: ask the PKI and drop.
            fx.push(Effect::Pki(PkiRequest::View(her)));
            return Err(AmesError::UnknownPeer(her));
        };
        if packet.rcvr_tick != self.life.tick() || packet.sndr_tick != peer.life.tick() {
            return Err(AmesError::TickMismatch(her));
        }
        let channel = crate::Channel::new(self.our, self.life, her, peer);
        let payload = channel.open(&packet.content)?;

        // An authenticated packet proves liveness and teaches a route:
        // straight from the peer is direct, a forwarded packet's
        // origin is indirect.
        self.on_contact(now, her, fx);
        if let Some(peer) = self.known_mut(her) {
            peer.route = Some(match packet.origin {
                None => Route { direct: true, lane },
                Some(origin) => Route {
                    direct: false,
                    lane: Lane::from_origin(origin),
                },
            });
        }

        let bone = payload.bone.flip_side();
        match payload.meat {
            Meat::Fragment {
                num_fragments,
                fragment_num,
                bytes,
            } => self.hear_fragment(
                now,
                her,
                bone,
                payload.message_num,
                num_fragments,
                fragment_num,
                bytes,
                dud,
                fx,
            ),
            Meat::Ack(meat) => {
                self.hear_ack(now, her, bone, payload.message_num, meat, fx);
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn hear_fragment(
        &mut self,
        now: std::time::Instant,
        her: ames_proto::Ship,
        bone: Bone,
        message_num: MessageNum,
        num_fragments: FragmentNum,
        fragment_num: FragmentNum,
        bytes: Bytes,
        dud: Option<&ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) -> Result<(), AmesError> {
        self.verb(self.veb.rcv, her, || {
            format!(
                "hear fragment {}/{} of {} on bone {}",
                fragment_num, num_fragments, message_num, bone
            )
        });
        let mut gifts = Vec::new();
        {
            let Some(peer) = self.known_mut(her) else {
                return Err(AmesError::UnknownPeer(her));
            };
            let sink = peer.rcv.entry(bone).or_default();
            sink.hear_fragment(message_num, num_fragments, fragment_num, bytes, &mut gifts)?;
        }
        self.process_sink_gifts(now, her, bone, gifts, dud, fx);
        Ok(())
    }

    fn hear_ack(
        &mut self,
        now: std::time::Instant,
        her: ames_proto::Ship,
        bone: Bone,
        message_num: MessageNum,
        meat: AckMeat,
        fx: &mut Vec<Effect>,
    ) {
        let mut gifts = Vec::new();
        {
            // Acks for a flow we never pumped on are stale; ignore.
            let Some(pump) = self.known_mut(her).and_then(|p| p.snd.get_mut(&bone)) else {
                return;
            };
            match meat {
                AckMeat::Fragment(fragment_num) => {
                    pump.hear_fragment_ack(now, message_num, fragment_num, &mut gifts)
                }
                AckMeat::Message { ok, lag_ms } => {
                    pump.hear_message_ack(now, message_num, ok, lag_ms, &mut gifts)
                }
            }
        }
        self.process_pump_gifts(now, her, bone, gifts, fx);
    }

    /// Plaintext content: either a keys-request (answered by comets
    /// with an attestation) or a comet's self-attestation.
    fn hear_open(
        &mut self,
        now: std::time::Instant,
        lane: Lane,
        packet: Packet,
        fx: &mut Vec<Effect>,
    ) -> Result<(), AmesError> {
        match cue::<OpenMeat>(&packet.content)? {
            OpenMeat::KeysRequest => {
                if !self.our.is_comet() {
                    return Err(AmesError::BadAttestation("keys-request to non-comet"));
                }
                let her_life = self
                    .known(packet.sndr)
                    .map(|peer| peer.life)
                    .unwrap_or(Life(1));
                let meat = self
                    .current_ring()?
                    .attest(self.our, packet.sndr, her_life)?;
                let reply = Packet {
                    sndr: self.our,
                    rcvr: packet.sndr,
                    req: true,
                    sam: true,
                    sndr_tick: self.life.tick(),
                    rcvr_tick: packet.sndr_tick,
                    origin: None,
                    sealed: false,
                    content: jam(&meat)?,
                };
                // Introduce ourselves straight back down the arrival
                // lane.
                fx.push(Effect::Send {
                    lane,
                    blob: reply.encode(),
                });
                Ok(())
            }
            OpenMeat::Attest { signature, body } => {
                let attestation = verify_attestation(&signature, &body)?;
                if attestation.rcvr != self.our {
                    return Err(AmesError::BadAttestation("attested to someone else"));
                }
                if attestation.sndr != packet.sndr {
                    return Err(AmesError::BadAttestation("sender mismatch"));
                }
                let sponsor = attestation.sndr.default_sponsor();
                if sponsor.class() != Class::Star {
                    return Err(AmesError::BadAttestation("comet sponsor must be a star"));
                }
                if self.known(packet.sndr).is_some() {
                    // Re-attestation of a known comet; nothing changes.
                    return Ok(());
                }
                let ring = self.current_ring()?.clone();
                let mut state = PeerState::new(
                    shared_key(&ring, &attestation.pass),
                    Life(1),
                    Rift(0),
                    attestation.pass,
                    sponsor,
                );
                state.route = Some(Route {
                    direct: false,
                    lane,
                });
                self.verb(self.veb.ges, packet.sndr, || "comet attested".to_string());
                self.promote(now, packet.sndr, state, fx);
                Ok(())
            }
        }
    }

    /// A packet that is not for us: stamp the origin breadcrumb if the
    /// sender has not already been relayed, re-encode, and pass it
    /// toward the receiver. Amplification defense is the runtime's
    /// problem, not ours.
    fn forward(&mut self, lane: Lane, mut packet: Packet, fx: &mut Vec<Effect>) {
        self.verb(self.veb.fwd, packet.rcvr, || {
            format!("forward from {} to {}", packet.sndr, packet.rcvr)
        });
        if packet.origin.is_none() && !packet.sndr.is_galaxy() {
            packet.origin = lane.origin();
        }
        let rcvr = packet.rcvr;
        self.send_blob(rcvr, packet.encode(), fx);
    }
}
