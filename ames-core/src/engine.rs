//! The event handler: one [`Ames`] value, one task at a time, effects
//! out. Per-flow work is delegated to the pumps and sinks in
//! `ames-flow`; this module owns peer resolution, the alien agenda,
//! QoS, clog detection, and the PKI surface.

use crate::channel::Channel;
use crate::peer::{AlienAgenda, Peer, PeerState, Qos, QosKind, Route};
use crate::{
    AmesError, BoneWire, Duct, Effect, Gift, Lane, PkiEvent, PkiRecord, PkiRequest, Task,
    TimerWire,
};
use ames_flow::{PumpGift, SinkGift};
use ames_proto::packet::Packet;
use ames_proto::{
    cue, jam, shared_key, Bone, ErrorTrace, FlowKind, Life, Meat, Naxplanation, OpenMeat, Plea,
    Rift, Ring, Ship,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A peer is declared dead this long after its last contact.
pub const DEAD_INTERVAL: Duration = Duration::from_secs(30);
/// Backed-up response messages that make an unresponsive peer clogged.
pub const CLOG_THRESHOLD: usize = 5;

/// Debug verbosity toggles, one per traffic class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verb {
    pub snd: bool,
    pub rcv: bool,
    pub odd: bool,
    pub msg: bool,
    pub ges: bool,
    pub fwd: bool,
    pub rot: bool,
}

impl Verb {
    pub fn toggle(&mut self, tag: &str) {
        match tag {
            "snd" => self.snd = !self.snd,
            "rcv" => self.rcv = !self.rcv,
            "odd" => self.odd = !self.odd,
            "msg" => self.msg = !self.msg,
            "ges" => self.ges = !self.ges,
            "for" => self.fwd = !self.fwd,
            "rot" => self.rot = !self.rot,
            _ => {}
        }
    }
}

/// The whole transport: identity, keys, and the peer map. This is
/// also the persisted state; see [`crate::state`] for versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ames {
    pub our: Ship,
    pub life: Life,
    pub rift: Rift,
    pub rings: BTreeMap<Life, Ring>,
    pub peers: HashMap<Ship, Peer>,
    pub unix_duct: Option<Duct>,
    pub turfs: Vec<String>,
    pub snub: HashSet<Ship>,
    pub veb: Verb,
    pub sift: HashSet<Ship>,
}

impl Ames {
    pub fn new(our: Ship, life: Life, rift: Rift, rings: BTreeMap<Life, Ring>) -> Self {
        Ames {
            our,
            life,
            rift,
            rings,
            peers: HashMap::new(),
            unix_duct: None,
            turfs: Vec::new(),
            snub: HashSet::new(),
            veb: Verb::default(),
            sift: HashSet::new(),
        }
    }

    /// Process one external input to completion and collect the
    /// outbound effects. Protocol violations never escape: they are
    /// logged and the offending packet is dropped, ack path skipped.
    pub fn handle(&mut self, now: Instant, task: Task) -> Vec<Effect> {
        let mut fx = Vec::new();
        match task {
            Task::Born { duct } => {
                fx.push(Effect::Give {
                    duct: duct.clone(),
                    gift: Gift::Turf(self.turfs.clone()),
                });
                self.unix_duct = Some(duct);
            }
            Task::Hear { lane, blob, dud } => self.on_hear(now, lane, blob, dud, &mut fx),
            Task::Done { wire, error } => self.on_done(now, wire, error, &mut fx),
            Task::Boon { wire, payload } => self.on_boon(now, wire, payload, &mut fx),
            Task::Heed { duct, ship } => self.on_heed(duct, ship),
            Task::Jilt { duct, ship } => self.on_jilt(&duct, ship),
            Task::Plea { duct, ship, plea } => self.on_plea(now, duct, ship, plea, &mut fx),
            Task::Prod(ships) => self.on_prod(now, &ships, &mut fx),
            Task::Sift(ships) => self.sift = ships.into_iter().collect(),
            Task::Spew(tags) => {
                for tag in tags {
                    self.veb.toggle(&tag);
                }
            }
            Task::Snub(ships) => self.snub = ships.into_iter().collect(),
            Task::Stir => self.on_stir(now, &mut fx),
            Task::Trim | Task::Vega => {}
            Task::Wake(wire) => self.on_wake(now, wire, &mut fx),
            Task::Pki(event) => self.on_pki(now, event, &mut fx),
        }
        fx
    }

    pub(crate) fn known(&self, ship: Ship) -> Option<&PeerState> {
        match self.peers.get(&ship) {
            Some(Peer::Known(peer)) => Some(peer),
            _ => None,
        }
    }

    pub(crate) fn known_mut(&mut self, ship: Ship) -> Option<&mut PeerState> {
        match self.peers.get_mut(&ship) {
            Some(Peer::Known(peer)) => Some(peer),
            _ => None,
        }
    }

    pub(crate) fn channel(&self, her: Ship) -> Option<Channel> {
        self.known(her)
            .map(|peer| Channel::new(self.our, self.life, her, peer))
    }

    pub(crate) fn current_ring(&self) -> Result<&Ring, AmesError> {
        self.rings.get(&self.life).ok_or(AmesError::MissingRing(self.life))
    }

    pub(crate) fn verb(&self, on: bool, ship: Ship, line: impl FnOnce() -> String) {
        if on && (self.sift.is_empty() || self.sift.contains(&ship)) {
            debug!(ship = %ship, "{}", line());
        }
    }

    // ----- local requests -----

    fn on_plea(&mut self, now: Instant, duct: Duct, ship: Ship, plea: Plea, fx: &mut Vec<Effect>) {
        match self.peers.get_mut(&ship) {
            None => {
                let mut agenda = AlienAgenda::default();
                agenda.messages.push((duct, plea));
                self.peers.insert(ship, Peer::Alien(agenda));
                self.request_keys(ship, fx);
            }
            Some(Peer::Alien(agenda)) => agenda.messages.push((duct, plea)),
            Some(Peer::Known(_)) => {
                self.verb(self.veb.snd, ship, || {
                    format!("plea {} {:?}", plea.vane, plea.path)
                });
                let blob = match jam(&plea) {
                    Ok(blob) => blob,
                    Err(error) => {
                        warn!(%ship, %error, "unserializable plea");
                        return;
                    }
                };
                let Some(peer) = self.known_mut(ship) else {
                    return;
                };
                let bone = peer.ossuary.bone_for(&duct);
                let mut gifts = Vec::new();
                peer.snd.entry(bone).or_default().memo(now, blob, &mut gifts);
                self.process_pump_gifts(now, ship, bone, gifts, fx);
            }
        }
    }

    /// First reference to an unknown ship: comets introduce themselves
    /// over the wire, everyone else is looked up in the PKI.
    fn request_keys(&mut self, ship: Ship, fx: &mut Vec<Effect>) {
        if !ship.is_comet() {
            fx.push(Effect::Pki(PkiRequest::View(ship)));
            return;
        }
        let content = match jam(&OpenMeat::KeysRequest) {
            Ok(content) => content,
            Err(_) => return,
        };
        let packet = Packet {
            sndr: self.our,
            rcvr: ship,
            req: true,
            sam: true,
            sndr_tick: self.life.tick(),
            rcvr_tick: 0,
            origin: None,
            sealed: false,
            content,
        };
        self.send_blob(ship, packet.encode(), fx);
    }

    fn on_boon(&mut self, now: Instant, wire: BoneWire, payload: Bytes, fx: &mut Vec<Effect>) {
        let Some(peer) = self.known_mut(wire.ship) else {
            return;
        };
        if wire.rift < peer.rift {
            // Response to a pre-breach flow; the flow no longer exists.
            return;
        }
        let mut gifts = Vec::new();
        peer.snd
            .entry(wire.bone)
            .or_default()
            .memo(now, payload, &mut gifts);
        self.process_pump_gifts(now, wire.ship, wire.bone, gifts, fx);
    }

    fn on_done(
        &mut self,
        now: Instant,
        wire: BoneWire,
        error: Option<ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) {
        let Some(peer) = self.known(wire.ship) else {
            return;
        };
        if wire.rift < peer.rift {
            return;
        }
        self.apply_sink_done(now, wire.ship, wire.bone, error, fx);
    }

    fn on_heed(&mut self, duct: Duct, ship: Ship) {
        match self.peers.get_mut(&ship) {
            Some(Peer::Known(peer)) => {
                peer.heeds.insert(duct);
            }
            Some(Peer::Alien(agenda)) => {
                agenda.heeds.insert(duct);
            }
            None => {
                let mut agenda = AlienAgenda::default();
                agenda.heeds.insert(duct);
                self.peers.insert(ship, Peer::Alien(agenda));
            }
        }
    }

    fn on_jilt(&mut self, duct: &Duct, ship: Ship) {
        match self.peers.get_mut(&ship) {
            Some(Peer::Known(peer)) => {
                peer.heeds.remove(duct);
            }
            Some(Peer::Alien(agenda)) => {
                agenda.heeds.remove(duct);
            }
            None => {}
        }
    }

    fn on_prod(&mut self, now: Instant, ships: &[Ship], fx: &mut Vec<Effect>) {
        for &ship in ships {
            let Some(peer) = self.known_mut(ship) else {
                continue;
            };
            let bones: Vec<Bone> = peer.snd.keys().copied().collect();
            for bone in bones {
                let mut gifts = Vec::new();
                if let Some(pump) = self.known_mut(ship).and_then(|p| p.snd.get_mut(&bone)) {
                    pump.prod(now, &mut gifts);
                }
                self.process_pump_gifts(now, ship, bone, gifts, fx);
            }
        }
    }

    fn on_stir(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        let flows: Vec<(Ship, Bone)> = self
            .peers
            .iter()
            .filter_map(|(ship, peer)| match peer {
                Peer::Known(peer) => Some((*ship, peer)),
                Peer::Alien(_) => None,
            })
            .flat_map(|(ship, peer)| peer.snd.keys().map(move |bone| (ship, *bone)))
            .collect();
        for (ship, bone) in flows {
            let mut gifts = Vec::new();
            if let Some(pump) = self.known_mut(ship).and_then(|p| p.snd.get_mut(&bone)) {
                pump.stir(now, &mut gifts);
            }
            self.process_pump_gifts(now, ship, bone, gifts, fx);
        }
    }

    fn on_wake(&mut self, now: Instant, wire: TimerWire, fx: &mut Vec<Effect>) {
        let mut gifts = Vec::new();
        match self.known_mut(wire.ship).and_then(|p| p.snd.get_mut(&wire.bone)) {
            Some(pump) => pump.wake(now, &mut gifts),
            // Stray wake for a dead flow; nothing to re-arm.
            None => return,
        }
        self.process_pump_gifts(now, wire.ship, wire.bone, gifts, fx);
        self.check_qos_timeout(now, wire.ship, fx);
    }

    // ----- flow gift plumbing -----

    /// Interpret one pump's gifts: fragments become shut packets, done
    /// results route to the caller, timer changes become wait/rest
    /// effects on this flow's wire.
    pub(crate) fn process_pump_gifts(
        &mut self,
        now: Instant,
        her: Ship,
        bone: Bone,
        gifts: Vec<PumpGift>,
        fx: &mut Vec<Effect>,
    ) {
        let Some(channel) = self.channel(her) else {
            return;
        };
        let wire = TimerWire { ship: her, bone };
        let mut sends: Vec<Bytes> = Vec::new();
        let mut dropped_nacks: Vec<(Bone, ames_proto::MessageNum)> = Vec::new();
        {
            let Some(peer) = self.known_mut(her) else {
                return;
            };
            for gift in gifts {
                match gift {
                    PumpGift::Send(fragment) => {
                        let meat = Meat::Fragment {
                            num_fragments: fragment.num_fragments,
                            fragment_num: fragment.fragment_num,
                            bytes: fragment.slice(),
                        };
                        match channel.shut_blob(bone, fragment.message_num, meat) {
                            Ok(blob) => sends.push(blob),
                            Err(error) => warn!(%her, %error, "failed to seal fragment"),
                        }
                    }
                    PumpGift::Done { num, error } => match bone.kind() {
                        FlowKind::ForwardOurs => {
                            if let Some(duct) = peer.ossuary.duct_for(bone) {
                                fx.push(Effect::Give {
                                    duct: duct.clone(),
                                    gift: Gift::Done(error),
                                });
                            }
                        }
                        FlowKind::BackwardTheirs => {
                            // A boon of ours was acked; responses carry
                            // no local completion.
                        }
                        FlowKind::NaxTraceSend => {
                            // Our naxplanation arrived: release the
                            // dedup entry it explained.
                            let partner = bone.nax_partner();
                            if let Some(nacked) = peer.oldest_nack_on(partner) {
                                peer.nax.remove(&(partner, nacked));
                                dropped_nacks.push((partner, nacked));
                            }
                        }
                        FlowKind::NaxTraceHear => {}
                    },
                    PumpGift::Wait(at) => fx.push(Effect::Wait { wire, at }),
                    PumpGift::Rest => fx.push(Effect::Rest { wire }),
                }
            }
            for (partner, nacked) in &dropped_nacks {
                if let Some(sink) = peer.rcv.get_mut(partner) {
                    sink.drop_nack(*nacked);
                }
            }
        }
        for blob in sends {
            self.send_blob(her, blob, fx);
        }
    }

    /// Interpret one sink's gifts: acks become shut packets, completed
    /// messages dispatch by flow kind.
    pub(crate) fn process_sink_gifts(
        &mut self,
        now: Instant,
        her: Ship,
        bone: Bone,
        gifts: Vec<SinkGift>,
        dud: Option<&ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) {
        let Some(channel) = self.channel(her) else {
            return;
        };
        for gift in gifts {
            match gift {
                SinkGift::Ack { num, meat } => {
                    match channel.shut_blob(bone, num, Meat::Ack(meat)) {
                        Ok(blob) => self.send_blob(her, blob, fx),
                        Err(error) => warn!(%her, %error, "failed to seal ack"),
                    }
                }
                SinkGift::Deliver { num, blob } => {
                    self.dispatch_delivery(now, her, bone, num, blob, dud, fx);
                }
            }
        }
    }

    /// A fully reassembled message: a plea goes to the local router, a
    /// boon to its requesting duct, a naxplanation to the paired pump.
    fn dispatch_delivery(
        &mut self,
        now: Instant,
        her: Ship,
        bone: Bone,
        num: ames_proto::MessageNum,
        blob: Bytes,
        dud: Option<&ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) {
        match bone.kind() {
            FlowKind::BackwardTheirs => {
                if let Some(dud) = dud {
                    // The previous delivery of this event crashed:
                    // nack instead of redelivering.
                    self.apply_sink_done(now, her, bone, Some(dud.clone()), fx);
                    return;
                }
                match cue::<Plea>(&blob) {
                    Ok(plea) => {
                        let rift = self.known(her).map(|p| p.rift).unwrap_or_default();
                        self.verb(self.veb.msg, her, || {
                            format!("hear plea {} on bone {}", plea.vane, bone)
                        });
                        fx.push(Effect::Deliver {
                            wire: BoneWire {
                                ship: her,
                                rift,
                                bone,
                            },
                            plea,
                        });
                    }
                    Err(_) => {
                        let error = ErrorTrace::new("ames-plea-malformed");
                        self.apply_sink_done(now, her, bone, Some(error), fx);
                    }
                }
            }
            FlowKind::ForwardOurs => {
                // A response on a flow we opened. Boons ack on
                // delivery; a crashed redelivery becomes a loss
                // notice, never a nack.
                let gift = if dud.is_some() {
                    Gift::Lost
                } else {
                    Gift::Boon(blob)
                };
                self.verb(self.veb.msg, her, || {
                    format!("hear boon {} on bone {}", num, bone)
                });
                if let Some(duct) = self
                    .known(her)
                    .and_then(|peer| peer.ossuary.duct_for(bone).cloned())
                {
                    fx.push(Effect::Give { duct, gift });
                }
                self.apply_sink_done(now, her, bone, None, fx);
            }
            FlowKind::NaxTraceHear => {
                // The peer explains a nack on the paired forward flow.
                if let Ok(naxplanation) = cue::<Naxplanation>(&blob) {
                    let partner = bone.nax_partner();
                    let mut gifts = Vec::new();
                    if let Some(pump) = self.known_mut(her).and_then(|p| p.snd.get_mut(&partner)) {
                        pump.near(now, naxplanation.num, naxplanation.error, &mut gifts);
                    }
                    self.process_pump_gifts(now, her, partner, gifts, fx);
                }
                self.apply_sink_done(now, her, bone, None, fx);
            }
            FlowKind::NaxTraceSend => {
                // Fragments never arrive for a flow we only pump on.
                self.verb(self.veb.odd, her, || {
                    format!("delivery on send-only bone {}", bone)
                });
            }
        }
    }

    /// Commit the consumer's verdict on the sink's outstanding
    /// message; a nack also owes the sender a naxplanation on the
    /// paired nack-trace flow.
    pub(crate) fn apply_sink_done(
        &mut self,
        now: Instant,
        her: Ship,
        bone: Bone,
        error: Option<ErrorTrace>,
        fx: &mut Vec<Effect>,
    ) {
        let ok = error.is_none();
        let mut gifts = Vec::new();
        let nacked = {
            let Some(sink) = self.known_mut(her).and_then(|p| p.rcv.get_mut(&bone)) else {
                return;
            };
            sink.done(ok, &mut gifts)
        };
        let Some(num) = nacked else {
            return;
        };
        if let Some(error) = error {
            let partner = bone.nax_partner();
            let mut pump_gifts = Vec::new();
            if let Some(peer) = self.known_mut(her) {
                peer.nax.insert((bone, num));
                if let Ok(blob) = jam(&Naxplanation { num, error }) {
                    peer.snd
                        .entry(partner)
                        .or_default()
                        .memo(now, blob, &mut pump_gifts);
                }
            }
            self.process_pump_gifts(now, her, partner, pump_gifts, fx);
        }
        self.process_sink_gifts(now, her, bone, gifts, None, fx);
    }

    // ----- QoS and clog -----

    /// Any authenticated receive proves the peer alive.
    pub(crate) fn on_contact(&mut self, now: Instant, ship: Ship, fx: &mut Vec<Effect>) {
        let Some(peer) = self.known_mut(ship) else {
            return;
        };
        peer.qos.last_contact = Some(now);
        if peer.qos.kind != QosKind::Live {
            peer.qos.kind = QosKind::Live;
            fx.push(Effect::Log(format!("; {} is ok", ship)));
        }
    }

    /// Checked when a flow timer fires: thirty silent seconds turn a
    /// live peer dead and run clog detection.
    fn check_qos_timeout(&mut self, now: Instant, ship: Ship, fx: &mut Vec<Effect>) {
        let Some(peer) = self.known_mut(ship) else {
            return;
        };
        if peer.qos.kind != QosKind::Live {
            return;
        }
        let silent = peer
            .qos
            .last_contact
            .map_or(true, |at| now.saturating_duration_since(at) >= DEAD_INTERVAL);
        if silent {
            peer.qos.kind = QosKind::Dead;
            fx.push(Effect::Log(format!("; {} not responding still trying", ship)));
            self.detect_clog(ship, fx);
        }
    }

    /// When a peer goes dead or unborn with response flows backed up,
    /// every liveness subscriber hears about it.
    pub(crate) fn detect_clog(&mut self, ship: Ship, fx: &mut Vec<Effect>) {
        let Some(peer) = self.known(ship) else {
            return;
        };
        if peer.backward_backlog() >= CLOG_THRESHOLD {
            for duct in &peer.heeds {
                fx.push(Effect::Give {
                    duct: duct.clone(),
                    gift: Gift::Clog(ship),
                });
            }
        }
    }

    // ----- PKI surface -----

    fn on_pki(&mut self, now: Instant, event: PkiEvent, fx: &mut Vec<Effect>) {
        match event {
            PkiEvent::OurPrivateKeys { life, rings } => {
                self.life = life;
                self.rings = rings;
                self.rekey_all_peers(fx);
            }
            PkiEvent::Full(records) => {
                for (ship, record) in records {
                    self.apply_record(now, ship, record, fx);
                }
            }
            PkiEvent::Rekey { ship, life, pass } => {
                let rift = self.known(ship).map(|p| p.rift).unwrap_or_default();
                self.apply_record(
                    now,
                    ship,
                    PkiRecord {
                        life,
                        pass,
                        rift,
                        sponsor: None,
                    },
                    fx,
                );
            }
            PkiEvent::Sponsor { ship, sponsor } => {
                if let Some(peer) = self.known_mut(ship) {
                    peer.sponsor = sponsor;
                }
            }
            PkiEvent::Rift { ship, rift } => {
                let breached = self.known(ship).map_or(false, |peer| rift > peer.rift);
                if breached {
                    self.on_breach(ship, rift, fx);
                }
            }
            PkiEvent::Breach(ship) => {
                let rift = self
                    .known(ship)
                    .map(|peer| Rift(peer.rift.0 + 1))
                    .unwrap_or_default();
                self.on_breach(ship, rift, fx);
            }
        }
    }

    /// Our own keys changed: every peer's symmetric key is a pure
    /// function of the key material and must be recomputed.
    fn rekey_all_peers(&mut self, fx: &mut Vec<Effect>) {
        let Ok(ring) = self.current_ring().cloned() else {
            fx.push(Effect::Log(format!("; missing ring at life {}", self.life)));
            return;
        };
        for peer in self.peers.values_mut() {
            if let Peer::Known(peer) = peer {
                peer.symmetric_key = shared_key(&ring, &peer.pass);
            }
        }
        if self.veb.rot {
            debug!(life = self.life.0, "rekeyed all peers");
        }
    }

    /// Install or update one ship's public record. A higher rift
    /// breaches first; a key change rekeys in place with flows
    /// preserved; an alien is promoted and its agenda drained.
    pub(crate) fn apply_record(
        &mut self,
        now: Instant,
        ship: Ship,
        record: PkiRecord,
        fx: &mut Vec<Effect>,
    ) {
        let Ok(ring) = self.current_ring().cloned() else {
            return;
        };
        if self.known(ship).is_some() {
            if self.known(ship).map_or(false, |peer| record.rift > peer.rift) {
                self.on_breach(ship, record.rift, fx);
            }
            let mut rekeyed = None;
            if let Some(peer) = self.known_mut(ship) {
                if record.life != peer.life || record.pass != peer.pass {
                    peer.life = record.life;
                    peer.pass = record.pass;
                    peer.symmetric_key = shared_key(&ring, &record.pass);
                    rekeyed = Some(record.life);
                }
                if let Some(sponsor) = record.sponsor {
                    peer.sponsor = sponsor;
                }
            }
            if let Some(life) = rekeyed {
                self.verb(self.veb.rot, ship, || format!("rekeyed to life {}", life));
            }
            return;
        }
        let sponsor = record.sponsor.unwrap_or_else(|| ship.default_sponsor());
        let mut state = PeerState::new(
            shared_key(&ring, &record.pass),
            record.life,
            record.rift,
            record.pass,
            sponsor,
        );
        if ship.is_galaxy() {
            state.route = Some(Route {
                direct: true,
                lane: Lane::Galaxy(ship),
            });
        }
        self.promote(now, ship, state, fx);
    }

    /// Alien becomes known: install the state, then drain the agenda
    /// in FIFO order onto the fresh peer.
    pub(crate) fn promote(
        &mut self,
        now: Instant,
        ship: Ship,
        mut state: PeerState,
        fx: &mut Vec<Effect>,
    ) {
        let agenda = match self.peers.remove(&ship) {
            Some(Peer::Alien(agenda)) => agenda,
            Some(known @ Peer::Known(_)) => {
                // Already promoted; keep what we had.
                self.peers.insert(ship, known);
                return;
            }
            None => AlienAgenda::default(),
        };
        state.heeds.extend(agenda.heeds);
        self.peers.insert(ship, Peer::Known(state));
        for (duct, plea) in agenda.messages {
            self.on_plea(now, duct, ship, plea, fx);
        }
        for blob in agenda.packets {
            self.send_blob(ship, blob, fx);
        }
    }

    /// Continuity breach: all flow state goes, flow timers are
    /// cancelled, QoS restarts from unborn. PKI fields and liveness
    /// subscriptions survive.
    pub(crate) fn on_breach(&mut self, ship: Ship, rift: Rift, fx: &mut Vec<Effect>) {
        let Some(peer) = self.known_mut(ship) else {
            return;
        };
        for (bone, pump) in &peer.snd {
            if pump.packet_pump.next_wake.is_some() {
                fx.push(Effect::Rest {
                    wire: TimerWire { ship, bone: *bone },
                });
            }
        }
        peer.snd.clear();
        peer.rcv.clear();
        peer.nax.clear();
        peer.ossuary = Default::default();
        peer.qos = Qos::default();
        peer.rift = rift;
        peer.route = if ship.is_galaxy() {
            Some(Route {
                direct: true,
                lane: Lane::Galaxy(ship),
            })
        } else {
            None
        };
        fx.push(Effect::Log(format!("; {} has sunk", ship)));
        self.detect_clog(ship, fx);
    }
}
