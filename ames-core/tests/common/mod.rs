//! Shared fixtures: a keyed pair of transports and a packet relay.

use ames_core::{Ames, Effect, Lane, PkiEvent, PkiRecord, Task};
use ames_proto::{ErrorTrace, Life, Rift, Ring, Ship};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

pub const A_SHIP: Ship = Ship(0x0064_3019);
pub const B_SHIP: Ship = Ship(0x00c8_4055);

pub fn lane_of(ship: Ship) -> Lane {
    let mut bytes = vec![10, 0, 0, (ship.0 & 0xff) as u8];
    bytes.extend_from_slice(&1337u16.to_be_bytes());
    Lane::Opaque(Bytes::from(bytes))
}

pub fn rings() -> (Ring, Ring) {
    let mut rng = StdRng::seed_from_u64(42);
    (Ring::generate(&mut rng), Ring::generate(&mut rng))
}

/// Two planets that already know each other through the PKI.
pub fn keyed_pair(now: Instant) -> (Ames, Ames) {
    let (ring_a, ring_b) = rings();
    let mut a = Ames::new(
        A_SHIP,
        Life(1),
        Rift(0),
        BTreeMap::from([(Life(1), ring_a.clone())]),
    );
    let mut b = Ames::new(
        B_SHIP,
        Life(1),
        Rift(0),
        BTreeMap::from([(Life(1), ring_b.clone())]),
    );
    a.handle(
        now,
        Task::Pki(PkiEvent::Full(BTreeMap::from([(
            B_SHIP,
            PkiRecord {
                life: Life(1),
                pass: ring_b.pass(),
                rift: Rift(0),
                sponsor: None,
            },
        )]))),
    );
    b.handle(
        now,
        Task::Pki(PkiEvent::Full(BTreeMap::from([(
            A_SHIP,
            PkiRecord {
                life: Life(1),
                pass: ring_a.pass(),
                rift: Rift(0),
                sponsor: None,
            },
        )]))),
    );
    (a, b)
}

pub fn sent_blobs(fx: &[Effect]) -> Vec<Bytes> {
    fx.iter()
        .filter_map(|effect| match effect {
            Effect::Send { blob, .. } => Some(blob.clone()),
            _ => None,
        })
        .collect()
}

/// Relay packets both ways until the network drains. Deliveries on
/// either side are answered immediately: `b_verdict` is `None` for an
/// ack, `Some(error)` for a nack; `a` always acks. Non-send effects
/// from both sides are collected for assertions.
pub fn exchange(
    a: &mut Ames,
    b: &mut Ames,
    now: Instant,
    seed_fx: Vec<Effect>,
    b_verdict: Option<ErrorTrace>,
) -> (Vec<Effect>, Vec<Effect>) {
    let mut to_b: VecDeque<Bytes> = sent_blobs(&seed_fx).into();
    let mut to_a: VecDeque<Bytes> = VecDeque::new();
    let mut out_a: Vec<Effect> = seed_fx
        .into_iter()
        .filter(|e| !matches!(e, Effect::Send { .. }))
        .collect();
    let mut out_b: Vec<Effect> = Vec::new();

    let mut guard = 0;
    while !to_a.is_empty() || !to_b.is_empty() {
        guard += 1;
        assert!(guard < 1000, "relay did not quiesce");
        if let Some(blob) = to_b.pop_front() {
            let fx = b.handle(
                now,
                Task::Hear {
                    lane: lane_of(A_SHIP),
                    blob,
                    dud: None,
                },
            );
            absorb(b, now, fx, &mut to_a, &mut out_b, &b_verdict);
        }
        if let Some(blob) = to_a.pop_front() {
            let fx = a.handle(
                now,
                Task::Hear {
                    lane: lane_of(B_SHIP),
                    blob,
                    dud: None,
                },
            );
            absorb(a, now, fx, &mut to_b, &mut out_a, &None);
        }
    }
    (out_a, out_b)
}

fn absorb(
    side: &mut Ames,
    now: Instant,
    fx: Vec<Effect>,
    wire_out: &mut VecDeque<Bytes>,
    log: &mut Vec<Effect>,
    verdict: &Option<ErrorTrace>,
) {
    for effect in fx {
        match effect {
            Effect::Send { blob, .. } => wire_out.push_back(blob),
            Effect::Deliver { wire, plea } => {
                log.push(Effect::Deliver {
                    wire,
                    plea: plea.clone(),
                });
                let fx = side.handle(
                    now,
                    Task::Done {
                        wire,
                        error: verdict.clone(),
                    },
                );
                absorb(side, now, fx, wire_out, log, verdict);
            }
            other => log.push(other),
        }
    }
}
