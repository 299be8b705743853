mod common;

use ames_core::{Duct, Effect, Peer, StateSnapshot, Task};
use ames_proto::{Bone, Life, Plea, Rift};
use bytes::Bytes;
use common::{keyed_pair, rings, sent_blobs, A_SHIP, B_SHIP};
use std::time::Instant;

#[test]
fn snapshot_round_trips_with_flows() {
    let now = Instant::now();
    let (mut a, _b) = keyed_pair(now);
    a.handle(
        now,
        Task::Plea {
            duct: Duct::new(&["gall", "standing"]),
            ship: B_SHIP,
            plea: Plea {
                vane: "g".to_string(),
                path: vec![],
                payload: Bytes::from(vec![3u8; 3000]),
            },
        },
    );

    let encoded = StateSnapshot::current(a.clone()).encode().unwrap();
    let restored = StateSnapshot::decode(&encoded).unwrap().migrate();

    assert_eq!(restored.our, A_SHIP);
    assert_eq!(restored.life, Life(1));
    let peer = match restored.peers.get(&B_SHIP) {
        Some(Peer::Known(peer)) => peer,
        _ => panic!("peer lost in snapshot"),
    };
    let pump = &peer.snd[&Bone(0)];
    // Flow state survives; congestion metrics survive; armed timers
    // and send timestamps do not.
    assert_eq!(pump.next, ames_proto::MessageNum(1));
    assert_eq!(pump.packet_pump.live.len(), 1);
    assert_eq!(pump.packet_pump.metrics.cwnd, 1);
    assert!(pump.packet_pump.next_wake.is_none());
    assert!(pump
        .packet_pump
        .live
        .values()
        .all(|packet| packet.sent_at.is_none()));
}

#[test]
fn stir_rearms_timers_and_wake_retransmits() {
    let now = Instant::now();
    let (mut a, _b) = keyed_pair(now);
    a.handle(
        now,
        Task::Plea {
            duct: Duct::new(&["gall", "standing"]),
            ship: B_SHIP,
            plea: Plea {
                vane: "g".to_string(),
                path: vec![],
                payload: Bytes::from_static(b"inflight"),
            },
        },
    );

    let encoded = StateSnapshot::current(a.clone()).encode().unwrap();
    let mut restored = StateSnapshot::decode(&encoded).unwrap().migrate();

    let later = now + std::time::Duration::from_secs(60);
    let fx = restored.handle(later, Task::Stir);
    let wires: Vec<_> = fx
        .iter()
        .filter_map(|e| match e {
            Effect::Wait { wire, at } => Some((*wire, *at)),
            _ => None,
        })
        .collect();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].0.ship, B_SHIP);
    assert_eq!(wires[0].1, later);

    // The recovered wake finds the reloaded packet overdue and
    // retransmits it.
    let fx = restored.handle(later, Task::Wake(wires[0].0));
    assert_eq!(sent_blobs(&fx).len(), 1);
}

#[test]
fn stir_is_quiet_when_timers_are_armed() {
    let now = Instant::now();
    let (mut a, _b) = keyed_pair(now);
    a.handle(
        now,
        Task::Plea {
            duct: Duct::new(&["gall", "armed"]),
            ship: B_SHIP,
            plea: Plea {
                vane: "g".to_string(),
                path: vec![],
                payload: Bytes::from_static(b"inflight"),
            },
        },
    );
    // No reload happened; the pump still remembers its timer.
    let fx = a.handle(now, Task::Stir);
    assert!(fx.is_empty());
}

#[test]
fn v1_snapshots_migrate_forward() {
    let now = Instant::now();
    let (a, _b) = keyed_pair(now);
    let (ring_a, _) = rings();

    let v1 = ames_core::state::StateV1 {
        our: a.our,
        life: a.life,
        rift: Rift(0),
        rings: [(Life(1), ring_a)].into(),
        peers: a.peers.clone(),
        unix_duct: None,
    };
    let encoded = StateSnapshot::V1(v1).encode().unwrap();
    let migrated = StateSnapshot::decode(&encoded).unwrap().migrate();

    assert_eq!(migrated.our, A_SHIP);
    assert!(migrated.snub.is_empty());
    assert!(migrated.sift.is_empty());
    assert!(migrated.turfs.is_empty());
    assert_eq!(migrated.veb, Default::default());
    assert!(migrated.peers.contains_key(&B_SHIP));
}
