use ames_flow::{MessagePump, PumpGift};
use ames_proto::{ErrorTrace, FragmentNum, MessageNum};
use bytes::Bytes;
use std::time::{Duration, Instant};

fn dones(gifts: &[PumpGift]) -> Vec<(u32, Option<String>)> {
    gifts
        .iter()
        .filter_map(|gift| match gift {
            PumpGift::Done { num, error } => {
                Some((num.0, error.as_ref().map(|e| e.tag.clone())))
            }
            _ => None,
        })
        .collect()
}

fn sends(gifts: &[PumpGift]) -> Vec<(u32, u32)> {
    gifts
        .iter()
        .filter_map(|gift| match gift {
            PumpGift::Send(fragment) => {
                Some((fragment.message_num.0, fragment.fragment_num.0))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn single_fragment_message_completes() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();

    pump.memo(now, Bytes::from_static(b"hi"), &mut gifts);
    assert_eq!(sends(&gifts), vec![(0, 0)]);
    assert_eq!(pump.next, MessageNum(1));

    gifts.clear();
    pump.hear_message_ack(now + Duration::from_millis(20), MessageNum(0), true, 0, &mut gifts);
    assert_eq!(dones(&gifts), vec![(0, None)]);
    assert_eq!(pump.current, MessageNum(1));
    assert!(pump.is_idle());
    // Flow completion rests the timer.
    assert!(gifts.iter().any(|gift| matches!(gift, PumpGift::Rest)));
}

#[test]
fn large_message_fragments_lazily() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    pump.packet_pump.metrics.cwnd = 3;
    let mut gifts = Vec::new();

    let blob = Bytes::from(vec![7u8; 2500]);
    pump.memo(now, blob.clone(), &mut gifts);
    let sent = sends(&gifts);
    assert_eq!(sent, vec![(0, 0), (0, 1), (0, 2)]);
    // Every fragment shares the original blob; slices reconstruct it.
    let mut rebuilt = Vec::new();
    for gift in &gifts {
        if let PumpGift::Send(fragment) = gift {
            assert_eq!(fragment.num_fragments, FragmentNum(3));
            rebuilt.extend_from_slice(&fragment.slice());
        }
    }
    assert_eq!(Bytes::from(rebuilt), blob);
}

#[test]
fn acks_release_in_message_order() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    pump.packet_pump.metrics.cwnd = 8;
    let mut gifts = Vec::new();
    for text in [&b"one"[..], b"two", b"three"] {
        pump.memo(now, Bytes::copy_from_slice(text), &mut gifts);
    }

    // Acking message 1 first queues it; nothing is released.
    gifts.clear();
    pump.hear_message_ack(now, MessageNum(1), true, 0, &mut gifts);
    assert!(dones(&gifts).is_empty());

    // Message 0 unblocks both.
    pump.hear_message_ack(now, MessageNum(0), true, 0, &mut gifts);
    assert_eq!(dones(&gifts), vec![(0, None), (1, None)]);
    assert_eq!(pump.current, MessageNum(2));
}

#[test]
fn bare_nack_waits_for_naxplanation() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();
    pump.memo(now, Bytes::from_static(b"doomed"), &mut gifts);

    gifts.clear();
    pump.hear_message_ack(now, MessageNum(0), false, 0, &mut gifts);
    // The nack flushes the packet pump but tells the caller nothing.
    assert!(dones(&gifts).is_empty());
    assert!(pump.packet_pump.live.is_empty());

    pump.near(now, MessageNum(0), ErrorTrace::new("consumer-failed"), &mut gifts);
    assert_eq!(
        dones(&gifts),
        vec![(0, Some("consumer-failed".to_string()))]
    );
    assert_eq!(pump.current, MessageNum(1));
}

#[test]
fn naxplanation_ahead_of_nack_stays_authoritative() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();
    pump.memo(now, Bytes::from_static(b"doomed"), &mut gifts);
    pump.memo(now, Bytes::from_static(b"fine"), &mut gifts);

    gifts.clear();
    pump.near(now, MessageNum(0), ErrorTrace::new("real-reason"), &mut gifts);
    assert_eq!(dones(&gifts), vec![(0, Some("real-reason".to_string()))]);

    // The late bare nack is a duplicate of a finished message.
    gifts.clear();
    pump.hear_message_ack(now, MessageNum(0), false, 0, &mut gifts);
    assert!(dones(&gifts).is_empty());
    assert_eq!(pump.current, MessageNum(1));
}

#[test]
fn duplicate_and_future_acks_are_ignored() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();
    pump.memo(now, Bytes::from_static(b"solo"), &mut gifts);

    gifts.clear();
    pump.hear_fragment_ack(now, MessageNum(9), FragmentNum(0), &mut gifts);
    pump.hear_message_ack(now, MessageNum(9), true, 0, &mut gifts);
    assert!(gifts.is_empty());
    assert_eq!(pump.current, MessageNum(0));

    pump.hear_message_ack(now, MessageNum(0), true, 0, &mut gifts);
    gifts.clear();
    pump.hear_message_ack(now, MessageNum(0), true, 0, &mut gifts);
    assert!(dones(&gifts).is_empty());
}

#[test]
fn backpressure_feeds_next_message_after_acks() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();

    // cwnd 1: the second message cannot start until the first drains.
    pump.memo(now, Bytes::from_static(b"first"), &mut gifts);
    pump.memo(now, Bytes::from_static(b"second"), &mut gifts);
    assert_eq!(sends(&gifts), vec![(0, 0)]);
    assert_eq!(pump.unsent_fragments.len(), 1);

    gifts.clear();
    pump.hear_message_ack(now, MessageNum(0), true, 0, &mut gifts);
    assert_eq!(sends(&gifts), vec![(1, 0)]);
    assert_eq!(dones(&gifts), vec![(0, None)]);
    assert!(pump.unsent_fragments.is_empty());
}

#[test]
fn current_never_exceeds_next() {
    let now = Instant::now();
    let mut pump = MessagePump::default();
    let mut gifts = Vec::new();
    for i in 0u32..5 {
        pump.memo(now, Bytes::from(vec![i as u8; 10]), &mut gifts);
        assert!(pump.current <= pump.next);
    }
    for i in 0u32..5 {
        pump.hear_message_ack(now, MessageNum(i), true, 0, &mut gifts);
        assert!(pump.current <= pump.next);
    }
    assert_eq!(pump.current, MessageNum(5));
}
