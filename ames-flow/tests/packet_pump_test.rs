use ames_flow::packet_pump::{PacketPump, INITIAL_SSTHRESH};
use ames_flow::rtt::{MAX_RTO, MIN_RTO};
use ames_flow::{PumpGift, StaticFragment};
use ames_proto::{FragmentNum, MessageNum};
use bytes::Bytes;
use std::time::{Duration, Instant};

fn fragments(message_num: u32, count: u32) -> Vec<StaticFragment> {
    let blob = Bytes::from(vec![0xab; count as usize * 1024]);
    (0..count)
        .map(|i| StaticFragment {
            message_num: MessageNum(message_num),
            num_fragments: FragmentNum(count),
            fragment_num: FragmentNum(i),
            blob: blob.clone(),
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
fn feed_respects_window_and_returns_tail() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    let mut gifts = Vec::new();

    // Initial window is one packet.
    let tail = pump.feed(now, fragments(0, 3), &mut gifts);
    assert_eq!(sends(&gifts), vec![(0, 0)]);
    assert_eq!(tail.len(), 2);
    assert_eq!(pump.metrics.num_live, 1);
    assert!(matches!(gifts.last(), Some(PumpGift::Wait(_))));
}

#[test]
fn slow_start_grows_window_per_ack() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    let mut gifts = Vec::new();
    let tail = pump.feed(now, fragments(0, 2), &mut gifts);
    assert_eq!(tail.len(), 1);

    gifts.clear();
    pump.hear_fragment_ack(
        now + Duration::from_millis(50),
        MessageNum(0),
        FragmentNum(0),
        &mut gifts,
    );
    assert_eq!(pump.metrics.cwnd, 2);
    assert_eq!(pump.metrics.num_live, 0);
    assert_eq!(pump.metrics.counter, 1);
    assert!(pump.metrics.in_slow_start());
}

#[test]
fn fresh_ack_updates_rtt_estimate() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    let mut gifts = Vec::new();
    pump.feed(now, fragments(0, 1), &mut gifts);

    pump.hear_fragment_ack(
        now + Duration::from_millis(100),
        MessageNum(0),
        FragmentNum(0),
        &mut gifts,
    );
    // (100ms + 7 * 1s) / 8
    assert_eq!(pump.metrics.rtt.rtt(), Duration::from_micros(887_500));
    // Duplicate ack leaves congestion state alone.
    let cwnd = pump.metrics.cwnd;
    let counter = pump.metrics.counter;
    pump.hear_fragment_ack(
        now + Duration::from_millis(200),
        MessageNum(0),
        FragmentNum(0),
        &mut gifts,
    );
    assert_eq!(pump.metrics.cwnd, cwnd);
    assert_eq!(pump.metrics.counter, counter);
}

#[test]
fn three_skips_trigger_resend_and_halve_window() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    pump.metrics.cwnd = 4;
    let mut gifts = Vec::new();
    let tail = pump.feed(now, fragments(0, 4), &mut gifts);
    assert!(tail.is_empty());

    // Acks for fragments 1 and 2 skip fragment 0 twice.
    gifts.clear();
    pump.hear_fragment_ack(now, MessageNum(0), FragmentNum(1), &mut gifts);
    pump.hear_fragment_ack(now, MessageNum(0), FragmentNum(2), &mut gifts);
    assert!(sends(&gifts).is_empty());
    assert_eq!(pump.live[&(MessageNum(0), FragmentNum(0))].skips, 2);

    // Third skip: fragment 0 is resent and the window halves. The two
    // fresh acks above grew cwnd to 6 in slow start, so the halved
    // window lands at 3.
    gifts.clear();
    pump.hear_fragment_ack(now, MessageNum(0), FragmentNum(3), &mut gifts);
    assert_eq!(sends(&gifts), vec![(0, 0)]);
    assert_eq!(pump.live[&(MessageNum(0), FragmentNum(0))].tries, 2);
    assert_eq!(pump.metrics.cwnd, 3);
}

#[test]
fn timeout_resets_congestion_and_doubles_rto() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    pump.metrics.cwnd = 8;
    pump.metrics.ssthresh = 8;
    let mut gifts = Vec::new();
    pump.feed(now, fragments(0, 4), &mut gifts);

    gifts.clear();
    let late = now + Duration::from_secs(2);
    pump.wake(late, &mut gifts);
    assert_eq!(pump.metrics.ssthresh, 4);
    assert_eq!(pump.metrics.cwnd, 1);
    assert_eq!(pump.metrics.rtt.rto(), Duration::from_secs(2));
    // Head of queue went out again.
    assert_eq!(sends(&gifts), vec![(0, 0)]);
    assert_eq!(pump.live[&(MessageNum(0), FragmentNum(0))].tries, 2);
}

#[test]
fn spurious_early_wake_rearms_without_action() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    let mut gifts = Vec::new();
    pump.feed(now, fragments(0, 1), &mut gifts);
    let cwnd = pump.metrics.cwnd;

    gifts.clear();
    pump.wake(now + Duration::from_millis(10), &mut gifts);
    assert!(sends(&gifts).is_empty());
    assert_eq!(pump.metrics.cwnd, cwnd);
    assert!(matches!(gifts[..], [PumpGift::Wait(_)]));
    assert!(pump.next_wake.is_some());
}

#[test]
fn message_done_flushes_live_and_rests_timer() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    pump.metrics.cwnd = 4;
    let mut gifts = Vec::new();
    pump.feed(now, fragments(0, 3), &mut gifts);

    gifts.clear();
    pump.on_done(now, MessageNum(0), &mut gifts);
    assert!(pump.live.is_empty());
    assert_eq!(pump.metrics.num_live, 0);
    assert!(matches!(gifts[..], [PumpGift::Rest]));
    assert!(pump.next_wake.is_none());
}

#[test]
fn timer_cancelled_before_rearm() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    pump.metrics.cwnd = 2;
    let mut gifts = Vec::new();
    pump.feed(now, fragments(0, 2), &mut gifts);

    // Acking the head changes the RTO and thus the deadline: a rest
    // must precede the new wait.
    gifts.clear();
    pump.hear_fragment_ack(
        now + Duration::from_millis(5),
        MessageNum(0),
        FragmentNum(0),
        &mut gifts,
    );
    let timer_gifts: Vec<_> = gifts
        .iter()
        .filter(|gift| matches!(gift, PumpGift::Wait(_) | PumpGift::Rest))
        .collect();
    assert!(matches!(
        timer_gifts[..],
        [PumpGift::Rest, PumpGift::Wait(_)]
    ));
}

#[test]
fn congestion_invariants_hold_under_churn() {
    let now = Instant::now();
    let mut pump = PacketPump::default();
    let mut gifts = Vec::new();
    let mut clock = now;
    for round in 0u32..50 {
        clock += Duration::from_millis(37);
        let mut tail = pump.feed(clock, fragments(round, 3), &mut gifts);
        while !tail.is_empty() {
            clock += Duration::from_millis(11);
            if let Some((&(message_num, fragment_num), _)) = pump.live.iter().next() {
                pump.hear_fragment_ack(clock, message_num, fragment_num, &mut gifts);
            }
            if round % 7 == 0 {
                clock += Duration::from_secs(6);
                pump.wake(clock, &mut gifts);
            }
            tail = pump.feed(clock, tail, &mut gifts);
        }
        pump.on_done(clock, MessageNum(round), &mut gifts);

        assert!(pump.metrics.cwnd >= 1);
        assert!(pump.metrics.ssthresh >= 1);
        assert!(pump.metrics.ssthresh <= INITIAL_SSTHRESH);
        assert!(pump.metrics.rtt.rto() >= MIN_RTO);
        assert!(pump.metrics.rtt.rto() <= MAX_RTO);
        assert_eq!(pump.metrics.num_live as usize, pump.live.len());
    }
}
