//! The congestion controller and retransmit queue under one message
//! pump. TCP-flavored: slow start, additive increase, multiplicative
//! decrease, RTO backoff, skip-count fast retransmit.

use crate::rtt::RttEstimator;
use crate::{PumpGift, StaticFragment};
use ames_proto::{mug, FragmentNum, MessageNum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::trace;

pub const INITIAL_CWND: u32 = 1;
pub const INITIAL_SSTHRESH: u32 = 10_000;
/// Skips before a fast retransmit outside recovery.
pub const MAX_SKIPS: u32 = 3;

/// An in-flight fragment, keyed in the live queue by
/// `(message_num, fragment_num)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePacket {
    /// When this packet was last transmitted. `None` after a state
    /// reload; treated as due immediately.
    #[serde(skip)]
    pub sent_at: Option<Instant>,
    /// Transmission count; 1 on first send.
    pub tries: u32,
    /// How many later fragments have been acked past this one.
    pub skips: u32,
    pub fragment: StaticFragment,
}

impl LivePacket {
    fn due(&self, now: Instant, rto: std::time::Duration) -> bool {
        match self.sent_at {
            Some(sent) => sent + rto <= now,
            None => true,
        }
    }
}

/// Congestion bookkeeping, persisted with the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub rtt: RttEstimator,
    /// Congestion window, in packets.
    pub cwnd: u32,
    /// Slow-start threshold.
    pub ssthresh: u32,
    /// Packets currently in flight.
    pub num_live: u32,
    /// Monotonic ack counter, for deterministic tie-breaks.
    pub counter: u32,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            rtt: RttEstimator::new(),
            cwnd: INITIAL_CWND,
            ssthresh: INITIAL_SSTHRESH,
            num_live: 0,
            counter: 0,
        }
    }
}

impl Metrics {
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn in_recovery(&self) -> bool {
        self.num_live > self.cwnd
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketPump {
    pub live: BTreeMap<(MessageNum, FragmentNum), LivePacket>,
    pub metrics: Metrics,
    /// The currently armed timer deadline, if any. Not persisted; a
    /// post-reload `stir` re-arms it.
    #[serde(skip)]
    pub next_wake: Option<Instant>,
    /// First event instant seen by this pump; anchors the hash input
    /// for the probabilistic window growth.
    #[serde(skip)]
    birth: Option<Instant>,
}

impl PacketPump {
    /// Accept as many fragments as the window allows, transmit them,
    /// and hand back the unsent tail so the message pump sees the
    /// backpressure.
    pub fn feed(
        &mut self,
        now: Instant,
        mut fragments: Vec<StaticFragment>,
        gifts: &mut Vec<PumpGift>,
    ) -> Vec<StaticFragment> {
        self.birth.get_or_insert(now);
        let slots = self.metrics.cwnd.saturating_sub(self.metrics.num_live) as usize;
        let sending = fragments.len().min(slots);
        for fragment in fragments.drain(..sending) {
            self.metrics.num_live += 1;
            self.live.insert(
                fragment.key(),
                LivePacket {
                    sent_at: Some(now),
                    tries: 1,
                    skips: 0,
                    fragment: fragment.clone(),
                },
            );
            gifts.push(PumpGift::Send(fragment));
        }
        self.set_timer(now, gifts);
        fragments
    }

    /// A fragment-ack from the peer. Fresh acks update the congestion
    /// state; duplicates fall through to the skip/fast-resend pass so a
    /// crashed upstream event can never wedge the flow.
    pub fn hear_fragment_ack(
        &mut self,
        now: Instant,
        message_num: MessageNum,
        fragment_num: FragmentNum,
        gifts: &mut Vec<PumpGift>,
    ) {
        let key = (message_num, fragment_num);
        if let Some(acked) = self.live.remove(&key) {
            self.metrics.num_live = self.metrics.num_live.saturating_sub(1);
            self.metrics.counter += 1;
            self.grow_cwnd(now);
            if acked.tries == 1 {
                if let Some(sent) = acked.sent_at {
                    self.metrics.rtt.update(now.saturating_duration_since(sent));
                }
            }
        }
        self.mark_skipped(now, key, gifts);
        self.set_timer(now, gifts);
    }

    /// Every live packet preceding an acked key was skipped by the
    /// network: bump its skip count and retransmit when the flow is in
    /// recovery or the count reaches the fast-retransmit threshold.
    /// Expired packets ahead of the ack resend regardless.
    fn mark_skipped(
        &mut self,
        now: Instant,
        acked: (MessageNum, FragmentNum),
        gifts: &mut Vec<PumpGift>,
    ) {
        let rto = self.metrics.rtt.rto();
        let in_recovery = self.metrics.in_recovery();
        let mut halved = false;
        for (key, packet) in self.live.range_mut(..acked) {
            packet.skips += 1;
            let skip_resend = packet.tries <= 1 && (in_recovery || packet.skips >= MAX_SKIPS);
            if skip_resend && !in_recovery && !halved {
                halved = true;
            }
            if skip_resend || packet.due(now, rto) {
                trace!(message_num = key.0 .0, fragment_num = key.1 .0, "fast resend");
                packet.tries += 1;
                packet.sent_at = Some(now);
                gifts.push(PumpGift::Send(packet.fragment.clone()));
            }
        }
        if halved {
            self.metrics.cwnd = (self.metrics.cwnd / 2).max(2);
        }
    }

    /// Slow start adds one per ack; congestion avoidance adds one with
    /// probability 1/cwnd, decided by a deterministic hash of the event
    /// time so replay reproduces the exact window trajectory.
    fn grow_cwnd(&mut self, now: Instant) {
        if self.metrics.in_slow_start() {
            self.metrics.cwnd += 1;
            return;
        }
        let elapsed = self
            .birth
            .map_or(0, |birth| now.saturating_duration_since(birth).as_nanos());
        let seed = elapsed ^ ((self.metrics.counter as u128) << 96);
        if mug(seed) % self.metrics.cwnd == 0 {
            self.metrics.cwnd += 1;
        }
    }

    /// A message-ack implies every fragment ack: flush all live state
    /// for the message.
    pub fn on_done(&mut self, now: Instant, message_num: MessageNum, gifts: &mut Vec<PumpGift>) {
        let before = self.live.len();
        self.live
            .retain(|(num, _), _| *num != message_num);
        let removed = (before - self.live.len()) as u32;
        self.metrics.num_live = self.metrics.num_live.saturating_sub(removed);
        self.set_timer(now, gifts);
    }

    /// Retransmission timer fired. Early wakes re-arm without action;
    /// a due head-of-queue costs a full congestion reset to one packet.
    pub fn wake(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        self.next_wake = None;
        let rto = self.metrics.rtt.rto();
        let head_due = self
            .live
            .values()
            .next()
            .map(|head| head.due(now, rto));
        if head_due == Some(true) {
            self.metrics.ssthresh = (self.metrics.cwnd / 2).max(1);
            self.metrics.cwnd = 1;
            self.metrics.rtt.on_timeout();
            if let Some(head) = self.live.values_mut().next() {
                head.tries += 1;
                head.sent_at = Some(now);
                gifts.push(PumpGift::Send(head.fragment.clone()));
            }
        }
        self.set_timer(now, gifts);
    }

    /// Congestion reset: back to initial metrics, immediate
    /// head-of-queue retransmit.
    pub fn prod(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        if self.live.is_empty() {
            return;
        }
        self.metrics = Metrics {
            counter: self.metrics.counter,
            num_live: self.live.len() as u32,
            ..Metrics::default()
        };
        if let Some(head) = self.live.values_mut().next() {
            head.tries += 1;
            head.sent_at = Some(now);
            gifts.push(PumpGift::Send(head.fragment.clone()));
        }
        self.set_timer(now, gifts);
    }

    /// Recompute the wanted deadline and reconcile the armed timer:
    /// cancel before re-arm, single rest on an empty queue.
    fn set_timer(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        let rto = self.metrics.rtt.rto();
        let want = self
            .live
            .values()
            .next()
            .map(|head| head.sent_at.unwrap_or(now) + rto);
        match (want, self.next_wake) {
            (None, None) => {}
            (None, Some(_)) => {
                gifts.push(PumpGift::Rest);
                self.next_wake = None;
            }
            (Some(at), None) => {
                gifts.push(PumpGift::Wait(at));
                self.next_wake = Some(at);
            }
            (Some(at), Some(armed)) if at != armed => {
                gifts.push(PumpGift::Rest);
                gifts.push(PumpGift::Wait(at));
                self.next_wake = Some(at);
            }
            _ => {}
        }
    }
}

