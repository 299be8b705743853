//! The outbound half of a flow: fragments whole messages, feeds the
//! packet pump, collects acks, and releases `done` results to the
//! local caller in strict message order.

use crate::packet_pump::PacketPump;
use crate::{PumpGift, StaticFragment};
use ames_proto::{ErrorTrace, FragmentNum, MessageNum};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use tracing::trace;

/// An ack waiting for its turn in the in-order drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedAck {
    Ok { lag_ms: u64 },
    /// A bare negative ack. Holds the drain: the caller is not told
    /// until the naxplanation arrives with the actual error.
    Nack,
    Naxplanation(ErrorTrace),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePump {
    /// Lowest message-num the caller has not been given a result for.
    pub current: MessageNum,
    /// Next message-num to assign.
    pub next: MessageNum,
    /// Whole blobs not yet fragmented, numbered implicitly from `next`.
    pub unsent_messages: VecDeque<Bytes>,
    /// Remaining fragments of the message currently being fed.
    pub unsent_fragments: Vec<StaticFragment>,
    /// Results awaiting in-order release to the caller.
    pub queued_acks: BTreeMap<MessageNum, QueuedAck>,
    pub packet_pump: PacketPump,
}

impl MessagePump {
    /// True when nothing is sent, unsent, or undrained.
    pub fn is_idle(&self) -> bool {
        self.current == self.next
            && self.unsent_messages.is_empty()
            && self.unsent_fragments.is_empty()
            && self.queued_acks.is_empty()
    }

    /// In-flight plus unsent load, for clog detection.
    pub fn backlog(&self) -> usize {
        self.packet_pump.live.len() + self.unsent_fragments.len() + self.unsent_messages.len()
    }

    /// Accept a whole message for transmission.
    pub fn memo(&mut self, now: Instant, blob: Bytes, gifts: &mut Vec<PumpGift>) {
        self.unsent_messages.push_back(blob);
        self.feed_packets(now, gifts);
    }

    /// Fragment queued messages into the packet pump until it reports
    /// backpressure or nothing is left.
    fn feed_packets(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        loop {
            if self.unsent_fragments.is_empty() {
                let Some(blob) = self.unsent_messages.pop_front() else {
                    return;
                };
                let message_num = self.next;
                self.next = self.next.next();
                let num_fragments = StaticFragment::count_for(blob.len());
                self.unsent_fragments = (0..num_fragments.0)
                    .map(|i| StaticFragment {
                        message_num,
                        num_fragments,
                        fragment_num: FragmentNum(i),
                        blob: blob.clone(),
                    })
                    .collect();
            }
            let fragments = std::mem::take(&mut self.unsent_fragments);
            self.unsent_fragments = self.packet_pump.feed(now, fragments, gifts);
            if !self.unsent_fragments.is_empty() {
                return;
            }
        }
    }

    /// A fragment-level ack. Out-of-range and already-done message
    /// numbers are ignored so duplicate acks can never wedge the flow.
    pub fn hear_fragment_ack(
        &mut self,
        now: Instant,
        message_num: MessageNum,
        fragment_num: FragmentNum,
        gifts: &mut Vec<PumpGift>,
    ) {
        if message_num < self.current
            || message_num >= self.next
            || self.queued_acks.contains_key(&message_num)
        {
            return;
        }
        self.packet_pump
            .hear_fragment_ack(now, message_num, fragment_num, gifts);
        self.feed_packets(now, gifts);
    }

    /// A message-level ack; `ok = false` is a bare nack. Implies all
    /// fragment acks, so the packet pump flushes the whole message.
    pub fn hear_message_ack(
        &mut self,
        now: Instant,
        message_num: MessageNum,
        ok: bool,
        lag_ms: u64,
        gifts: &mut Vec<PumpGift>,
    ) {
        if message_num < self.current || message_num >= self.next {
            return;
        }
        self.flush_message(now, message_num, gifts);
        // A naxplanation that raced ahead of the bare nack stays
        // authoritative; otherwise duplicates are ignored.
        self.queued_acks
            .entry(message_num)
            .or_insert(if ok { QueuedAck::Ok { lag_ms } } else { QueuedAck::Nack });
        self.drain(gifts);
        self.feed_packets(now, gifts);
    }

    /// The peer explained a nack via the paired nack-trace flow. The
    /// error replaces any bare nack and unblocks the drain.
    pub fn near(
        &mut self,
        now: Instant,
        message_num: MessageNum,
        error: ErrorTrace,
        gifts: &mut Vec<PumpGift>,
    ) {
        if message_num < self.current || message_num >= self.next {
            return;
        }
        self.flush_message(now, message_num, gifts);
        self.queued_acks
            .insert(message_num, QueuedAck::Naxplanation(error));
        self.drain(gifts);
        self.feed_packets(now, gifts);
    }

    /// Drop every trace of a message from the send path.
    fn flush_message(&mut self, now: Instant, message_num: MessageNum, gifts: &mut Vec<PumpGift>) {
        self.packet_pump.on_done(now, message_num, gifts);
        self.unsent_fragments
            .retain(|fragment| fragment.message_num != message_num);
    }

    /// Release results to the caller from `current` upward. A bare
    /// nack blocks until its naxplanation upgrades it.
    fn drain(&mut self, gifts: &mut Vec<PumpGift>) {
        while let Some(ack) = self.queued_acks.get(&self.current) {
            let error = match ack {
                QueuedAck::Ok { .. } => None,
                QueuedAck::Naxplanation(error) => Some(error.clone()),
                QueuedAck::Nack => return,
            };
            trace!(num = self.current.0, nacked = error.is_some(), "flow done");
            self.queued_acks.remove(&self.current);
            gifts.push(PumpGift::Done {
                num: self.current,
                error,
            });
            self.current = self.current.next();
        }
    }

    /// Flow timer fired.
    pub fn wake(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        self.packet_pump.wake(now, gifts);
    }

    /// Congestion reset.
    pub fn prod(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        self.packet_pump.prod(now, gifts);
    }

    /// Re-arm a lost timer after a state reload.
    pub fn stir(&mut self, now: Instant, gifts: &mut Vec<PumpGift>) {
        if self.packet_pump.next_wake.is_none() && !self.packet_pump.live.is_empty() {
            gifts.push(PumpGift::Wait(now));
            self.packet_pump.next_wake = Some(now);
        }
    }
}
