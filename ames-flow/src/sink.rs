//! The inbound half of a flow: reassembles fragments, suppresses
//! duplicates, schedules acks, and hands completed messages to the
//! local consumer one at a time.

use crate::{FlowError, SinkGift};
use ames_proto::{AckMeat, FragmentNum, MessageNum};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::trace;

/// How many inbound messages may be in flight past the last
/// consumer-acked one.
pub const RECV_WINDOW: u32 = 10;

/// A partial reassembly. The fragment count is authoritative from the
/// first fragment heard; a disagreeing fragment is a protocol
/// violation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMessage {
    pub num_fragments: FragmentNum,
    pub fragments: BTreeMap<FragmentNum, Bytes>,
}

impl PartialMessage {
    fn is_complete(&self) -> bool {
        self.fragments.len() as u32 == self.num_fragments.0
    }

    fn assemble(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.fragments.values().map(Bytes::len).sum());
        for fragment in self.fragments.values() {
            out.extend_from_slice(fragment);
        }
        out.freeze()
    }
}

/// Sequence numbers are zero-based; the watermarks hold the *next*
/// expected number on each level, so `last_acked` is also the count of
/// consumer-confirmed messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageSink {
    /// Next message-num awaiting consumer confirmation.
    pub last_acked: MessageNum,
    /// Next message-num awaiting full reassembly.
    pub last_heard: MessageNum,
    pub live_messages: BTreeMap<MessageNum, PartialMessage>,
    /// Completed messages not yet confirmed by the consumer. Only the
    /// head is ever outstanding.
    pub pending_vane_ack: VecDeque<(MessageNum, Bytes)>,
    /// Messages the consumer rejected, kept for duplicate suppression
    /// until the sender acknowledges the nack.
    pub nax: BTreeSet<MessageNum>,
}

impl MessageSink {
    /// Process one inbound fragment per the reception policy: a
    /// 10-message window, cached acks for duplicates, and no ack for a
    /// final fragment until the consumer has spoken.
    pub fn hear_fragment(
        &mut self,
        message_num: MessageNum,
        num_fragments: FragmentNum,
        fragment_num: FragmentNum,
        bytes: Bytes,
        gifts: &mut Vec<SinkGift>,
    ) -> Result<(), FlowError> {
        if num_fragments.0 == 0 || fragment_num.0 >= num_fragments.0 {
            return Err(FlowError::FragmentOutOfRange(message_num, fragment_num));
        }
        let is_final = fragment_num.0 == num_fragments.0 - 1;

        // Past the window: drop without acking.
        if message_num.0 >= self.last_acked.0 + RECV_WINDOW {
            trace!(num = message_num.0, "dropping past-window message");
            return Ok(());
        }

        // Fully processed duplicate: replay the cached verdict for a
        // final fragment, plain fragment-ack otherwise.
        if message_num < self.last_acked {
            let meat = if is_final {
                AckMeat::Message {
                    ok: !self.nax.contains(&message_num),
                    lag_ms: 0,
                }
            } else {
                AckMeat::Fragment(fragment_num)
            };
            gifts.push(SinkGift::Ack {
                num: message_num,
                meat,
            });
            return Ok(());
        }

        // Heard but not consumer-acked: never re-commit to a message
        // verdict; the final fragment is dropped silently.
        if message_num < self.last_heard {
            if !is_final {
                gifts.push(SinkGift::Ack {
                    num: message_num,
                    meat: AckMeat::Fragment(fragment_num),
                });
            }
            return Ok(());
        }

        let entry = self
            .live_messages
            .entry(message_num)
            .or_insert_with(|| PartialMessage {
                num_fragments,
                ..Default::default()
            });
        if entry.num_fragments != num_fragments {
            return Err(FlowError::FragmentCountMismatch(message_num));
        }
        entry.fragments.insert(fragment_num, bytes);
        if !is_final {
            gifts.push(SinkGift::Ack {
                num: message_num,
                meat: AckMeat::Fragment(fragment_num),
            });
        }

        self.release_completed(gifts);
        Ok(())
    }

    /// Completed messages are released to the consumer strictly in
    /// order; a message that finished early waits for its
    /// predecessors.
    fn release_completed(&mut self, gifts: &mut Vec<SinkGift>) {
        while let Some(entry) = self.live_messages.get(&self.last_heard) {
            if !entry.is_complete() {
                return;
            }
            let num = self.last_heard;
            let blob = entry.assemble();
            self.live_messages.remove(&num);
            self.last_heard = self.last_heard.next();
            trace!(num = num.0, len = blob.len(), "message reassembled");
            self.pending_vane_ack.push_back((num, blob.clone()));
            if self.pending_vane_ack.len() == 1 {
                gifts.push(SinkGift::Deliver { num, blob });
            }
        }
    }

    /// The consumer's verdict on the outstanding message. Returns the
    /// message-num it applied to; on `ok = false` the caller owes the
    /// sender a naxplanation for it.
    pub fn done(&mut self, ok: bool, gifts: &mut Vec<SinkGift>) -> Option<MessageNum> {
        let (num, _blob) = self.pending_vane_ack.pop_front()?;
        self.last_acked = self.last_acked.next();
        if !ok {
            self.nax.insert(num);
        }
        gifts.push(SinkGift::Ack {
            num,
            meat: AckMeat::Message { ok, lag_ms: 0 },
        });
        if let Some((next_num, blob)) = self.pending_vane_ack.front() {
            gifts.push(SinkGift::Deliver {
                num: *next_num,
                blob: blob.clone(),
            });
        }
        Some(num)
    }

    /// The sender acknowledged our nack; the dedup entry can go.
    pub fn drop_nack(&mut self, message_num: MessageNum) {
        self.nax.remove(&message_num);
    }
}
