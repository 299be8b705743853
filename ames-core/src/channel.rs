//! The transient channel: local identity joined with one peer's
//! identity and the symmetric key, computed per event and threaded
//! through handlers. Never stored.

use crate::peer::PeerState;
use crate::AmesError;
use ames_proto::packet::Packet;
use ames_proto::{jam, Bone, Life, Meat, MessageNum, Rift, Ship, ShutPayload, SymmetricKey};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Channel {
    pub our: Ship,
    pub her: Ship,
    pub our_life: Life,
    pub her_life: Life,
    pub her_rift: Rift,
    pub key: SymmetricKey,
}

impl Channel {
    pub fn new(our: Ship, our_life: Life, her: Ship, peer: &PeerState) -> Self {
        Channel {
            our,
            her,
            our_life,
            her_life: peer.life,
            her_rift: peer.rift,
            key: peer.symmetric_key.clone(),
        }
    }

    /// Build an outbound shut packet for one piece of flow meat. The
    /// bone travels in our polarity; the receiver flips it.
    pub fn shut_blob(
        &self,
        bone: Bone,
        message_num: MessageNum,
        meat: Meat,
    ) -> Result<Bytes, AmesError> {
        let req = matches!(meat, Meat::Fragment { .. });
        let plaintext = jam(&ShutPayload {
            bone,
            message_num,
            meat,
        })?;
        let content = self.key.seal(
            self.our,
            self.her,
            self.our_life,
            self.her_life,
            &plaintext,
        )?;
        let packet = Packet {
            sndr: self.our,
            rcvr: self.her,
            req,
            sam: true,
            sndr_tick: self.our_life.tick(),
            rcvr_tick: self.her_life.tick(),
            origin: None,
            sealed: true,
            content,
        };
        Ok(packet.encode())
    }

    /// Decrypt an inbound shut packet's content.
    pub fn open(&self, content: &[u8]) -> Result<ShutPayload, AmesError> {
        let plaintext = self
            .key
            .open(self.her, self.our, self.her_life, self.our_life, content)?;
        Ok(ames_proto::cue(&plaintext)?)
    }
}
