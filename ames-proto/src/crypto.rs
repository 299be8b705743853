//! Packet crypto: the per-peer symmetric key (AES-SIV), ECDH key
//! agreement, and comet self-attestations.

use crate::ship::{Class, Ship};
use crate::wire::{cue, jam, Attestation, Life, OpenMeat};
use crate::ProtoError;
use aes_siv::siv::Aes128Siv;
use aes_siv::KeyInit;
use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

const SHUT_KEY_CONTEXT: &str = "ames shut key v1";

/// A ship's private key pair for one life: an ed25519 signing seed and
/// an x25519 exchange secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct Ring {
    sign: [u8; 32],
    crypt: [u8; 32],
}

/// The public counterpart of a [`Ring`]: what the PKI publishes and
/// what comets attest to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pass {
    pub sign: [u8; 32],
    pub crypt: [u8; 32],
}

impl Ring {
    pub fn generate(rng: &mut (impl rand::RngCore + rand::CryptoRng)) -> Self {
        let mut sign = [0u8; 32];
        let mut crypt = [0u8; 32];
        rng.fill_bytes(&mut sign);
        rng.fill_bytes(&mut crypt);
        Ring { sign, crypt }
    }

    pub fn pass(&self) -> Pass {
        let signing = SigningKey::from_bytes(&self.sign);
        Pass {
            sign: signing.verifying_key().to_bytes(),
            crypt: XPublicKey::from(&StaticSecret::from(self.crypt)).to_bytes(),
        }
    }

    /// Sign a comet self-attestation introducing us to `rcvr`.
    pub fn attest(
        &self,
        sndr: Ship,
        rcvr: Ship,
        rcvr_life: Life,
    ) -> Result<OpenMeat, ProtoError> {
        let body = jam(&Attestation {
            pass: self.pass(),
            sndr,
            sndr_life: Life(1),
            rcvr,
            rcvr_life,
        })?;
        let signing = SigningKey::from_bytes(&self.sign);
        let signature = signing.sign(&body);
        Ok(OpenMeat::Attest {
            signature: Bytes::copy_from_slice(&signature.to_bytes()),
            body,
        })
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ring(..)")
    }
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pass({}..)", &hex::encode(self.sign)[..8])
    }
}

impl Pass {
    /// A comet's address is the fingerprint of its key: the first
    /// sixteen bytes of the hash over both public halves.
    pub fn fingerprint(&self) -> Ship {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.sign);
        hasher.update(&self.crypt);
        let digest = hasher.finalize();
        let mut word = [0u8; 16];
        word.copy_from_slice(&digest.as_bytes()[..16]);
        Ship(u128::from_le_bytes(word))
    }
}

/// Verify a received attestation: the signature must cover `body`
/// under the attested key, the key must hash to the sender address,
/// and the sender must actually be a comet.
pub fn verify_attestation(signature: &[u8], body: &[u8]) -> Result<Attestation, ProtoError> {
    let attestation: Attestation = cue(body)?;
    let verifying = VerifyingKey::from_bytes(&attestation.pass.sign)
        .map_err(|_| ProtoError::BadSignature)?;
    let signature: [u8; 64] = signature
        .try_into()
        .map_err(|_| ProtoError::BadSignature)?;
    verifying
        .verify(body, &Signature::from_bytes(&signature))
        .map_err(|_| ProtoError::BadSignature)?;
    if attestation.sndr.class() != Class::Comet
        || attestation.pass.fingerprint() != attestation.sndr
    {
        return Err(ProtoError::BadFingerprint);
    }
    Ok(attestation)
}

/// The AES-SIV key shared with one peer at one (our-life, her-life)
/// pair. Derived, never stored on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SymmetricKey(bytes)
    }

    /// Encrypt a shut-packet plaintext. The associated data binds the
    /// ciphertext to both addresses and both life epochs.
    pub fn seal(
        &self,
        sndr: Ship,
        rcvr: Ship,
        sndr_life: Life,
        rcvr_life: Life,
        plaintext: &[u8],
    ) -> Result<Bytes, ProtoError> {
        let mut cipher = Aes128Siv::new(&self.0.into());
        cipher
            .encrypt(aad(sndr, rcvr, sndr_life, rcvr_life).iter(), plaintext)
            .map(Bytes::from)
            .map_err(|_| ProtoError::Decrypt)
    }

    pub fn open(
        &self,
        sndr: Ship,
        rcvr: Ship,
        sndr_life: Life,
        rcvr_life: Life,
        ciphertext: &[u8],
    ) -> Result<Bytes, ProtoError> {
        let mut cipher = Aes128Siv::new(&self.0.into());
        cipher
            .decrypt(aad(sndr, rcvr, sndr_life, rcvr_life).iter(), ciphertext)
            .map(Bytes::from)
            .map_err(|_| ProtoError::Decrypt)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey({}..)", &hex::encode(self.0)[..8])
    }
}

fn aad(sndr: Ship, rcvr: Ship, sndr_life: Life, rcvr_life: Life) -> [Vec<u8>; 4] {
    [
        sndr.0.to_le_bytes().to_vec(),
        rcvr.0.to_le_bytes().to_vec(),
        sndr_life.0.to_le_bytes().to_vec(),
        rcvr_life.0.to_le_bytes().to_vec(),
    ]
}

/// ECDH agreement: both sides derive the same key from their own ring
/// and the other's pass.
pub fn shared_key(ours: &Ring, hers: &Pass) -> SymmetricKey {
    let secret = StaticSecret::from(ours.crypt);
    let shared = secret.diffie_hellman(&XPublicKey::from(hers.crypt));
    SymmetricKey(blake3::derive_key(SHUT_KEY_CONTEXT, shared.as_bytes()))
}
