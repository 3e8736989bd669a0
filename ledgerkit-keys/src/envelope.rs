//! Multi-recipient sealed envelopes.
//!
//! Hybrid encryption: one AES-256-GCM pass over the body under a random
//! master key, then the master key wrapped once per recipient credential via
//! ECDH and HKDF. A solver picks the cheapest set of DH algorithms that
//! covers every recipient, so a mixed ed25519/secp256k1 audience costs at
//! most one ephemeral key per algorithm, not per recipient.
//!
//! # Security
//!
//! Sealing is all-or-nothing: the payload is committed only after every
//! recipient could be served, and a failed seal leaves the envelope empty.
//! Wrapped keys are located by an 8-byte HKDF tag compared in constant time;
//! a reader who holds no matching secret learns only the recipient count.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use secp256k1::{ecdh, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use ledgerkit_lib::NymId;

/// HKDF domain separation for tag and wrap key derivation.
const ENVELOPE_INFO: &[u8] = b"LEDGERKIT_ENVELOPE_V1";

/// Algorithms the envelope can seal with, cheapest first.
const DH_UNIVERSE: [KeyAlgorithm; 2] = [KeyAlgorithm::Ed25519, KeyAlgorithm::Secp256k1];

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("no recipients")]
    NoRecipients,
    #[error("no algorithm is supported by every recipient")]
    NoCommonAlgorithm,
    #[error("envelope is already sealed")]
    AlreadySealed,
    #[error("envelope is not sealed")]
    NotSealed,
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("no local key opens this envelope")]
    NoUsableKey,
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Key algorithm of a transfer credential. The weight orders the seal
/// solver's preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Ed25519,
    Secp256k1,
    /// Legacy credentials that can be listed but never sealed to.
    LegacyRsa,
}

impl KeyAlgorithm {
    pub fn supports_dh(self) -> bool {
        !matches!(self, KeyAlgorithm::LegacyRsa)
    }

    fn weight(self) -> u32 {
        match self {
            KeyAlgorithm::Ed25519 => 1,
            KeyAlgorithm::Secp256k1 => 2,
            KeyAlgorithm::LegacyRsa => 10,
        }
    }
}

/// One public encryption credential of a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferKey {
    pub algorithm: KeyAlgorithm,
    #[serde(with = "serde_bytes")]
    pub public: Vec<u8>,
}

/// A sealing target: a nym and the credentials it can decrypt with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub nym: NymId,
    pub keys: Vec<TransferKey>,
}

impl Recipient {
    pub fn new(nym: NymId) -> Self {
        Self {
            nym,
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, algorithm: KeyAlgorithm, public: &[u8]) -> Self {
        self.keys.push(TransferKey {
            algorithm,
            public: public.to_vec(),
        });
        self
    }
}

/// The opener's side: private keys per algorithm.
///
/// Ed25519 secrets are the 32-byte signing seed; secp256k1 secrets are raw
/// 32-byte scalars. Secrets are wiped on drop.
pub struct LocalIdentity {
    pub nym: NymId,
    secrets: Vec<(KeyAlgorithm, Zeroizing<Vec<u8>>)>,
}

impl LocalIdentity {
    pub fn new(nym: NymId) -> Self {
        Self {
            nym,
            secrets: Vec::new(),
        }
    }

    pub fn with_secret(mut self, algorithm: KeyAlgorithm, secret: &[u8]) -> Self {
        self.secrets.push((algorithm, Zeroizing::new(secret.to_vec())));
        self
    }
}

/// A sealable, openable container. Empty until sealed; immutable after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    payload: Option<SealedPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SealedPayload {
    version: u8,
    ephemerals: Vec<EphemeralKey>,
    keys: Vec<WrappedKey>,
    nonce: [u8; 12],
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EphemeralKey {
    algorithm: KeyAlgorithm,
    #[serde(with = "serde_bytes")]
    public: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WrappedKey {
    algorithm: KeyAlgorithm,
    tag: [u8; 8],
    nonce: [u8; 12],
    #[serde(with = "serde_bytes")]
    key: Vec<u8>,
}

/// Ephemeral DH secret held only for the duration of one seal.
enum DhSecret {
    X25519(StaticSecret),
    Secp(SecretKey),
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sealed(&self) -> bool {
        self.payload.is_some()
    }

    /// Encrypt `plaintext` so every listed recipient can open it.
    ///
    /// The solver picks the lowest-weight set of DH algorithms covering all
    /// recipients; one ephemeral key is generated per chosen algorithm and
    /// the master key is wrapped once per matching recipient credential.
    /// Nothing is committed unless the whole procedure succeeds.
    pub fn seal(&mut self, recipients: &[Recipient], plaintext: &[u8]) -> Result<(), EnvelopeError> {
        if self.payload.is_some() {
            return Err(EnvelopeError::AlreadySealed);
        }
        if recipients.is_empty() {
            return Err(EnvelopeError::NoRecipients);
        }
        let chosen = solve(recipients)?;
        tracing::debug!(algorithms = ?chosen, recipients = recipients.len(), "sealing envelope");

        let mut ephemerals: Vec<(KeyAlgorithm, DhSecret, Vec<u8>)> =
            Vec::with_capacity(chosen.len());
        for algorithm in &chosen {
            let (secret, public) = match algorithm {
                KeyAlgorithm::Ed25519 => {
                    let secret = StaticSecret::random_from_rng(rand::thread_rng());
                    let public = x25519_dalek::PublicKey::from(&secret).to_bytes().to_vec();
                    (DhSecret::X25519(secret), public)
                }
                KeyAlgorithm::Secp256k1 => {
                    let secret = SecretKey::new(&mut rand::thread_rng());
                    let secp = Secp256k1::new();
                    let public = PublicKey::from_secret_key(&secp, &secret)
                        .serialize()
                        .to_vec();
                    (DhSecret::Secp(secret), public)
                }
                KeyAlgorithm::LegacyRsa => {
                    return Err(EnvelopeError::Crypto("rsa cannot perform dh".into()))
                }
            };
            ephemerals.push((*algorithm, secret, public));
        }

        let mut master = Zeroizing::new([0u8; 32]);
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), master.as_mut_slice());
        let mut body_nonce = [0u8; 12];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut body_nonce);

        let body_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master.as_slice()));
        let ciphertext = body_cipher
            .encrypt(Nonce::from_slice(&body_nonce), plaintext)
            .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;

        let mut keys = Vec::new();
        for recipient in recipients {
            for credential in &recipient.keys {
                let Some((algorithm, secret, public)) = ephemerals
                    .iter()
                    .find(|(algorithm, _, _)| *algorithm == credential.algorithm)
                else {
                    continue;
                };
                let shared = seal_shared(secret, &credential.public)?;
                let (tag, wrap_key) = derive_wrap_key(public, &shared)?;

                let mut nonce = [0u8; 12];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);
                let wrap_cipher =
                    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(wrap_key.as_slice()));
                let wrapped = wrap_cipher
                    .encrypt(Nonce::from_slice(&nonce), master.as_slice())
                    .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
                keys.push(WrappedKey {
                    algorithm: *algorithm,
                    tag,
                    nonce,
                    key: wrapped,
                });
            }
        }

        self.payload = Some(SealedPayload {
            version: 1,
            ephemerals: ephemerals
                .into_iter()
                .map(|(algorithm, _, public)| EphemeralKey { algorithm, public })
                .collect(),
            keys,
            nonce: body_nonce,
            ciphertext,
        });
        Ok(())
    }

    /// Decrypt with any of the local identity's secrets.
    ///
    /// Candidate wrapped keys are located by recomputing the HKDF tag and
    /// comparing in constant time; every failing candidate is skipped, and
    /// running out of candidates is `NoUsableKey`.
    pub fn open(&self, local: &LocalIdentity) -> Result<Vec<u8>, EnvelopeError> {
        let payload = self.payload.as_ref().ok_or(EnvelopeError::NotSealed)?;
        for (algorithm, secret) in &local.secrets {
            let candidates = payload
                .ephemerals
                .iter()
                .filter(|ephemeral| ephemeral.algorithm == *algorithm);
            for ephemeral in candidates {
                let Some(shared) = open_shared(*algorithm, secret.as_slice(), &ephemeral.public)
                else {
                    continue;
                };
                let Ok((tag, wrap_key)) = derive_wrap_key(&ephemeral.public, &shared) else {
                    continue;
                };
                for wrapped in payload.keys.iter().filter(|k| k.algorithm == *algorithm) {
                    if !bool::from(tag.ct_eq(&wrapped.tag)) {
                        continue;
                    }
                    let wrap_cipher =
                        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(wrap_key.as_slice()));
                    let Ok(master) = wrap_cipher
                        .decrypt(Nonce::from_slice(&wrapped.nonce), wrapped.key.as_slice())
                    else {
                        continue;
                    };
                    if master.len() != 32 {
                        continue;
                    }
                    let master = Zeroizing::new(master);
                    let body_cipher =
                        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master.as_slice()));
                    if let Ok(plaintext) = body_cipher
                        .decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
                    {
                        return Ok(plaintext);
                    }
                }
            }
        }
        Err(EnvelopeError::NoUsableKey)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        postcard::to_allocvec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        postcard::from_bytes(bytes).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }
}

/// Pick the cheapest non-empty subset of DH algorithms intersecting every
/// recipient's capability set.
fn solve(recipients: &[Recipient]) -> Result<Vec<KeyAlgorithm>, EnvelopeError> {
    let mut sets = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let set: Vec<KeyAlgorithm> = DH_UNIVERSE
            .into_iter()
            .filter(|algorithm| {
                recipient
                    .keys
                    .iter()
                    .any(|key| key.algorithm == *algorithm)
            })
            .collect();
        if set.is_empty() {
            return Err(EnvelopeError::NoCommonAlgorithm);
        }
        sets.push(set);
    }

    let mut subsets: Vec<Vec<KeyAlgorithm>> = (1usize..1 << DH_UNIVERSE.len())
        .map(|bits| {
            DH_UNIVERSE
                .into_iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .map(|(_, algorithm)| algorithm)
                .collect()
        })
        .collect();
    subsets.sort_by_key(|subset| {
        (
            subset.iter().map(|a| a.weight()).sum::<u32>(),
            subset.len(),
        )
    });

    subsets
        .into_iter()
        .find(|subset| {
            sets.iter()
                .all(|set| set.iter().any(|algorithm| subset.contains(algorithm)))
        })
        .ok_or(EnvelopeError::NoCommonAlgorithm)
}

/// DH between a seal-side ephemeral secret and a recipient credential.
fn seal_shared(secret: &DhSecret, recipient_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, EnvelopeError> {
    match secret {
        DhSecret::X25519(secret) => {
            let bytes: [u8; 32] = recipient_public
                .try_into()
                .map_err(|_| EnvelopeError::Crypto("ed25519 public key must be 32 bytes".into()))?;
            // Edwards point to its Montgomery form for x25519.
            let verifying = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
            let their_public = x25519_dalek::PublicKey::from(verifying.to_montgomery().to_bytes());
            let shared = secret.diffie_hellman(&their_public);
            Ok(Zeroizing::new(*shared.as_bytes()))
        }
        DhSecret::Secp(secret) => {
            let point = PublicKey::from_slice(recipient_public)
                .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
            let shared = ecdh::shared_secret_point(&point, secret);
            let mut out = Zeroizing::new([0u8; 32]);
            out.copy_from_slice(&shared[..32]);
            Ok(out)
        }
    }
}

/// DH between a local private key and a seal-side ephemeral public key.
/// `None` skips the candidate instead of aborting the open loop.
fn open_shared(
    algorithm: KeyAlgorithm,
    secret: &[u8],
    ephemeral_public: &[u8],
) -> Option<Zeroizing<[u8; 32]>> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let seed: [u8; 32] = secret.try_into().ok()?;
            let scalar = ed25519_dalek::SigningKey::from_bytes(&seed).to_scalar_bytes();
            let public: [u8; 32] = ephemeral_public.try_into().ok()?;
            let shared = StaticSecret::from(scalar)
                .diffie_hellman(&x25519_dalek::PublicKey::from(public));
            Some(Zeroizing::new(*shared.as_bytes()))
        }
        KeyAlgorithm::Secp256k1 => {
            let key = SecretKey::from_slice(secret).ok()?;
            let point = PublicKey::from_slice(ephemeral_public).ok()?;
            let shared = ecdh::shared_secret_point(&point, &key);
            let mut out = Zeroizing::new([0u8; 32]);
            out.copy_from_slice(&shared[..32]);
            Some(out)
        }
        KeyAlgorithm::LegacyRsa => None,
    }
}

/// Expand a DH shared secret into the 8-byte lookup tag and the 32-byte
/// wrap key, salted with the ephemeral public key.
fn derive_wrap_key(
    ephemeral_public: &[u8],
    shared: &[u8; 32],
) -> Result<([u8; 8], Zeroizing<[u8; 32]>), EnvelopeError> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_public), shared);
    let mut okm = Zeroizing::new([0u8; 40]);
    hkdf.expand(ENVELOPE_INFO, okm.as_mut_slice())
        .map_err(|e| EnvelopeError::Crypto(e.to_string()))?;
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&okm[..8]);
    let mut wrap = Zeroizing::new([0u8; 32]);
    wrap.copy_from_slice(&okm[8..]);
    Ok((tag, wrap))
}
