//! Payment codes.
//!
//! Reusable payment codes in the three versions this workspace understands:
//! the 80-byte legacy wire form (versions 1 and 2) and the 66-byte version 3
//! form. A code is announced to a counterparty as a blinded three-element
//! payload only the counterparty can unblind, and once both sides hold each
//! other's code they derive a fresh pairwise key per transaction so no
//! address is ever reused.
//!
//! # Security
//!
//! Blinding masks come from an ECDH shared point expanded with HMAC-SHA512.
//! An unblinded code is accepted only after its key parses as a curve point
//! and, where the version defines one, its locator matches the accompanying
//! element.

use hmac::{Hmac, Mac};
use secp256k1::{ecdh, PublicKey, Scalar, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::hd;

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// Wire size of a version 1/2 payment code.
pub const LEGACY_CODE_SIZE: usize = 80;
/// Wire size of a version 3 payment code.
pub const V3_CODE_SIZE: usize = 66;
/// Serialized transaction outpoint, the legacy blinding key material.
pub const OUTPOINT_SIZE: usize = 36;

const LEGACY_ELEMENT_SIZE: usize = 65;
const V3_ELEMENT_SIZE: usize = 33;
const BITMESSAGE_FEATURE: u8 = 0x01;

#[derive(thiserror::Error, Debug)]
pub enum PaymentCodeError {
    #[error("operation not supported for this payment code version")]
    NotSupported,
    #[error("requested version {requested} exceeds available version {actual}")]
    VersionTooHigh { requested: u8, actual: u8 },
    #[error("expected payment code version {expected}, got {actual}")]
    IncompatibleVersion { expected: u8, actual: u8 },
    #[error("locator mismatch")]
    InvalidLocator,
    #[error("expected 3 notification elements, got {0}")]
    WrongElementCount(usize),
    #[error("element {index} has {size} bytes, expected {expected}")]
    InvalidElementSize {
        index: usize,
        size: usize,
        expected: usize,
    },
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("derivation failed: {0}")]
    Derivation(String),
}

/// Blockchain a per-transaction key targets. The salt feeds the version 3
/// shared secret so key sequences never collide across chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Bitcoin,
    Testnet,
    Litecoin,
}

impl Chain {
    fn salt(self) -> &'static [u8] {
        match self {
            Chain::Bitcoin => b"bitcoin",
            Chain::Testnet => b"testnet",
            Chain::Litecoin => b"litecoin",
        }
    }
}

/// A reusable payment code: version, compressed public key, chain code, and
/// the legacy Bitmessage notification pair only version 1 carries.
///
/// Immutable value type; equality is structural, and `code_id` is a digest
/// of the key material alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCode {
    version: u8,
    key: [u8; 33],
    chain_code: [u8; 32],
    bitmessage: Option<(u8, u8)>,
}

impl PaymentCode {
    pub fn new(version: u8, key: &PublicKey, chain_code: [u8; 32]) -> Result<Self, PaymentCodeError> {
        Self::build(version, key.serialize(), chain_code, None)
    }

    /// Attach the legacy Bitmessage notification pair. Only the version 1
    /// layout has room for it; other versions ignore the call.
    pub fn with_bitmessage(mut self, version: u8, stream: u8) -> Self {
        if self.version == 1 {
            self.bitmessage = Some((version, stream));
        }
        self
    }

    fn build(
        version: u8,
        key: [u8; 33],
        chain_code: [u8; 32],
        bitmessage: Option<(u8, u8)>,
    ) -> Result<Self, PaymentCodeError> {
        if !(1..=3).contains(&version) {
            return Err(PaymentCodeError::NotSupported);
        }
        PublicKey::from_slice(&key).map_err(|e| PaymentCodeError::InvalidKey(e.to_string()))?;
        Ok(Self {
            version,
            key,
            chain_code,
            bitmessage,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn key(&self) -> &[u8; 33] {
        &self.key
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn bitmessage(&self) -> Option<(u8, u8)> {
        self.bitmessage
    }

    /// The code's key as a curve point.
    pub fn public_key(&self) -> Result<PublicKey, PaymentCodeError> {
        PublicKey::from_slice(&self.key).map_err(|e| PaymentCodeError::InvalidKey(e.to_string()))
    }

    /// Stable identifier: hex digest of key and chain code.
    pub fn code_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(self.chain_code);
        hex::encode(hasher.finalize())
    }

    /// Negotiate the version to speak. Zero means "whatever the code
    /// supports"; asking for more than the code supports is an error, never
    /// a silent clamp.
    pub fn effective_version(requested: u8, actual: u8) -> Result<u8, PaymentCodeError> {
        if requested == 0 {
            Ok(actual)
        } else if requested <= actual {
            Ok(requested)
        } else {
            Err(PaymentCodeError::VersionTooHigh { requested, actual })
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self.version {
            3 => self.serialize_v3().to_vec(),
            _ => self.serialize_legacy().to_vec(),
        }
    }

    /// Parse either wire form, selected by length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PaymentCodeError> {
        match bytes.len() {
            LEGACY_CODE_SIZE => {
                let version = bytes[0];
                let features = bytes[1];
                let mut key = [0u8; 33];
                key[0] = bytes[2];
                key[1..].copy_from_slice(&bytes[3..35]);
                let mut chain_code = [0u8; 32];
                chain_code.copy_from_slice(&bytes[35..67]);
                let bitmessage = (version == 1 && features & BITMESSAGE_FEATURE != 0)
                    .then(|| (bytes[67], bytes[68]));
                Self::build(version, key, chain_code, bitmessage)
            }
            V3_CODE_SIZE => {
                let version = bytes[0];
                let mut key = [0u8; 33];
                key[0] = bytes[1];
                key[1..].copy_from_slice(&bytes[2..34]);
                let mut chain_code = [0u8; 32];
                chain_code.copy_from_slice(&bytes[34..66]);
                Self::build(version, key, chain_code, None)
            }
            other => Err(PaymentCodeError::InvalidKey(format!(
                "payment code length {other} not recognized"
            ))),
        }
    }

    /// `[version, features, sign, x, chain, reserved]`, 80 bytes.
    fn serialize_legacy(&self) -> [u8; LEGACY_CODE_SIZE] {
        let mut out = [0u8; LEGACY_CODE_SIZE];
        out[0] = self.version;
        if let Some((bm_version, stream)) = self.bitmessage {
            out[1] = BITMESSAGE_FEATURE;
            out[67] = bm_version;
            out[68] = stream;
        }
        out[2] = self.key[0];
        out[3..35].copy_from_slice(&self.key[1..]);
        out[35..67].copy_from_slice(&self.chain_code);
        out
    }

    /// `[version, sign, x, chain]`, 66 bytes.
    fn serialize_v3(&self) -> [u8; V3_CODE_SIZE] {
        let mut out = [0u8; V3_CODE_SIZE];
        out[0] = self.version;
        out[1] = self.key[0];
        out[2..34].copy_from_slice(&self.key[1..]);
        out[34..66].copy_from_slice(&self.chain_code);
        out
    }

    /// Public locator other parties search for. Version 1 predates locators.
    pub fn locator(&self) -> Result<[u8; 32], PaymentCodeError> {
        match self.version {
            1 => Err(PaymentCodeError::NotSupported),
            2 => {
                let digest = Sha256::digest(self.serialize_legacy());
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                Ok(out)
            }
            _ => hmac_sha256(&self.chain_code, &[self.version]),
        }
    }

    /// Blind this code for a version 1/2 recipient. The mask is keyed by the
    /// transaction outpoint and derived from ECDH between `local_key` and
    /// the recipient's code key; x and chain code are masked, everything
    /// else rides clear.
    pub fn blind(
        &self,
        local_key: &SecretKey,
        recipient: &PaymentCode,
        outpoint: &[u8; OUTPOINT_SIZE],
    ) -> Result<[u8; LEGACY_CODE_SIZE], PaymentCodeError> {
        if recipient.version > 2 {
            return Err(PaymentCodeError::IncompatibleVersion {
                expected: 2,
                actual: recipient.version,
            });
        }
        let mask = legacy_mask(outpoint, &recipient.public_key()?, local_key)?;
        let mut payload = self.serialize_legacy();
        xor_in_place(&mut payload[3..35], &mask[..32]);
        xor_in_place(&mut payload[35..67], &mask[32..]);
        Ok(payload)
    }

    /// Undo `blind`. `sender_key` is the public half of the key the sender
    /// blinded with.
    pub fn unblind(
        payload: &[u8],
        local_key: &SecretKey,
        sender_key: &PublicKey,
        outpoint: &[u8; OUTPOINT_SIZE],
    ) -> Result<Self, PaymentCodeError> {
        if payload.len() != LEGACY_CODE_SIZE {
            return Err(PaymentCodeError::InvalidElementSize {
                index: 2,
                size: payload.len(),
                expected: LEGACY_CODE_SIZE,
            });
        }
        let mask = legacy_mask(outpoint, sender_key, local_key)?;
        let mut bytes = [0u8; LEGACY_CODE_SIZE];
        bytes.copy_from_slice(payload);
        xor_in_place(&mut bytes[3..35], &mask[..32]);
        xor_in_place(&mut bytes[35..67], &mask[32..]);
        Self::from_bytes(&bytes)
    }

    /// Blind this code for a version 3 recipient. The mask is keyed by the
    /// ephemeral public key instead of an outpoint; the sign byte is
    /// transmitted clear.
    pub fn blind_v3(
        &self,
        ephemeral: &SecretKey,
        recipient: &PaymentCode,
    ) -> Result<[u8; V3_CODE_SIZE], PaymentCodeError> {
        if recipient.version < 3 {
            return Err(PaymentCodeError::IncompatibleVersion {
                expected: 3,
                actual: recipient.version,
            });
        }
        let secp = Secp256k1::new();
        let ephemeral_public = PublicKey::from_secret_key(&secp, ephemeral);
        let mask = v3_mask(&ephemeral_public, &recipient.public_key()?, ephemeral)?;
        let mut payload = self.serialize_v3();
        xor_in_place(&mut payload[2..34], &mask[..32]);
        xor_in_place(&mut payload[34..66], &mask[32..]);
        Ok(payload)
    }

    /// Undo `blind_v3` with the sender's ephemeral public key.
    pub fn unblind_v3(
        payload: &[u8],
        local_key: &SecretKey,
        ephemeral: &PublicKey,
    ) -> Result<Self, PaymentCodeError> {
        if payload.len() != V3_CODE_SIZE {
            return Err(PaymentCodeError::InvalidElementSize {
                index: 2,
                size: payload.len(),
                expected: V3_CODE_SIZE,
            });
        }
        let mask = v3_mask(ephemeral, ephemeral, local_key)?;
        let mut bytes = [0u8; V3_CODE_SIZE];
        bytes.copy_from_slice(payload);
        xor_in_place(&mut bytes[2..34], &mask[..32]);
        xor_in_place(&mut bytes[34..66], &mask[32..]);
        Self::from_bytes(&bytes)
    }

    /// Build the three-element payload announcing this code to `recipient`.
    ///
    /// `local_key` is the DH private key on this side: the notification key
    /// for version 1/2 codes, a fresh ephemeral for version 3. The element
    /// layout follows this code's version; the blind step enforces that the
    /// recipient can actually undo it.
    pub fn generate_notification_elements(
        &self,
        local_key: &SecretKey,
        recipient: &PaymentCode,
        outpoint: &[u8; OUTPOINT_SIZE],
    ) -> Result<NotificationElements, PaymentCodeError> {
        let secp = Secp256k1::new();
        let local_public = PublicKey::from_secret_key(&secp, local_key);
        match self.version {
            1 | 2 => {
                let payload = self.blind(local_key, recipient, outpoint)?;
                let mut locator = vec![0u8; LEGACY_ELEMENT_SIZE];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut locator);
                if self.version == 2 {
                    locator[..32].copy_from_slice(&self.locator()?);
                }
                Ok(NotificationElements {
                    version: self.version,
                    key: local_public.serialize_uncompressed().to_vec(),
                    locator,
                    payload: payload.to_vec(),
                })
            }
            _ => {
                let payload = self.blind_v3(local_key, recipient)?;
                let mut locator = Vec::with_capacity(V3_ELEMENT_SIZE);
                locator.push(self.version);
                locator.extend_from_slice(&self.locator()?);
                Ok(NotificationElements {
                    version: self.version,
                    key: local_public.serialize().to_vec(),
                    locator,
                    payload: payload.to_vec(),
                })
            }
        }
    }

    /// Decode a received element triple back into the announced code.
    ///
    /// `version` is the discriminant carried alongside the elements and
    /// selects the layout; the outpoint only participates in the legacy
    /// mask. Count, sizes, the embedded version, and the locator are all
    /// checked before the code is accepted.
    pub fn decode_notification_elements(
        version: u8,
        elements: &[Vec<u8>],
        local_key: &SecretKey,
        outpoint: &[u8; OUTPOINT_SIZE],
    ) -> Result<Self, PaymentCodeError> {
        if elements.len() != 3 {
            return Err(PaymentCodeError::WrongElementCount(elements.len()));
        }
        let expected = match version {
            1 | 2 => [LEGACY_ELEMENT_SIZE, LEGACY_ELEMENT_SIZE, LEGACY_CODE_SIZE],
            3 => [V3_ELEMENT_SIZE, V3_ELEMENT_SIZE, V3_CODE_SIZE],
            _ => return Err(PaymentCodeError::NotSupported),
        };
        for (index, (element, expected)) in elements.iter().zip(expected).enumerate() {
            if element.len() != expected {
                return Err(PaymentCodeError::InvalidElementSize {
                    index,
                    size: element.len(),
                    expected,
                });
            }
        }

        let sender_key = PublicKey::from_slice(&elements[0])
            .map_err(|e| PaymentCodeError::InvalidKey(e.to_string()))?;
        let code = match version {
            1 | 2 => Self::unblind(&elements[2], local_key, &sender_key, outpoint)?,
            _ => Self::unblind_v3(&elements[2], local_key, &sender_key)?,
        };
        if code.version != version {
            return Err(PaymentCodeError::IncompatibleVersion {
                expected: version,
                actual: code.version,
            });
        }
        match version {
            // Version 1 has no locator to check; its element is pure padding.
            1 => {}
            2 => {
                if elements[1][..32] != code.locator()? {
                    return Err(PaymentCodeError::InvalidLocator);
                }
            }
            _ => {
                if elements[1][0] != version || elements[1][1..] != code.locator()? {
                    return Err(PaymentCodeError::InvalidLocator);
                }
            }
        }
        Ok(code)
    }

    /// Sender-side key for payment `index` toward `other`: this side's child
    /// key plus the pairwise shared scalar. Carries the private half.
    pub fn outgoing(
        &self,
        my_secret: &SecretKey,
        other: &PaymentCode,
        index: u32,
        chain: Chain,
    ) -> Result<TransactionKey, PaymentCodeError> {
        if index >= hd::HARDENED {
            return Err(PaymentCodeError::Derivation(
                "transaction keys use non-hardened indexes".into(),
            ));
        }
        let (child, _) = hd::ckd_priv_secp(my_secret, &self.chain_code, index)
            .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
        let tweak = self.shared_scalar(other, my_secret, chain)?;
        let secret = child
            .add_tweak(&tweak)
            .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
        let secp = Secp256k1::new();
        Ok(TransactionKey {
            public: PublicKey::from_secret_key(&secp, &secret),
            secret: Some(secret),
        })
    }

    /// Receiver-side key for payment `index` from `other`: the sender's
    /// public child key plus the same shared scalar. Watch-only; the public
    /// half equals the sender's `outgoing` key.
    pub fn incoming(
        &self,
        my_secret: &SecretKey,
        other: &PaymentCode,
        index: u32,
        chain: Chain,
    ) -> Result<TransactionKey, PaymentCodeError> {
        let (child, _) = hd::ckd_pub_secp(&other.public_key()?, &other.chain_code, index)
            .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
        let tweak = self.shared_scalar(other, my_secret, chain)?;
        let secp = Secp256k1::new();
        let public = child
            .add_exp_tweak(&secp, &tweak)
            .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
        Ok(TransactionKey {
            public,
            secret: None,
        })
    }

    /// Pairwise scalar both sides can compute: digest of the static-static
    /// ECDH x-coordinate, salted with the chain name when both codes speak
    /// version 3.
    fn shared_scalar(
        &self,
        other: &PaymentCode,
        my_secret: &SecretKey,
        chain: Chain,
    ) -> Result<Scalar, PaymentCodeError> {
        let shared = ecdh::shared_secret_point(&other.public_key()?, my_secret);
        let digest = Sha256::digest(&shared[..32]);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        if self.version.min(other.version) >= 3 {
            bytes = hmac_sha256(chain.salt(), &bytes)?;
        }
        Scalar::from_be_bytes(bytes)
            .map_err(|_| PaymentCodeError::Derivation("shared scalar out of range".into()))
    }
}

/// Key pair (or public half) for one payment in a pairwise sequence.
#[derive(Debug, Clone)]
pub struct TransactionKey {
    pub public: PublicKey,
    pub secret: Option<SecretKey>,
}

/// The (A, F, G) announcement triple plus the version discriminant that
/// selects its layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationElements {
    pub version: u8,
    /// A: the sender's DH public key, instantiable as a curve point.
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    /// F: locator-tagged element, padded to the version's element size.
    #[serde(with = "serde_bytes")]
    pub locator: Vec<u8>,
    /// G: the blinded payment code payload.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl NotificationElements {
    /// Wire order expected by the decoder.
    pub fn elements(&self) -> Vec<Vec<u8>> {
        vec![self.key.clone(), self.locator.clone(), self.payload.clone()]
    }
}

fn xor_in_place(target: &mut [u8], mask: &[u8]) {
    for (byte, mask) in target.iter_mut().zip(mask) {
        *byte ^= mask;
    }
}

fn legacy_mask(
    outpoint: &[u8; OUTPOINT_SIZE],
    point: &PublicKey,
    scalar: &SecretKey,
) -> Result<[u8; 64], PaymentCodeError> {
    let shared = ecdh::shared_secret_point(point, scalar);
    hmac_sha512(outpoint, &shared[..32])
}

fn v3_mask(
    ephemeral_public: &PublicKey,
    point: &PublicKey,
    scalar: &SecretKey,
) -> Result<[u8; 64], PaymentCodeError> {
    let shared = ecdh::shared_secret_point(point, scalar);
    hmac_sha512(&ephemeral_public.serialize(), &shared[..32])
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64], PaymentCodeError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], PaymentCodeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PaymentCodeError::Derivation(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secp() -> Secp256k1<secp256k1::All> {
        Secp256k1::new()
    }

    fn code_pair(version: u8) -> (PaymentCode, SecretKey) {
        let mut chain = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut chain);
        let secret = SecretKey::new(&mut rand::thread_rng());
        let code = PaymentCode::new(
            version,
            &PublicKey::from_secret_key(&secp(), &secret),
            chain,
        )
        .unwrap();
        (code, secret)
    }

    #[test]
    fn test_legacy_wire_roundtrip() {
        let (code, _) = code_pair(2);
        let bytes = code.to_bytes();
        assert_eq!(bytes.len(), LEGACY_CODE_SIZE);
        assert_eq!(PaymentCode::from_bytes(&bytes).unwrap(), code);
    }

    #[test]
    fn test_v1_bitmessage_roundtrip() {
        let (code, _) = code_pair(1);
        let code = code.with_bitmessage(4, 1);
        let bytes = code.to_bytes();
        assert_eq!(bytes[1], BITMESSAGE_FEATURE);
        let back = PaymentCode::from_bytes(&bytes).unwrap();
        assert_eq!(back.bitmessage(), Some((4, 1)));
        assert_eq!(back, code);
    }

    #[test]
    fn test_bitmessage_ignored_outside_v1() {
        let (code, _) = code_pair(2);
        let code = code.with_bitmessage(4, 1);
        assert_eq!(code.bitmessage(), None);
    }

    #[test]
    fn test_v3_wire_roundtrip() {
        let (code, _) = code_pair(3);
        let bytes = code.to_bytes();
        assert_eq!(bytes.len(), V3_CODE_SIZE);
        assert_eq!(PaymentCode::from_bytes(&bytes).unwrap(), code);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            PaymentCode::from_bytes(&[0u8; 40]),
            Err(PaymentCodeError::InvalidKey(_))
        ));

        let (code, _) = code_pair(2);
        let mut bytes = code.to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            PaymentCode::from_bytes(&bytes),
            Err(PaymentCodeError::NotSupported)
        ));

        let mut bytes = code.to_bytes();
        bytes[2] = 0x05;
        assert!(matches!(
            PaymentCode::from_bytes(&bytes),
            Err(PaymentCodeError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_effective_version() {
        assert_eq!(PaymentCode::effective_version(0, 3).unwrap(), 3);
        assert_eq!(PaymentCode::effective_version(2, 3).unwrap(), 2);
        assert_eq!(PaymentCode::effective_version(3, 3).unwrap(), 3);
        assert!(matches!(
            PaymentCode::effective_version(3, 2),
            Err(PaymentCodeError::VersionTooHigh {
                requested: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_locator_per_version() {
        let (v1, _) = code_pair(1);
        assert!(matches!(v1.locator(), Err(PaymentCodeError::NotSupported)));

        let (v2, _) = code_pair(2);
        let digest = Sha256::digest(v2.to_bytes());
        assert_eq!(v2.locator().unwrap(), digest.as_slice());

        let (v3, _) = code_pair(3);
        let expected = hmac_sha256(v3.chain_code(), &[3]).unwrap();
        assert_eq!(v3.locator().unwrap(), expected);
    }

    #[test]
    fn test_code_id_tracks_key_material() {
        let (code, _) = code_pair(2);
        let same = PaymentCode::from_bytes(&code.to_bytes()).unwrap();
        assert_eq!(code.code_id(), same.code_id());

        let other = PaymentCode::new(2, &code.public_key().unwrap(), [1u8; 32]).unwrap();
        assert_ne!(code.code_id(), other.code_id());
    }

    #[test]
    fn test_blind_unblind_roundtrip() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, recipient_secret) = code_pair(2);
        let outpoint = [9u8; OUTPOINT_SIZE];

        let blinded = sender.blind(&sender_secret, &recipient, &outpoint).unwrap();
        assert_ne!(blinded[3..67], sender.to_bytes()[3..67]);

        let restored = PaymentCode::unblind(
            &blinded,
            &recipient_secret,
            &sender.public_key().unwrap(),
            &outpoint,
        )
        .unwrap();
        assert_eq!(restored, sender);
        assert_eq!(restored.key(), sender.key());
        assert_eq!(restored.chain_code(), sender.chain_code());
    }

    #[test]
    fn test_blind_rejects_v3_recipient() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, _) = code_pair(3);
        let err = sender
            .blind(&sender_secret, &recipient, &[0u8; OUTPOINT_SIZE])
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentCodeError::IncompatibleVersion {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_blind_v3_roundtrip() {
        let (sender, _) = code_pair(3);
        let (recipient, recipient_secret) = code_pair(3);
        let ephemeral = SecretKey::new(&mut rand::thread_rng());
        let ephemeral_public = PublicKey::from_secret_key(&secp(), &ephemeral);

        let blinded = sender.blind_v3(&ephemeral, &recipient).unwrap();
        let restored =
            PaymentCode::unblind_v3(&blinded, &recipient_secret, &ephemeral_public).unwrap();
        assert_eq!(restored, sender);
    }

    #[test]
    fn test_blind_v3_rejects_legacy_recipient() {
        let (sender, _) = code_pair(3);
        let (recipient, _) = code_pair(1);
        let ephemeral = SecretKey::new(&mut rand::thread_rng());
        assert!(matches!(
            sender.blind_v3(&ephemeral, &recipient),
            Err(PaymentCodeError::IncompatibleVersion {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_notification_elements_v2() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, recipient_secret) = code_pair(2);
        let outpoint = [3u8; OUTPOINT_SIZE];

        let elements = sender
            .generate_notification_elements(&sender_secret, &recipient, &outpoint)
            .unwrap();
        assert_eq!(elements.version, 2);
        assert_eq!(elements.key.len(), LEGACY_ELEMENT_SIZE);
        assert_eq!(elements.locator.len(), LEGACY_ELEMENT_SIZE);
        assert_eq!(elements.payload.len(), LEGACY_CODE_SIZE);
        assert_eq!(&elements.locator[..32], &sender.locator().unwrap());

        let decoded = PaymentCode::decode_notification_elements(
            elements.version,
            &elements.elements(),
            &recipient_secret,
            &outpoint,
        )
        .unwrap();
        assert_eq!(decoded, sender);
    }

    #[test]
    fn test_notification_elements_v1_skips_locator() {
        let (sender, sender_secret) = code_pair(1);
        let (recipient, recipient_secret) = code_pair(2);
        let outpoint = [5u8; OUTPOINT_SIZE];

        let elements = sender
            .generate_notification_elements(&sender_secret, &recipient, &outpoint)
            .unwrap();
        assert_eq!(elements.version, 1);

        let decoded = PaymentCode::decode_notification_elements(
            1,
            &elements.elements(),
            &recipient_secret,
            &outpoint,
        )
        .unwrap();
        assert_eq!(decoded, sender);
    }

    #[test]
    fn test_notification_elements_v3() {
        let (sender, _) = code_pair(3);
        let (recipient, recipient_secret) = code_pair(3);
        let ephemeral = SecretKey::new(&mut rand::thread_rng());
        let outpoint = [0u8; OUTPOINT_SIZE];

        let elements = sender
            .generate_notification_elements(&ephemeral, &recipient, &outpoint)
            .unwrap();
        assert_eq!(elements.version, 3);
        assert_eq!(elements.key.len(), V3_ELEMENT_SIZE);
        assert_eq!(elements.locator.len(), V3_ELEMENT_SIZE);
        assert_eq!(elements.locator[0], 3);
        assert_eq!(elements.payload.len(), V3_CODE_SIZE);

        let decoded = PaymentCode::decode_notification_elements(
            3,
            &elements.elements(),
            &recipient_secret,
            &outpoint,
        )
        .unwrap();
        assert_eq!(decoded, sender);
    }

    #[test]
    fn test_decode_rejects_wrong_count() {
        let (_, secret) = code_pair(2);
        let err = PaymentCode::decode_notification_elements(
            2,
            &[vec![0; 65], vec![0; 80]],
            &secret,
            &[0u8; OUTPOINT_SIZE],
        )
        .unwrap_err();
        assert!(matches!(err, PaymentCodeError::WrongElementCount(2)));
    }

    #[test]
    fn test_decode_rejects_wrong_sizes() {
        let (_, secret) = code_pair(2);
        let err = PaymentCode::decode_notification_elements(
            2,
            &[vec![0; 64], vec![0; 65], vec![0; 80]],
            &secret,
            &[0u8; OUTPOINT_SIZE],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PaymentCodeError::InvalidElementSize {
                index: 0,
                size: 64,
                expected: 65
            }
        ));

        // Same triple judged by the v3 layout fails on the first element too.
        let err = PaymentCode::decode_notification_elements(
            3,
            &[vec![0; 64], vec![0; 65], vec![0; 80]],
            &secret,
            &[0u8; OUTPOINT_SIZE],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PaymentCodeError::InvalidElementSize {
                index: 0,
                expected: 33,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_tampered_locator() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, recipient_secret) = code_pair(2);
        let outpoint = [7u8; OUTPOINT_SIZE];

        let elements = sender
            .generate_notification_elements(&sender_secret, &recipient, &outpoint)
            .unwrap();
        let mut tampered = elements.elements();
        tampered[1][0] ^= 0xff;

        let err = PaymentCode::decode_notification_elements(
            2,
            &tampered,
            &recipient_secret,
            &outpoint,
        )
        .unwrap_err();
        assert!(matches!(err, PaymentCodeError::InvalidLocator));
    }

    #[test]
    fn test_decode_with_wrong_secret_fails() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, _) = code_pair(2);
        let wrong = SecretKey::new(&mut rand::thread_rng());
        let outpoint = [2u8; OUTPOINT_SIZE];

        let elements = sender
            .generate_notification_elements(&sender_secret, &recipient, &outpoint)
            .unwrap();
        assert!(PaymentCode::decode_notification_elements(
            2,
            &elements.elements(),
            &wrong,
            &outpoint,
        )
        .is_err());
    }

    #[test]
    fn test_transaction_keys_match_across_sides() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, recipient_secret) = code_pair(2);

        let outgoing = sender
            .outgoing(&sender_secret, &recipient, 4, Chain::Bitcoin)
            .unwrap();
        let incoming = recipient
            .incoming(&recipient_secret, &sender, 4, Chain::Bitcoin)
            .unwrap();

        assert_eq!(outgoing.public, incoming.public);
        assert!(outgoing.secret.is_some());
        assert!(incoming.secret.is_none());

        // The sender's private half really backs the shared public key.
        let derived = PublicKey::from_secret_key(&secp(), &outgoing.secret.unwrap());
        assert_eq!(derived, incoming.public);

        let next = sender
            .outgoing(&sender_secret, &recipient, 5, Chain::Bitcoin)
            .unwrap();
        assert_ne!(next.public, outgoing.public);
    }

    #[test]
    fn test_transaction_keys_v3_salted_by_chain() {
        let (sender, sender_secret) = code_pair(3);
        let (recipient, recipient_secret) = code_pair(3);

        for chain in [Chain::Bitcoin, Chain::Testnet, Chain::Litecoin] {
            let outgoing = sender
                .outgoing(&sender_secret, &recipient, 0, chain)
                .unwrap();
            let incoming = recipient
                .incoming(&recipient_secret, &sender, 0, chain)
                .unwrap();
            assert_eq!(outgoing.public, incoming.public);
        }

        let mainnet = sender
            .outgoing(&sender_secret, &recipient, 0, Chain::Bitcoin)
            .unwrap();
        let testnet = sender
            .outgoing(&sender_secret, &recipient, 0, Chain::Testnet)
            .unwrap();
        assert_ne!(mainnet.public, testnet.public);
    }

    #[test]
    fn test_outgoing_rejects_hardened_index() {
        let (sender, sender_secret) = code_pair(2);
        let (recipient, _) = code_pair(2);
        assert!(sender
            .outgoing(&sender_secret, &recipient, hd::HARDENED, Chain::Bitcoin)
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_blind_roundtrip_any_outpoint(
            outpoint_bytes in proptest::collection::vec(any::<u8>(), OUTPOINT_SIZE)
        ) {
            let mut outpoint = [0u8; OUTPOINT_SIZE];
            outpoint.copy_from_slice(&outpoint_bytes);

            let (sender, sender_secret) = code_pair(2);
            let (recipient, recipient_secret) = code_pair(2);

            let blinded = sender.blind(&sender_secret, &recipient, &outpoint).unwrap();
            let restored = PaymentCode::unblind(
                &blinded,
                &recipient_secret,
                &sender.public_key().unwrap(),
                &outpoint,
            )
            .unwrap();
            prop_assert_eq!(restored, sender);
        }
    }
}
