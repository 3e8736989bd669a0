//! Hierarchical deterministic key derivation.
//!
//! BIP-32 over secp256k1 and SLIP-10 over ed25519, sharing the HMAC-SHA512
//! chain construction. The ed25519 branch is hardened-only by definition;
//! asking it for a non-hardened child is an error, never a silent promotion.
//!
//! All scalar arithmetic is delegated to the secp256k1 crate. When the curve
//! rejects a tweak (the astronomically rare invalid-child case) the error is
//! surfaced as a failed derivation rather than retried with a bumped index,
//! so callers stay in charge of index bookkeeping.

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// Bit marking a hardened path component.
pub const HARDENED: u32 = 1 << 31;

const BIP32_MASTER_KEY: &[u8] = b"Bitcoin seed";
const SLIP10_ED25519_KEY: &[u8] = b"ed25519 seed";

#[derive(thiserror::Error, Debug)]
pub enum HdError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    #[error("derivation failed: {0}")]
    Derivation(String),
    #[error("ed25519 requires hardened path components")]
    HardenedRequired,
}

/// Curve a key lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Secp256k1,
    Ed25519,
}

/// Intended use of a derived key. Metadata only; the bytes are curve keys
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Sign,
    Encrypt,
    Auth,
}

/// A derived extended key.
#[derive(Debug)]
pub struct HdKey {
    pub curve: Curve,
    pub role: KeyRole,
    pub path: Vec<u32>,
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub chain_code: Zeroizing<[u8; 32]>,
    pub private: Zeroizing<[u8; 32]>,
    /// SEC1 compressed point (33 bytes) for secp256k1, raw point (32 bytes)
    /// for ed25519.
    pub public: Vec<u8>,
    pub version: u32,
}

/// Derive the key at `path` from master seed bytes.
pub fn derive(
    seed: &[u8],
    curve: Curve,
    path: &[u32],
    role: KeyRole,
    version: u32,
) -> Result<HdKey, HdError> {
    if seed.is_empty() {
        return Err(HdError::InvalidSeed("seed is empty".into()));
    }
    if path.len() > u8::MAX as usize {
        return Err(HdError::Derivation("path too deep".into()));
    }
    match curve {
        Curve::Secp256k1 => derive_secp(seed, path, role, version),
        Curve::Ed25519 => derive_ed25519(seed, path, role, version),
    }
}

fn derive_secp(seed: &[u8], path: &[u32], role: KeyRole, version: u32) -> Result<HdKey, HdError> {
    let secp = Secp256k1::new();
    let (mut key, mut chain) = master_secp(seed)?;
    let mut parent_fingerprint = [0u8; 4];

    for &index in path {
        let public = PublicKey::from_secret_key(&secp, &key);
        parent_fingerprint = fingerprint(&public.serialize());
        let (child_key, child_chain) = ckd_priv_secp(&key, &chain, index)?;
        key = child_key;
        chain = child_chain;
    }

    let public = PublicKey::from_secret_key(&secp, &key);
    Ok(HdKey {
        curve: Curve::Secp256k1,
        role,
        path: path.to_vec(),
        depth: path.len() as u8,
        parent_fingerprint,
        chain_code: Zeroizing::new(chain),
        private: Zeroizing::new(key.secret_bytes()),
        public: public.serialize().to_vec(),
        version,
    })
}

fn derive_ed25519(
    seed: &[u8],
    path: &[u32],
    role: KeyRole,
    version: u32,
) -> Result<HdKey, HdError> {
    let (mut key, mut chain) = master_ed25519(seed)?;
    let mut parent_fingerprint = [0u8; 4];

    for &index in path {
        parent_fingerprint = fingerprint(&ed25519_ser_p(&key));
        let (child_key, child_chain) = ckd_ed25519(&key, &chain, index)?;
        key = child_key;
        chain = child_chain;
    }

    let public = ed25519_public(&key);
    Ok(HdKey {
        curve: Curve::Ed25519,
        role,
        path: path.to_vec(),
        depth: path.len() as u8,
        parent_fingerprint,
        chain_code: Zeroizing::new(chain),
        private: Zeroizing::new(key),
        public: public.to_vec(),
        version,
    })
}

fn hmac512(key: &[u8], data: &[u8]) -> Result<[u8; 64], HdError> {
    let mut mac =
        HmacSha512::new_from_slice(key).map_err(|e| HdError::Derivation(e.to_string()))?;
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    Ok(out)
}

fn split_i(i: [u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&i[..32]);
    right.copy_from_slice(&i[32..]);
    (left, right)
}

/// BIP-32 master key generation.
fn master_secp(seed: &[u8]) -> Result<(SecretKey, [u8; 32]), HdError> {
    let (left, chain) = split_i(hmac512(BIP32_MASTER_KEY, seed)?);
    let key = SecretKey::from_slice(&left)
        .map_err(|e| HdError::InvalidSeed(format!("master key rejected: {e}")))?;
    Ok((key, chain))
}

/// BIP-32 private child key derivation, hardened and normal.
pub(crate) fn ckd_priv_secp(
    key: &SecretKey,
    chain: &[u8; 32],
    index: u32,
) -> Result<(SecretKey, [u8; 32]), HdError> {
    let mut data = Vec::with_capacity(37);
    if index >= HARDENED {
        data.push(0);
        data.extend_from_slice(&key.secret_bytes());
    } else {
        let secp = Secp256k1::new();
        data.extend_from_slice(&PublicKey::from_secret_key(&secp, key).serialize());
    }
    data.extend_from_slice(&index.to_be_bytes());

    let (left, child_chain) = split_i(hmac512(chain, &data)?);
    let tweak = Scalar::from_be_bytes(left)
        .map_err(|_| HdError::Derivation("child tweak out of range".into()))?;
    let child = key
        .add_tweak(&tweak)
        .map_err(|e| HdError::Derivation(format!("curve rejected child key: {e}")))?;
    Ok((child, child_chain))
}

/// BIP-32 public child key derivation, non-hardened only.
pub(crate) fn ckd_pub_secp(
    key: &PublicKey,
    chain: &[u8; 32],
    index: u32,
) -> Result<(PublicKey, [u8; 32]), HdError> {
    if index >= HARDENED {
        return Err(HdError::Derivation(
            "hardened derivation from a public key".into(),
        ));
    }
    let mut data = Vec::with_capacity(37);
    data.extend_from_slice(&key.serialize());
    data.extend_from_slice(&index.to_be_bytes());

    let (left, child_chain) = split_i(hmac512(chain, &data)?);
    let tweak = Scalar::from_be_bytes(left)
        .map_err(|_| HdError::Derivation("child tweak out of range".into()))?;
    let secp = Secp256k1::new();
    let child = key
        .add_exp_tweak(&secp, &tweak)
        .map_err(|e| HdError::Derivation(format!("curve rejected child key: {e}")))?;
    Ok((child, child_chain))
}

/// SLIP-10 ed25519 master key generation. Any left half is acceptable.
fn master_ed25519(seed: &[u8]) -> Result<([u8; 32], [u8; 32]), HdError> {
    Ok(split_i(hmac512(SLIP10_ED25519_KEY, seed)?))
}

/// SLIP-10 ed25519 child derivation. Hardened components only.
fn ckd_ed25519(key: &[u8; 32], chain: &[u8; 32], index: u32) -> Result<([u8; 32], [u8; 32]), HdError> {
    if index < HARDENED {
        return Err(HdError::HardenedRequired);
    }
    let mut data = Vec::with_capacity(37);
    data.push(0);
    data.extend_from_slice(key);
    data.extend_from_slice(&index.to_be_bytes());
    Ok(split_i(hmac512(chain, &data)?))
}

fn ed25519_public(key: &[u8; 32]) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(key)
        .verifying_key()
        .to_bytes()
}

/// SLIP-10 serializes an ed25519 point as a zero byte plus the raw point.
fn ed25519_ser_p(key: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.push(0);
    out.extend_from_slice(&ed25519_public(key));
    out
}

/// First four bytes of RIPEMD160(SHA256(serialized public key)).
pub(crate) fn fingerprint(serialized_public: &[u8]) -> [u8; 4] {
    let sha = Sha256::digest(serialized_public);
    let hash = Ripemd160::digest(sha);
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> Vec<u8> {
        hex::decode("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    #[test]
    fn test_bip32_vector_one_master() {
        let key = derive(&test_seed(), Curve::Secp256k1, &[], KeyRole::Sign, 1).unwrap();
        assert_eq!(
            hex::encode(key.private.as_slice()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(key.chain_code.as_slice()),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
        assert_eq!(key.depth, 0);
        assert_eq!(key.parent_fingerprint, [0u8; 4]);
        assert_eq!(key.public.len(), 33);
    }

    #[test]
    fn test_bip32_vector_one_first_hardened_child() {
        let key = derive(&test_seed(), Curve::Secp256k1, &[HARDENED], KeyRole::Sign, 1).unwrap();
        assert_eq!(
            hex::encode(key.private.as_slice()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
        assert_eq!(
            hex::encode(key.chain_code.as_slice()),
            "47fdacbd0f1097043b78c63c20c34ef4ed9a111d980047ad16282c7ae6236141"
        );
        assert_eq!(key.depth, 1);
        assert_eq!(hex::encode(key.parent_fingerprint), "3442193e");
    }

    #[test]
    fn test_bip32_vector_one_mixed_path() {
        let key = derive(
            &test_seed(),
            Curve::Secp256k1,
            &[HARDENED, 1],
            KeyRole::Sign,
            1,
        )
        .unwrap();
        assert_eq!(
            hex::encode(key.private.as_slice()),
            "3c6cb8d0f6a264c91ea8b5030fadaa8e538b020f0a387421a12de9319dc93368"
        );
        assert_eq!(
            hex::encode(key.chain_code.as_slice()),
            "2a7857631386ba23dacac34180dd1983734e444fdbf774041578e9b6adb37c19"
        );
    }

    #[test]
    fn test_public_derivation_matches_private() {
        // CKDpub over the parent public key must land on the child's point.
        let parent = derive(&test_seed(), Curve::Secp256k1, &[HARDENED], KeyRole::Sign, 1).unwrap();
        let child = derive(
            &test_seed(),
            Curve::Secp256k1,
            &[HARDENED, 7],
            KeyRole::Sign,
            1,
        )
        .unwrap();

        let parent_pub = PublicKey::from_slice(&parent.public).unwrap();
        let (derived_pub, derived_chain) =
            ckd_pub_secp(&parent_pub, &parent.chain_code, 7).unwrap();
        assert_eq!(derived_pub.serialize().to_vec(), child.public);
        assert_eq!(derived_chain.as_slice(), child.chain_code.as_slice());
    }

    #[test]
    fn test_slip10_ed25519_vector_one_master() {
        let key = derive(&test_seed(), Curve::Ed25519, &[], KeyRole::Sign, 1).unwrap();
        assert_eq!(
            hex::encode(key.private.as_slice()),
            "2b4be7f19ee27bbf30c667b642d5f4aa69fd169872f8fc3059c08ebae2eb19e7"
        );
        assert_eq!(
            hex::encode(key.chain_code.as_slice()),
            "90046a93de5380a72b5e45010748567d5ea02bbf6522f979e05c0d8d8ca9fffb"
        );
        assert_eq!(
            hex::encode(&key.public),
            "a4b2856bfec510abab89753fac1ac0e1112364e7d250545963f135f2a33188ed"
        );
    }

    #[test]
    fn test_slip10_ed25519_vector_one_first_child() {
        let key = derive(&test_seed(), Curve::Ed25519, &[HARDENED], KeyRole::Sign, 1).unwrap();
        assert_eq!(
            hex::encode(key.private.as_slice()),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
        assert_eq!(
            hex::encode(key.chain_code.as_slice()),
            "8b59aa11380b624e81507a27fedda59fea6d0b779a778918a2fd3590e16e9c69"
        );
    }

    #[test]
    fn test_ed25519_rejects_non_hardened() {
        let err = derive(&test_seed(), Curve::Ed25519, &[1], KeyRole::Sign, 1).unwrap_err();
        assert!(matches!(err, HdError::HardenedRequired));
    }

    #[test]
    fn test_role_and_version_are_carried() {
        let key = derive(&test_seed(), Curve::Secp256k1, &[0], KeyRole::Encrypt, 3).unwrap();
        assert_eq!(key.role, KeyRole::Encrypt);
        assert_eq!(key.version, 3);
        assert_eq!(key.path, vec![0]);
    }

    #[test]
    fn test_empty_seed_rejected() {
        assert!(derive(&[], Curve::Secp256k1, &[], KeyRole::Sign, 1).is_err());
    }
}
