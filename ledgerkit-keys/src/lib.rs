//! # Ledgerkit Key Material
//!
//! Everything that derives, stores, or wraps key material:
//!
//! - [`seed`] / [`registry`]: BIP-39 seed lifecycle with deterministic ids,
//!   a guarded cache, and a monotonic usage index.
//! - [`hd`]: BIP-32 (secp256k1) and SLIP-10 (ed25519) child key derivation.
//! - [`paycode`]: versioned payment codes with blinded notification exchange
//!   and per-transaction key derivation.
//! - [`envelope`]: multi-recipient hybrid encryption over the credentials a
//!   nym actually holds.
//!
//! ## Security Model
//!
//! Secrets live in `Zeroizing` buffers and are wiped on drop. Lookup tags are
//! compared in constant time. Nothing in this crate performs its own curve
//! arithmetic; all EC operations go through secp256k1 and the dalek crates.

pub mod envelope;
pub mod hd;
pub mod paycode;
pub mod registry;
pub mod seed;

pub use envelope::{
    Envelope, EnvelopeError, KeyAlgorithm, LocalIdentity, Recipient, TransferKey,
};
pub use hd::{Curve, HdError, HdKey, KeyRole, HARDENED};
pub use paycode::{
    Chain, NotificationElements, PaymentCode, PaymentCodeError, TransactionKey,
};
pub use registry::SeedRegistry;
pub use seed::{Seed, SeedError, SeedLanguage, SeedStrength, SeedStyle};
