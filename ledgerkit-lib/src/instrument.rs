//! Payment instrument model.
//!
//! Three instrument families move value through the engine: cheques (with
//! invoices as their negative-amount mirror), account-to-account transfers,
//! and serialized cash purses. The `Instrument` sum type is closed on purpose;
//! kind checks are exhaustive matches, so adding a family is a compile error
//! everywhere a decision depends on it.
//!
//! ## Identifiers
//!
//! Instrument ids are content-derived: SHA-256 over a domain constant plus
//! the postcard canonical serialization of the value. Structurally equal
//! instruments therefore share an id, which is the anchor for idempotent
//! workflow creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AccountId, Amount, InstrumentId, ModelError, NotaryId, NymId, UnitId};

/// Domain separation constants for instrument digests.
const CHEQUE_DOMAIN: &[u8] = b"LEDGERKIT_CHEQUE_V1";
const TRANSFER_DOMAIN: &[u8] = b"LEDGERKIT_TRANSFER_V1";
const PURSE_DOMAIN: &[u8] = b"LEDGERKIT_PURSE_V1";

/// A cheque drawn against an account at a notary.
///
/// A negative `amount` makes the instrument an invoice: a request to be paid
/// rather than a promise to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cheque {
    pub notary: NotaryId,
    pub unit: UnitId,
    pub source_account: AccountId,
    pub sender: NymId,
    /// Payee, when the cheque is not drawn to bearer.
    pub recipient: Option<NymId>,
    pub amount: Amount,
    pub memo: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl Cheque {
    /// True when the amount is negative, i.e. the cheque is an invoice.
    pub fn is_invoice(&self) -> bool {
        self.amount.is_negative()
    }

    /// True once the validity window has fully elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_to < now
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.notary.is_empty() || self.unit.is_empty() {
            return Err(ModelError::InvalidInstrument(
                "cheque is missing notary or unit".into(),
            ));
        }
        if self.source_account.is_empty() || self.sender.is_empty() {
            return Err(ModelError::InvalidInstrument(
                "cheque is missing source account or sender".into(),
            ));
        }
        if self.amount.is_zero() {
            return Err(ModelError::InvalidInstrument("cheque amount is zero".into()));
        }
        if self.valid_to < self.valid_from {
            return Err(ModelError::InvalidInstrument(
                "cheque validity window is inverted".into(),
            ));
        }
        Ok(())
    }
}

/// An account-to-account transfer at a single notary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub notary: NotaryId,
    pub unit: UnitId,
    pub source_account: AccountId,
    pub destination_account: AccountId,
    pub amount: Amount,
    pub memo: String,
}

impl Transfer {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.notary.is_empty() || self.unit.is_empty() {
            return Err(ModelError::InvalidInstrument(
                "transfer is missing notary or unit".into(),
            ));
        }
        if self.source_account.is_empty() || self.destination_account.is_empty() {
            return Err(ModelError::InvalidInstrument(
                "transfer is missing an account".into(),
            ));
        }
        if self.source_account == self.destination_account {
            return Err(ModelError::InvalidInstrument(
                "transfer source and destination are the same account".into(),
            ));
        }
        if self.amount.is_zero() || self.amount.is_negative() {
            return Err(ModelError::InvalidInstrument(
                "transfer amount must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of a serialized cash purse.
///
/// The engine never inspects individual tokens; it records the purse value
/// and token count alongside the opaque serialized form held by the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purse {
    pub notary: NotaryId,
    pub unit: UnitId,
    pub value: Amount,
    pub token_count: u32,
}

impl Purse {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.notary.is_empty() || self.unit.is_empty() {
            return Err(ModelError::InvalidInstrument(
                "purse is missing notary or unit".into(),
            ));
        }
        if self.value.is_zero() || self.value.is_negative() {
            return Err(ModelError::InvalidInstrument(
                "purse value must be positive".into(),
            ));
        }
        if self.token_count == 0 {
            return Err(ModelError::InvalidInstrument("purse holds no tokens".into()));
        }
        Ok(())
    }
}

/// Closed sum of every instrument family the engine understands.
///
/// Serialized with the default externally tagged representation so the
/// postcard form stays compact and deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instrument {
    Cheque(Cheque),
    Transfer(Transfer),
    Purse(Purse),
}

impl Instrument {
    /// True for cheques and invoices alike.
    pub fn contains_cheque(&self) -> bool {
        match self {
            Instrument::Cheque(_) => true,
            Instrument::Transfer(_) | Instrument::Purse(_) => false,
        }
    }

    pub fn contains_transfer(&self) -> bool {
        match self {
            Instrument::Transfer(_) => true,
            Instrument::Cheque(_) | Instrument::Purse(_) => false,
        }
    }

    pub fn contains_cash(&self) -> bool {
        match self {
            Instrument::Purse(_) => true,
            Instrument::Cheque(_) | Instrument::Transfer(_) => false,
        }
    }

    pub fn notary(&self) -> &NotaryId {
        match self {
            Instrument::Cheque(c) => &c.notary,
            Instrument::Transfer(t) => &t.notary,
            Instrument::Purse(p) => &p.notary,
        }
    }

    pub fn unit(&self) -> &UnitId {
        match self {
            Instrument::Cheque(c) => &c.unit,
            Instrument::Transfer(t) => &t.unit,
            Instrument::Purse(p) => &p.unit,
        }
    }

    /// Face value of the instrument. Negative for invoices.
    pub fn amount(&self) -> Amount {
        match self {
            Instrument::Cheque(c) => c.amount,
            Instrument::Transfer(t) => t.amount,
            Instrument::Purse(p) => p.value,
        }
    }

    pub fn memo(&self) -> &str {
        match self {
            Instrument::Cheque(c) => &c.memo,
            Instrument::Transfer(t) => &t.memo,
            Instrument::Purse(_) => "",
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Instrument::Cheque(c) => c.validate(),
            Instrument::Transfer(t) => t.validate(),
            Instrument::Purse(p) => p.validate(),
        }
    }

    /// Content-derived identifier.
    ///
    /// Identical instrument values always produce identical ids; any field
    /// change produces a different id.
    pub fn id(&self) -> Result<InstrumentId, ModelError> {
        let (domain, bytes) = match self {
            Instrument::Cheque(c) => (CHEQUE_DOMAIN, canonical_bytes(c)?),
            Instrument::Transfer(t) => (TRANSFER_DOMAIN, canonical_bytes(t)?),
            Instrument::Purse(p) => (PURSE_DOMAIN, canonical_bytes(p)?),
        };
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(&bytes);
        Ok(InstrumentId::new(hex::encode(hasher.finalize())))
    }

    /// Canonical serialized form, the exact bytes the id is computed over.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        canonical_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        postcard::from_bytes(bytes).map_err(|e| ModelError::Serialization(e.to_string()))
    }
}

/// Deterministic serialization via postcard. The digest contract depends on
/// this never changing for a given value.
fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ModelError> {
    postcard::to_allocvec(value).map_err(|e| ModelError::Serialization(e.to_string()))
}
