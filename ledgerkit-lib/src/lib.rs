//! # Ledgerkit Core Library
//!
//! Shared vocabulary for the ledgerkit workspace: typed identifiers,
//! fixed-point amounts, the payment instrument model, and the collaborator
//! traits the engines are wired with.
//!
//! ## Design Notes
//!
//! - Instrument identifiers are content-derived: two structurally equal
//!   instruments always hash to the same id, which is what makes workflow
//!   creation idempotent one layer up.
//! - All collaborator traits are synchronous. The engines run on plain
//!   threads and shared memory; transports and schedulers live outside.
//! - `RecordStore` is a deliberately minimal key/value surface. The two
//!   bundled implementations (memory, file) are reference backends, not a
//!   storage product.

pub mod amount;
pub mod bus;
pub mod id;
pub mod instrument;
pub mod resolver;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amount::Amount;
pub use bus::{workflow_topic, NotificationBus, NullBus, ACCOUNT_EVENT_TOPIC, SEED_EVENT_TOPIC};
pub use id::{
    AccountId, ContactId, InstrumentId, NotaryId, NymId, SeedId, UnitId, WorkflowId,
};
pub use instrument::{Cheque, Instrument, Purse, Transfer};
pub use resolver::{AccountResolver, ContactResolver};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore};

#[cfg(feature = "test-utils")]
pub use test_utils::{MemoryAccountResolver, MemoryBus, MemoryContactResolver};

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
