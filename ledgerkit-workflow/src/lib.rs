//! # Ledgerkit Payment Workflows
//!
//! A per-nym state machine over payment instruments. Every cheque, invoice,
//! transfer, and cash purse a nym touches gets one durable [`PaymentWorkflow`]
//! record carrying the instrument bytes, the parties and accounts involved,
//! and an append-only event history that replays to the current state.
//!
//! - [`record`]: the record schema, its wire numbering, and validation.
//! - [`transition`]: the legal transition table, pure and side-effect free.
//! - [`index`]: write-through storage with per-nym secondary indices.
//! - [`manager`]: the operational surface: create, convey, clear, expire,
//!   query, all under per-workflow locks.
//!
//! State only ever changes by appending an event the transition table
//! allows. An operation that the table rejects returns
//! [`WorkflowError::IllegalTransition`] and leaves the stored record exactly
//! as it was.

pub mod index;
pub mod locks;
pub mod manager;
pub mod push;
pub mod record;
pub mod transition;

pub use index::WorkflowStorage;
pub use locks::LockRegistry;
pub use manager::WorkflowManager;
pub use push::WorkflowPush;
pub use record::{
    EventKind, InstrumentSource, PaymentWorkflow, TransportKind, WorkflowEvent, WorkflowKind,
    WorkflowState, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION, SCHEMA_VERSION,
};
pub use transition::{
    advance, can_abort, can_accept, can_acknowledge, can_cancel, can_complete, can_convey,
    can_expire, replay_state,
};

/// Errors reported by workflow storage and operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow not found")]
    NotFound,

    #[error("workflow has no source instrument")]
    InstrumentNotFound,

    /// The transition table has no edge for this event in this state.
    #[error("illegal {event:?} for {kind:?} in state {state:?}")]
    IllegalTransition {
        kind: WorkflowKind,
        state: WorkflowState,
        event: EventKind,
    },

    #[error("invalid workflow record: {0}")]
    InvalidRecord(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
