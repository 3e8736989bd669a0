//! Workflow record model.
//!
//! A `PaymentWorkflow` is the durable memory of one payment instrument moving
//! through its lifecycle on behalf of one nym: the instrument snapshot it was
//! created from, the parties and accounts it touches, and an append-only event
//! history. The stored `state` field is always redundant with that history;
//! `validate` replays the events through the transition table and rejects any
//! record whose state does not match the fold.
//!
//! Records serialize as JSON with a schema version. Versions 1 through
//! [`MAX_SCHEMA_VERSION`] are a fixed contract: each workflow kind is admitted
//! only at its minimum version, and `from_bytes` enforces the full validation
//! matrix so a malformed peer-produced record never reaches storage.

use serde::{Deserialize, Serialize};

use ledgerkit_lib::{AccountId, Instrument, InstrumentId, NotaryId, NymId, UnitId, WorkflowId};

use crate::transition::replay_state;
use crate::WorkflowError;

/// Lowest schema version any decoder accepts.
pub const MIN_SCHEMA_VERSION: u32 = 1;

/// Highest schema version any decoder accepts.
pub const MAX_SCHEMA_VERSION: u32 = 20;

/// Schema version stamped on newly created records. Admits every kind.
pub const SCHEMA_VERSION: u32 = 3;

/// The nine workflow kinds, one per instrument family and direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum WorkflowKind {
    OutgoingCheque,
    IncomingCheque,
    OutgoingInvoice,
    IncomingInvoice,
    OutgoingTransfer,
    IncomingTransfer,
    InternalTransfer,
    OutgoingCash,
    IncomingCash,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 9] = [
        WorkflowKind::OutgoingCheque,
        WorkflowKind::IncomingCheque,
        WorkflowKind::OutgoingInvoice,
        WorkflowKind::IncomingInvoice,
        WorkflowKind::OutgoingTransfer,
        WorkflowKind::IncomingTransfer,
        WorkflowKind::InternalTransfer,
        WorkflowKind::OutgoingCash,
        WorkflowKind::IncomingCash,
    ];

    /// Stable numeric tag used on the wire.
    pub fn wire(self) -> u32 {
        match self {
            WorkflowKind::OutgoingCheque => 1,
            WorkflowKind::IncomingCheque => 2,
            WorkflowKind::OutgoingInvoice => 3,
            WorkflowKind::IncomingInvoice => 4,
            WorkflowKind::OutgoingTransfer => 5,
            WorkflowKind::IncomingTransfer => 6,
            WorkflowKind::InternalTransfer => 7,
            WorkflowKind::OutgoingCash => 8,
            WorkflowKind::IncomingCash => 9,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(WorkflowKind::OutgoingCheque),
            2 => Some(WorkflowKind::IncomingCheque),
            3 => Some(WorkflowKind::OutgoingInvoice),
            4 => Some(WorkflowKind::IncomingInvoice),
            5 => Some(WorkflowKind::OutgoingTransfer),
            6 => Some(WorkflowKind::IncomingTransfer),
            7 => Some(WorkflowKind::InternalTransfer),
            8 => Some(WorkflowKind::OutgoingCash),
            9 => Some(WorkflowKind::IncomingCash),
            _ => None,
        }
    }

    /// Lowest schema version that admits this kind.
    pub fn min_version(self) -> u32 {
        match self {
            WorkflowKind::OutgoingCheque
            | WorkflowKind::IncomingCheque
            | WorkflowKind::OutgoingInvoice
            | WorkflowKind::IncomingInvoice => 1,
            WorkflowKind::OutgoingTransfer
            | WorkflowKind::IncomingTransfer
            | WorkflowKind::InternalTransfer => 2,
            WorkflowKind::OutgoingCash | WorkflowKind::IncomingCash => 3,
        }
    }

    pub fn is_outgoing(self) -> bool {
        matches!(
            self,
            WorkflowKind::OutgoingCheque
                | WorkflowKind::OutgoingInvoice
                | WorkflowKind::OutgoingTransfer
                | WorkflowKind::OutgoingCash
        )
    }

    pub fn is_incoming(self) -> bool {
        matches!(
            self,
            WorkflowKind::IncomingCheque
                | WorkflowKind::IncomingInvoice
                | WorkflowKind::IncomingTransfer
                | WorkflowKind::IncomingCash
        )
    }

    pub fn is_internal(self) -> bool {
        matches!(self, WorkflowKind::InternalTransfer)
    }

    /// True for cheques and invoices in either direction.
    pub fn is_cheque(self) -> bool {
        matches!(
            self,
            WorkflowKind::OutgoingCheque
                | WorkflowKind::IncomingCheque
                | WorkflowKind::OutgoingInvoice
                | WorkflowKind::IncomingInvoice
        )
    }

    pub fn is_transfer(self) -> bool {
        matches!(
            self,
            WorkflowKind::OutgoingTransfer
                | WorkflowKind::IncomingTransfer
                | WorkflowKind::InternalTransfer
        )
    }

    pub fn is_cash(self) -> bool {
        matches!(self, WorkflowKind::OutgoingCash | WorkflowKind::IncomingCash)
    }

    /// States a stored record of this kind may legally carry.
    pub fn allowed_states(self) -> &'static [WorkflowState] {
        match self {
            WorkflowKind::OutgoingCheque | WorkflowKind::OutgoingInvoice => &[
                WorkflowState::Unsent,
                WorkflowState::Conveyed,
                WorkflowState::Cancelled,
                WorkflowState::Accepted,
                WorkflowState::Completed,
                WorkflowState::Expired,
            ],
            WorkflowKind::IncomingCheque | WorkflowKind::IncomingInvoice => &[
                WorkflowState::Conveyed,
                WorkflowState::Completed,
                WorkflowState::Expired,
            ],
            WorkflowKind::OutgoingTransfer => &[
                WorkflowState::Initiated,
                WorkflowState::Acknowledged,
                WorkflowState::Accepted,
                WorkflowState::Completed,
                WorkflowState::Aborted,
            ],
            WorkflowKind::InternalTransfer => &[
                WorkflowState::Initiated,
                WorkflowState::Acknowledged,
                WorkflowState::Conveyed,
                WorkflowState::Accepted,
                WorkflowState::Completed,
                WorkflowState::Aborted,
            ],
            WorkflowKind::IncomingTransfer => {
                &[WorkflowState::Conveyed, WorkflowState::Completed]
            }
            WorkflowKind::OutgoingCash => &[
                WorkflowState::Unsent,
                WorkflowState::Conveyed,
                WorkflowState::Expired,
            ],
            WorkflowKind::IncomingCash => &[WorkflowState::Conveyed],
        }
    }

    /// State a freshly created record of this kind starts in.
    pub fn initial_state(self) -> WorkflowState {
        match self {
            WorkflowKind::OutgoingCheque
            | WorkflowKind::OutgoingInvoice
            | WorkflowKind::OutgoingCash => WorkflowState::Unsent,
            WorkflowKind::OutgoingTransfer | WorkflowKind::InternalTransfer => {
                WorkflowState::Initiated
            }
            WorkflowKind::IncomingCheque
            | WorkflowKind::IncomingInvoice
            | WorkflowKind::IncomingTransfer
            | WorkflowKind::IncomingCash => WorkflowState::Conveyed,
        }
    }

    /// Event kind that legally opens a record's history.
    pub fn initial_event(self) -> EventKind {
        if self.is_incoming() {
            EventKind::Convey
        } else {
            EventKind::Create
        }
    }
}

/// Lifecycle states.
///
/// `Error` and `Rejected` are representable for wire compatibility with
/// records produced elsewhere, but no payment kind admits them, so decoding
/// such a record fails validation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum WorkflowState {
    Error,
    Unsent,
    Conveyed,
    Cancelled,
    Accepted,
    Completed,
    Expired,
    Initiated,
    Aborted,
    Acknowledged,
    Rejected,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 11] = [
        WorkflowState::Error,
        WorkflowState::Unsent,
        WorkflowState::Conveyed,
        WorkflowState::Cancelled,
        WorkflowState::Accepted,
        WorkflowState::Completed,
        WorkflowState::Expired,
        WorkflowState::Initiated,
        WorkflowState::Aborted,
        WorkflowState::Acknowledged,
        WorkflowState::Rejected,
    ];

    pub fn wire(self) -> u32 {
        match self {
            WorkflowState::Error => 0,
            WorkflowState::Unsent => 1,
            WorkflowState::Conveyed => 2,
            WorkflowState::Cancelled => 3,
            WorkflowState::Accepted => 4,
            WorkflowState::Completed => 5,
            WorkflowState::Expired => 6,
            WorkflowState::Initiated => 7,
            WorkflowState::Aborted => 8,
            WorkflowState::Acknowledged => 9,
            WorkflowState::Rejected => 10,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(WorkflowState::Error),
            1 => Some(WorkflowState::Unsent),
            2 => Some(WorkflowState::Conveyed),
            3 => Some(WorkflowState::Cancelled),
            4 => Some(WorkflowState::Accepted),
            5 => Some(WorkflowState::Completed),
            6 => Some(WorkflowState::Expired),
            7 => Some(WorkflowState::Initiated),
            8 => Some(WorkflowState::Aborted),
            9 => Some(WorkflowState::Acknowledged),
            10 => Some(WorkflowState::Rejected),
            _ => None,
        }
    }

    /// Terminal states accept no further events, with one exception: an
    /// outgoing cheque that expired locally can still be accepted when the
    /// notary honored it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed
                | WorkflowState::Cancelled
                | WorkflowState::Aborted
                | WorkflowState::Expired
                | WorkflowState::Rejected
                | WorkflowState::Error
        )
    }
}

/// What happened to the workflow at one point in its history.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventKind {
    Error,
    Create,
    Convey,
    Cancel,
    Accept,
    Complete,
    Abort,
    Acknowledge,
    Expire,
    Reject,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Error,
        EventKind::Create,
        EventKind::Convey,
        EventKind::Cancel,
        EventKind::Accept,
        EventKind::Complete,
        EventKind::Abort,
        EventKind::Acknowledge,
        EventKind::Expire,
        EventKind::Reject,
    ];

    pub fn wire(self) -> u32 {
        match self {
            EventKind::Error => 0,
            EventKind::Create => 1,
            EventKind::Convey => 2,
            EventKind::Cancel => 3,
            EventKind::Accept => 4,
            EventKind::Complete => 5,
            EventKind::Abort => 6,
            EventKind::Acknowledge => 7,
            EventKind::Expire => 8,
            EventKind::Reject => 9,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(EventKind::Error),
            1 => Some(EventKind::Create),
            2 => Some(EventKind::Convey),
            3 => Some(EventKind::Cancel),
            4 => Some(EventKind::Accept),
            5 => Some(EventKind::Complete),
            6 => Some(EventKind::Abort),
            7 => Some(EventKind::Acknowledge),
            8 => Some(EventKind::Expire),
            9 => Some(EventKind::Reject),
            _ => None,
        }
    }
}

/// How an event reached, or left, this nym.
///
/// `Local` events never crossed a process boundary (creation, cancellation,
/// expiry observations). `OutOfBand` covers hand-carried instruments.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TransportKind {
    Local,
    OutOfBand,
    Notary,
}

/// One entry in a workflow's append-only history.
///
/// `success = false` marks a recorded attempt that did not take effect; the
/// state fold skips such events entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub version: u32,
    pub kind: EventKind,
    /// Unix timestamp, seconds. Non-decreasing across the history.
    pub time: i64,
    pub transport: TransportKind,
    /// Notary that relayed the event, for notary transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conveyor: Option<NotaryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<NymId>,
    pub success: bool,
    /// Raw transport message associated with the event, if any.
    #[serde(with = "serde_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub message: Vec<u8>,
}

/// Snapshot of the instrument a workflow was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSource {
    pub id: InstrumentId,
    pub revision: u32,
    /// Canonical instrument bytes as produced by `Instrument::to_bytes`.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// One payment instrument's lifecycle record for one nym.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWorkflow {
    pub id: WorkflowId,
    pub version: u32,
    pub kind: WorkflowKind,
    pub state: WorkflowState,
    /// Exactly one source instrument in current usage.
    pub source: Vec<InstrumentSource>,
    pub notary: NotaryId,
    /// Counterparty nyms known to participate.
    pub parties: Vec<NymId>,
    /// Local accounts the workflow touches.
    pub accounts: Vec<AccountId>,
    pub units: Vec<UnitId>,
    pub events: Vec<WorkflowEvent>,
}

impl PaymentWorkflow {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WorkflowError> {
        serde_json::to_vec(self).map_err(|e| WorkflowError::Serialization(e.to_string()))
    }

    /// Parse and fully validate a stored or peer-produced record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WorkflowError> {
        let workflow: PaymentWorkflow =
            serde_json::from_slice(bytes).map_err(|e| WorkflowError::Serialization(e.to_string()))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Decoded source instrument, when the payload parses.
    pub fn instrument(&self) -> Option<Instrument> {
        let source = self.source.first()?;
        Instrument::from_bytes(&source.payload).ok()
    }

    /// Enforce the full schema matrix for this record's version.
    ///
    /// The engine validates after every mutation it performs itself; a
    /// failure there is an invariant bug, so the persist path panics rather
    /// than letting memory and disk diverge.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.version < MIN_SCHEMA_VERSION || self.version > MAX_SCHEMA_VERSION {
            return Err(WorkflowError::InvalidRecord(format!(
                "schema version {} outside {}..={}",
                self.version, MIN_SCHEMA_VERSION, MAX_SCHEMA_VERSION
            )));
        }
        if self.version < self.kind.min_version() {
            return Err(WorkflowError::InvalidRecord(format!(
                "{:?} requires schema version {}, record carries {}",
                self.kind,
                self.kind.min_version(),
                self.version
            )));
        }
        if self.id.is_empty() {
            return Err(WorkflowError::InvalidRecord("empty workflow id".into()));
        }
        if self.source.len() != 1 {
            return Err(WorkflowError::InvalidRecord(format!(
                "expected exactly one source instrument, found {}",
                self.source.len()
            )));
        }
        let mut last_time = i64::MIN;
        for event in &self.events {
            if event.version < 1 || event.version > self.version {
                return Err(WorkflowError::InvalidRecord(format!(
                    "event version {} outside 1..={}",
                    event.version, self.version
                )));
            }
            if event.time < last_time {
                return Err(WorkflowError::InvalidRecord(
                    "event timestamps decrease".into(),
                ));
            }
            last_time = event.time;
        }
        if !self.kind.allowed_states().contains(&self.state) {
            return Err(WorkflowError::InvalidRecord(format!(
                "{:?} is not a legal state for {:?}",
                self.state, self.kind
            )));
        }
        let replayed = replay_state(self.kind, &self.events)?;
        if replayed != self.state {
            return Err(WorkflowError::InvalidRecord(format!(
                "stored state {:?} does not match replayed state {:?}",
                self.state, replayed
            )));
        }
        match self.kind {
            WorkflowKind::OutgoingCheque
            | WorkflowKind::OutgoingInvoice
            | WorkflowKind::OutgoingTransfer => {
                if self.accounts.is_empty() {
                    return Err(WorkflowError::InvalidRecord(format!(
                        "{:?} requires at least one account",
                        self.kind
                    )));
                }
            }
            WorkflowKind::InternalTransfer => {
                if self.accounts.len() != 2 {
                    return Err(WorkflowError::InvalidRecord(format!(
                        "internal transfer requires exactly two accounts, found {}",
                        self.accounts.len()
                    )));
                }
            }
            // Incoming and cash kinds are unconstrained; a purse is not
            // account-bound and incoming cheques gain the depositor account
            // only at deposit time.
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkit_lib::test_utils::cheque_fixture;

    fn event(kind: EventKind, time: i64) -> WorkflowEvent {
        WorkflowEvent {
            version: 3,
            kind,
            time,
            transport: TransportKind::Local,
            conveyor: None,
            counterparty: None,
            success: true,
            message: Vec::new(),
        }
    }

    fn cheque_workflow(events: Vec<WorkflowEvent>, state: WorkflowState) -> PaymentWorkflow {
        PaymentWorkflow {
            id: WorkflowId::new("wf-1"),
            version: 3,
            kind: WorkflowKind::OutgoingCheque,
            state,
            source: vec![InstrumentSource {
                id: InstrumentId::new("inst-1"),
                revision: 1,
                payload: b"payload".to_vec(),
            }],
            notary: NotaryId::new("notary-test"),
            parties: Vec::new(),
            accounts: vec![AccountId::new("acct-alice")],
            units: vec![UnitId::new("unit-test")],
            events,
        }
    }

    fn internal_transfer_workflow() -> PaymentWorkflow {
        PaymentWorkflow {
            kind: WorkflowKind::InternalTransfer,
            state: WorkflowState::Initiated,
            accounts: vec![AccountId::new("acct-a"), AccountId::new("acct-b")],
            ..cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent)
        }
    }

    #[test]
    fn test_wire_maps_round_trip() {
        for kind in WorkflowKind::ALL {
            assert_eq!(WorkflowKind::from_wire(kind.wire()), Some(kind));
        }
        for state in WorkflowState::ALL {
            assert_eq!(WorkflowState::from_wire(state.wire()), Some(state));
        }
        for event in EventKind::ALL {
            assert_eq!(EventKind::from_wire(event.wire()), Some(event));
        }
        assert_eq!(WorkflowKind::from_wire(0), None);
        assert_eq!(WorkflowKind::from_wire(10), None);
        assert_eq!(WorkflowState::from_wire(11), None);
        assert_eq!(EventKind::from_wire(10), None);
    }

    #[test]
    fn test_minimum_schema_versions() {
        assert_eq!(WorkflowKind::OutgoingCheque.min_version(), 1);
        assert_eq!(WorkflowKind::IncomingInvoice.min_version(), 1);
        assert_eq!(WorkflowKind::OutgoingTransfer.min_version(), 2);
        assert_eq!(WorkflowKind::InternalTransfer.min_version(), 2);
        assert_eq!(WorkflowKind::OutgoingCash.min_version(), 3);
        assert!(SCHEMA_VERSION >= WorkflowKind::IncomingCash.min_version());
    }

    #[test]
    fn test_terminal_states() {
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(WorkflowState::Aborted.is_terminal());
        assert!(WorkflowState::Expired.is_terminal());
        assert!(WorkflowState::Rejected.is_terminal());
        assert!(WorkflowState::Error.is_terminal());
        assert!(!WorkflowState::Unsent.is_terminal());
        assert!(!WorkflowState::Conveyed.is_terminal());
        assert!(!WorkflowState::Acknowledged.is_terminal());
    }

    #[test]
    fn test_initial_shape_per_kind() {
        assert_eq!(
            WorkflowKind::OutgoingCheque.initial_state(),
            WorkflowState::Unsent
        );
        assert_eq!(
            WorkflowKind::OutgoingTransfer.initial_state(),
            WorkflowState::Initiated
        );
        assert_eq!(
            WorkflowKind::IncomingCash.initial_state(),
            WorkflowState::Conveyed
        );
        assert_eq!(WorkflowKind::OutgoingCash.initial_event(), EventKind::Create);
        assert_eq!(WorkflowKind::IncomingCheque.initial_event(), EventKind::Convey);
    }

    #[test]
    fn test_validate_accepts_consistent_record() {
        let unsent = cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        assert!(unsent.validate().is_ok());

        let conveyed = cheque_workflow(
            vec![event(EventKind::Create, 100), event(EventKind::Convey, 110)],
            WorkflowState::Conveyed,
        );
        assert!(conveyed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_version_bounds() {
        let mut workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        workflow.version = 0;
        assert!(workflow.validate().is_err());
        workflow.version = 21;
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_kind_below_minimum_version() {
        let mut workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        workflow.kind = WorkflowKind::OutgoingCash;
        workflow.version = 2;
        for event in &mut workflow.events {
            event.version = 2;
        }
        assert!(matches!(
            workflow.validate(),
            Err(WorkflowError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_validate_rejects_source_count() {
        let mut none = cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        none.source.clear();
        assert!(none.validate().is_err());

        let mut two = cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        let extra = two.source[0].clone();
        two.source.push(extra);
        assert!(two.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_decreasing_timestamps() {
        let workflow = cheque_workflow(
            vec![event(EventKind::Create, 110), event(EventKind::Convey, 100)],
            WorkflowState::Conveyed,
        );
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_event_version_out_of_range() {
        let mut zero = cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        zero.events[0].version = 0;
        assert!(zero.validate().is_err());

        let mut high = cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        high.events[0].version = 4;
        assert!(high.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_state_replay_mismatch() {
        let workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Conveyed);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_disallowed_state() {
        // Rejected is representable but no payment kind admits it.
        let workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Rejected);
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn test_failed_events_do_not_advance_state() {
        let mut failed_convey = event(EventKind::Convey, 110);
        failed_convey.success = false;

        let still_unsent = cheque_workflow(
            vec![event(EventKind::Create, 100), failed_convey.clone()],
            WorkflowState::Unsent,
        );
        assert!(still_unsent.validate().is_ok());

        let claims_conveyed = cheque_workflow(
            vec![event(EventKind::Create, 100), failed_convey],
            WorkflowState::Conveyed,
        );
        assert!(claims_conveyed.validate().is_err());
    }

    #[test]
    fn test_validate_account_rules() {
        let mut no_accounts =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        no_accounts.accounts.clear();
        assert!(no_accounts.validate().is_err());

        let internal = internal_transfer_workflow();
        assert!(internal.validate().is_ok());

        let mut lopsided = internal_transfer_workflow();
        lopsided.accounts.pop();
        assert!(lopsided.validate().is_err());
    }

    #[test]
    fn test_record_bytes_round_trip() {
        let workflow = cheque_workflow(
            vec![event(EventKind::Create, 100), event(EventKind::Convey, 110)],
            WorkflowState::Conveyed,
        );
        let bytes = workflow.to_bytes().unwrap();
        let back = PaymentWorkflow::from_bytes(&bytes).unwrap();
        assert_eq!(back, workflow);
    }

    #[test]
    fn test_from_bytes_rejects_inconsistent_record() {
        let mut workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        workflow.state = WorkflowState::Completed;
        let bytes = serde_json::to_vec(&workflow).unwrap();
        assert!(PaymentWorkflow::from_bytes(&bytes).is_err());
        assert!(PaymentWorkflow::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_instrument_decodes_source_payload() {
        let cheque = cheque_fixture("alice", 500);
        let instrument = ledgerkit_lib::Instrument::Cheque(cheque);
        let mut workflow =
            cheque_workflow(vec![event(EventKind::Create, 100)], WorkflowState::Unsent);
        workflow.source[0].payload = instrument.to_bytes().unwrap();
        assert_eq!(workflow.instrument(), Some(instrument));

        workflow.source[0].payload = b"garbage".to_vec();
        assert!(workflow.instrument().is_none());
    }
}
