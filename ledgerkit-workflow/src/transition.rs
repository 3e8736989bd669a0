//! Lifecycle legality rules.
//!
//! `advance` is the whole state machine: one pure function from
//! `(kind, state, event)` to the next state, `None` when the combination is
//! illegal. Every mutating operation in the manager consults it before
//! touching a record, and `replay_state` folds a stored event history through
//! it so persistence can prove a record's state field is honest.

use crate::record::{EventKind, WorkflowEvent, WorkflowKind, WorkflowState};
use crate::WorkflowError;

/// Next state after applying `event`, or `None` when illegal.
pub fn advance(
    kind: WorkflowKind,
    state: WorkflowState,
    event: EventKind,
) -> Option<WorkflowState> {
    use EventKind as E;
    use WorkflowKind as K;
    use WorkflowState as S;

    match (kind, event, state) {
        // Outgoing cheques and invoices.
        (K::OutgoingCheque | K::OutgoingInvoice, E::Convey, S::Unsent) => Some(S::Conveyed),
        (K::OutgoingCheque | K::OutgoingInvoice, E::Cancel, S::Unsent | S::Conveyed) => {
            Some(S::Cancelled)
        }
        // A cheque that expired locally can still clear when the notary
        // honored the deposit.
        (K::OutgoingCheque | K::OutgoingInvoice, E::Accept, S::Conveyed | S::Expired) => {
            Some(S::Accepted)
        }
        (K::OutgoingCheque | K::OutgoingInvoice, E::Complete, S::Accepted) => Some(S::Completed),
        (K::OutgoingCheque | K::OutgoingInvoice, E::Expire, S::Unsent | S::Conveyed) => {
            Some(S::Expired)
        }

        // Incoming cheques and invoices.
        (K::IncomingCheque | K::IncomingInvoice, E::Accept, S::Conveyed) => Some(S::Completed),
        (K::IncomingCheque | K::IncomingInvoice, E::Expire, S::Conveyed) => Some(S::Expired),

        // Transfers out of this nym's accounts. The notary notification can
        // overtake the local acknowledgement; the acknowledge event is still
        // recorded but the state never regresses from Conveyed.
        (K::OutgoingTransfer | K::InternalTransfer, E::Acknowledge, S::Initiated) => {
            Some(S::Acknowledged)
        }
        (K::OutgoingTransfer | K::InternalTransfer, E::Acknowledge, S::Conveyed) => {
            Some(S::Conveyed)
        }
        (K::OutgoingTransfer | K::InternalTransfer, E::Abort, S::Initiated) => Some(S::Aborted),
        (K::OutgoingTransfer, E::Accept, S::Acknowledged) => Some(S::Accepted),
        (K::InternalTransfer, E::Convey, S::Initiated | S::Acknowledged | S::Conveyed) => {
            Some(S::Conveyed)
        }
        (K::InternalTransfer, E::Accept, S::Conveyed) => Some(S::Accepted),
        (K::OutgoingTransfer | K::InternalTransfer, E::Complete, S::Accepted) => {
            Some(S::Completed)
        }

        // Transfers into this nym's accounts. Convey is re-entrant so a
        // replayed notification stays legal.
        (K::IncomingTransfer, E::Convey, S::Conveyed) => Some(S::Conveyed),
        (K::IncomingTransfer, E::Accept, S::Conveyed) => Some(S::Completed),

        // Cash purses. Sending again after a convey is legal; only expiry
        // closes the workflow.
        (K::OutgoingCash, E::Convey, S::Unsent | S::Conveyed) => Some(S::Conveyed),
        (K::OutgoingCash, E::Expire, S::Unsent | S::Conveyed) => Some(S::Expired),

        _ => None,
    }
}

pub fn can_convey(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Convey).is_some()
}

pub fn can_cancel(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Cancel).is_some()
}

pub fn can_accept(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Accept).is_some()
}

pub fn can_complete(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Complete).is_some()
}

pub fn can_abort(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Abort).is_some()
}

pub fn can_acknowledge(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Acknowledge).is_some()
}

pub fn can_expire(kind: WorkflowKind, state: WorkflowState) -> bool {
    advance(kind, state, EventKind::Expire).is_some()
}

/// Fold an event history to the state it proves.
///
/// The first successful event must open the history for the kind; events
/// recorded with `success = false` are attempts and are skipped entirely.
pub fn replay_state(
    kind: WorkflowKind,
    events: &[WorkflowEvent],
) -> Result<WorkflowState, WorkflowError> {
    let mut successful = events.iter().filter(|event| event.success);
    let Some(first) = successful.next() else {
        return Err(WorkflowError::InvalidRecord(
            "event history has no successful event".into(),
        ));
    };
    if first.kind != kind.initial_event() {
        return Err(WorkflowError::InvalidRecord(format!(
            "history for {kind:?} opens with {:?}",
            first.kind
        )));
    }
    let mut state = kind.initial_state();
    for event in successful {
        match advance(kind, state, event.kind) {
            Some(next) => state = next,
            None => {
                return Err(WorkflowError::InvalidRecord(format!(
                    "replay hit illegal {:?} for {kind:?} in state {state:?}",
                    event.kind
                )));
            }
        }
    }
    Ok(state)
}
