//! Outbound workflow notifications.
//!
//! Every successful state-affecting mutation publishes one `WorkflowPush` to
//! the owner's `workflows/{nym}` topic, JSON-encoded. The amount is signed
//! from the owner's point of view: money leaving is negative, money arriving
//! is positive. Invoices invert naturally because their face value is already
//! negative.

use serde::{Deserialize, Serialize};

use ledgerkit_lib::{AccountId, Amount, ContactId, Instrument, NymId, WorkflowId};

use crate::record::{EventKind, PaymentWorkflow, WorkflowEvent, WorkflowKind};

/// Notification payload for one workflow event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPush {
    /// Owner of the workflow.
    pub nym: NymId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<NymId>,
    /// Address-book contact for the counterparty, when a resolver is wired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    pub kind: WorkflowKind,
    pub event: EventKind,
    pub workflow: WorkflowId,
    /// Direction-signed instrument value.
    pub amount: Amount,
    /// The still-unsettled portion: equal to `amount` until the workflow
    /// reaches a terminal state, zero after.
    pub pending: Amount,
    pub time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,
}

impl WorkflowPush {
    /// Assemble the payload for `event`, already appended to `workflow`.
    pub fn build(
        nym: &NymId,
        workflow: &PaymentWorkflow,
        event: &WorkflowEvent,
        contact: Option<ContactId>,
    ) -> Self {
        let instrument = workflow.instrument();
        let face = instrument
            .as_ref()
            .map(Instrument::amount)
            .unwrap_or_else(Amount::zero);
        let amount = if workflow.kind.is_incoming() {
            face
        } else {
            face.checked_neg().unwrap_or(face)
        };
        let pending = if workflow.state.is_terminal() {
            Amount::zero()
        } else {
            amount
        };
        let memo = instrument
            .as_ref()
            .map(|instrument| instrument.memo().to_string())
            .unwrap_or_default();
        Self {
            nym: nym.clone(),
            counterparty: event
                .counterparty
                .clone()
                .or_else(|| workflow.parties.first().cloned()),
            contact,
            account: workflow.accounts.first().cloned(),
            kind: workflow.kind,
            event: event.kind,
            workflow: workflow.id.clone(),
            amount,
            pending,
            time: event.time,
            memo,
        }
    }
}
