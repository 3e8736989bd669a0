//! Workflow operations.
//!
//! `WorkflowManager` owns the full mutation cycle for payment workflows:
//! take the per-workflow lock, load, consult the transition table, append the
//! event, validate, write through the index, announce. A failed legality
//! check aborts before anything is touched, so an illegal call leaves the
//! stored record byte-identical.
//!
//! Creation entry points are idempotent on the `(nym, instrument id)` pair:
//! the instrument id is content-derived, so writing the same cheque twice
//! finds the existing workflow instead of creating a sibling.
//!
//! # Thread Safety
//!
//! All operations are synchronous and safe to call from many threads;
//! distinct workflows mutate concurrently, same-id mutations serialize.

use std::sync::Arc;

use chrono::Utc;

use ledgerkit_lib::{
    workflow_topic, AccountId, AccountResolver, Cheque, ContactResolver, Instrument,
    InstrumentId, NotificationBus, NymId, Purse, RecordStore, Transfer, UnitId, WorkflowId,
    ACCOUNT_EVENT_TOPIC,
};

use crate::index::WorkflowStorage;
use crate::locks::LockRegistry;
use crate::push::WorkflowPush;
use crate::record::{
    EventKind, InstrumentSource, PaymentWorkflow, TransportKind, WorkflowEvent, WorkflowKind,
    WorkflowState, SCHEMA_VERSION,
};
use crate::transition::advance;
use crate::WorkflowError;

const OUTGOING_CHEQUE_KINDS: &[WorkflowKind] = &[
    WorkflowKind::OutgoingCheque,
    WorkflowKind::OutgoingInvoice,
];

const INCOMING_CHEQUE_KINDS: &[WorkflowKind] = &[
    WorkflowKind::IncomingCheque,
    WorkflowKind::IncomingInvoice,
];

const CHEQUE_KINDS: &[WorkflowKind] = &[
    WorkflowKind::OutgoingCheque,
    WorkflowKind::OutgoingInvoice,
    WorkflowKind::IncomingCheque,
    WorkflowKind::IncomingInvoice,
];

const LOCAL_TRANSFER_KINDS: &[WorkflowKind] = &[
    WorkflowKind::OutgoingTransfer,
    WorkflowKind::InternalTransfer,
];

/// Payment workflow engine for every nym sharing one record store.
pub struct WorkflowManager {
    storage: WorkflowStorage,
    locks: LockRegistry,
    bus: Arc<dyn NotificationBus>,
    contacts: Option<Arc<dyn ContactResolver>>,
    accounts: Option<Arc<dyn AccountResolver>>,
}

impl WorkflowManager {
    pub fn new(store: Arc<dyn RecordStore>, bus: Arc<dyn NotificationBus>) -> Self {
        Self {
            storage: WorkflowStorage::new(store),
            locks: LockRegistry::new(),
            bus,
            contacts: None,
            accounts: None,
        }
    }

    /// Attach a contact resolver for push notification decoration.
    pub fn with_contact_resolver(mut self, contacts: Arc<dyn ContactResolver>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Attach an account resolver so transfers to an own account classify as
    /// internal.
    pub fn with_account_resolver(mut self, accounts: Arc<dyn AccountResolver>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    // ---- cheques ----------------------------------------------------------

    /// Record a cheque drawn by `nym`. A negative amount makes it an invoice.
    pub fn write_cheque(&self, nym: &NymId, cheque: &Cheque) -> Result<WorkflowId, WorkflowError> {
        let kind = if cheque.is_invoice() {
            WorkflowKind::OutgoingInvoice
        } else {
            WorkflowKind::OutgoingCheque
        };
        self.create_workflow(
            nym,
            &Instrument::Cheque(cheque.clone()),
            kind,
            OUTGOING_CHEQUE_KINDS,
            TransportKind::Local,
            cheque.recipient.as_ref(),
            vec![cheque.source_account.clone()],
        )
    }

    /// Convey a written cheque through the notary.
    ///
    /// `reply` is the notary's response when the send round-trip succeeded.
    /// Without one the attempt is recorded as a failed event and the state
    /// stays put.
    pub fn send_cheque(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        request: &[u8],
        reply: Option<&[u8]>,
    ) -> Result<(), WorkflowError> {
        self.locks.exclusive(id.as_str(), || {
            let (mut workflow, next) =
                self.load_for_event(nym, id, OUTGOING_CHEQUE_KINDS, EventKind::Convey)?;
            let delivered = reply.is_some();
            self.apply_event(
                &mut workflow,
                EventKind::Convey,
                TransportKind::Notary,
                None,
                delivered,
                request.to_vec(),
            );
            if delivered {
                workflow.state = next;
                self.persist_and_announce(nym, &workflow)
            } else {
                tracing::debug!(workflow = %id, "cheque send failed, attempt recorded");
                self.persist(nym, &workflow)
            }
        })
    }

    /// Convey a written cheque by hand instead of through the notary.
    pub fn export_cheque(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            OUTGOING_CHEQUE_KINDS,
            EventKind::Convey,
            TransportKind::OutOfBand,
            None,
        )
    }

    pub fn cancel_cheque(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            OUTGOING_CHEQUE_KINDS,
            EventKind::Cancel,
            TransportKind::Notary,
            None,
        )
    }

    /// Record that `recipient` deposited the cheque and the notary accepted
    /// it.
    pub fn clear_cheque(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        recipient: &NymId,
    ) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            OUTGOING_CHEQUE_KINDS,
            EventKind::Accept,
            TransportKind::Notary,
            Some(recipient.clone()),
        )
    }

    /// Close out a cleared cheque.
    pub fn finish_cheque(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            OUTGOING_CHEQUE_KINDS,
            EventKind::Complete,
            TransportKind::Notary,
            None,
        )
    }

    /// Expire a cheque whose validity window has elapsed.
    pub fn expire_cheque(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.locks.exclusive(id.as_str(), || {
            let (mut workflow, next) =
                self.load_for_event(nym, id, CHEQUE_KINDS, EventKind::Expire)?;
            let Some(source) = workflow.source.first() else {
                return Err(WorkflowError::InstrumentNotFound);
            };
            let instrument = Instrument::from_bytes(&source.payload)
                .map_err(|e| WorkflowError::InvalidInstrument(e.to_string()))?;
            let Instrument::Cheque(cheque) = instrument else {
                return Err(WorkflowError::InvalidInstrument(
                    "workflow source is not a cheque".into(),
                ));
            };
            if !cheque.is_expired(Utc::now()) {
                tracing::warn!(workflow = %id, valid_to = %cheque.valid_to, "cheque validity window has not elapsed");
                return Err(WorkflowError::IllegalTransition {
                    kind: workflow.kind,
                    state: workflow.state,
                    event: EventKind::Expire,
                });
            }
            self.apply_event(
                &mut workflow,
                EventKind::Expire,
                TransportKind::Local,
                None,
                true,
                Vec::new(),
            );
            workflow.state = next;
            self.persist_and_announce(nym, &workflow)
        })
    }

    /// Record a cheque conveyed to `nym` through the notary.
    pub fn receive_cheque(
        &self,
        nym: &NymId,
        sender: &NymId,
        cheque: &Cheque,
    ) -> Result<WorkflowId, WorkflowError> {
        self.create_incoming_cheque(nym, sender, cheque, TransportKind::Notary)
    }

    /// Record a cheque handed to `nym` out of band.
    pub fn import_cheque(
        &self,
        nym: &NymId,
        sender: &NymId,
        cheque: &Cheque,
    ) -> Result<WorkflowId, WorkflowError> {
        self.create_incoming_cheque(nym, sender, cheque, TransportKind::OutOfBand)
    }

    /// Deposit a received cheque into `account`.
    pub fn deposit_cheque(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        account: &AccountId,
    ) -> Result<(), WorkflowError> {
        self.locks.exclusive(id.as_str(), || {
            let (mut workflow, next) =
                self.load_for_event(nym, id, INCOMING_CHEQUE_KINDS, EventKind::Accept)?;
            if !workflow.accounts.contains(account) {
                workflow.accounts.push(account.clone());
            }
            self.apply_event(
                &mut workflow,
                EventKind::Accept,
                TransportKind::Notary,
                None,
                true,
                Vec::new(),
            );
            workflow.state = next;
            self.persist_and_announce(nym, &workflow)
        })
    }

    // ---- transfers --------------------------------------------------------

    /// Initiate a transfer out of one of `nym`'s accounts.
    ///
    /// When the account resolver reports the destination as owned by the same
    /// nym the workflow is internal, otherwise outgoing.
    pub fn create_transfer(
        &self,
        nym: &NymId,
        transfer: &Transfer,
    ) -> Result<WorkflowId, WorkflowError> {
        let internal = self
            .accounts
            .as_ref()
            .and_then(|resolver| resolver.owner(&transfer.destination_account))
            .map_or(false, |owner| owner == *nym);
        let (kind, accounts) = if internal {
            (
                WorkflowKind::InternalTransfer,
                vec![
                    transfer.source_account.clone(),
                    transfer.destination_account.clone(),
                ],
            )
        } else {
            (
                WorkflowKind::OutgoingTransfer,
                vec![transfer.source_account.clone()],
            )
        };
        self.create_workflow(
            nym,
            &Instrument::Transfer(transfer.clone()),
            kind,
            LOCAL_TRANSFER_KINDS,
            TransportKind::Local,
            None,
            accounts,
        )
    }

    /// Record the notary's acknowledgement of an initiated transfer.
    ///
    /// Legal even after the convey notification already arrived; the event
    /// is appended and the state simply stays Conveyed.
    pub fn acknowledge_transfer(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            LOCAL_TRANSFER_KINDS,
            EventKind::Acknowledge,
            TransportKind::Notary,
            None,
        )
    }

    /// Record a transfer conveyed to `nym` as its recipient. Idempotent: a
    /// repeated notification returns the existing workflow untouched.
    pub fn convey_transfer(
        &self,
        nym: &NymId,
        sender: &NymId,
        transfer: &Transfer,
    ) -> Result<WorkflowId, WorkflowError> {
        self.create_workflow(
            nym,
            &Instrument::Transfer(transfer.clone()),
            WorkflowKind::IncomingTransfer,
            &[WorkflowKind::IncomingTransfer],
            TransportKind::Notary,
            Some(sender),
            vec![transfer.destination_account.clone()],
        )
    }

    /// Record the notary's convey notification for an internal transfer.
    pub fn convey_internal_transfer(
        &self,
        nym: &NymId,
        id: &WorkflowId,
    ) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            &[WorkflowKind::InternalTransfer],
            EventKind::Convey,
            TransportKind::Notary,
            None,
        )
    }

    /// Record that the recipient side accepted the transfer.
    pub fn clear_transfer(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            LOCAL_TRANSFER_KINDS,
            EventKind::Accept,
            TransportKind::Notary,
            None,
        )
    }

    pub fn complete_transfer(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            LOCAL_TRANSFER_KINDS,
            EventKind::Complete,
            TransportKind::Notary,
            None,
        )
    }

    /// Abandon a transfer the notary never acknowledged.
    pub fn abort_transfer(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            LOCAL_TRANSFER_KINDS,
            EventKind::Abort,
            TransportKind::Local,
            None,
        )
    }

    /// Accept an incoming transfer, completing it.
    pub fn accept_transfer(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            &[WorkflowKind::IncomingTransfer],
            EventKind::Accept,
            TransportKind::Notary,
            None,
        )
    }

    // ---- cash -------------------------------------------------------------

    /// Record a purse withdrawn from the mint, ready to send.
    pub fn allocate_cash(&self, nym: &NymId, purse: &Purse) -> Result<WorkflowId, WorkflowError> {
        self.create_workflow(
            nym,
            &Instrument::Purse(purse.clone()),
            WorkflowKind::OutgoingCash,
            &[WorkflowKind::OutgoingCash],
            TransportKind::Local,
            None,
            Vec::new(),
        )
    }

    /// Convey an allocated purse to `recipient`. Resending a conveyed purse
    /// is legal; only an expired one refuses.
    pub fn send_cash(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        recipient: &NymId,
        request: &[u8],
        reply: Option<&[u8]>,
    ) -> Result<(), WorkflowError> {
        self.locks.exclusive(id.as_str(), || {
            let (mut workflow, next) =
                self.load_for_event(nym, id, &[WorkflowKind::OutgoingCash], EventKind::Convey)?;
            let delivered = reply.is_some();
            if delivered && !workflow.parties.contains(recipient) {
                workflow.parties.push(recipient.clone());
            }
            self.apply_event(
                &mut workflow,
                EventKind::Convey,
                TransportKind::Notary,
                Some(recipient.clone()),
                delivered,
                request.to_vec(),
            );
            if delivered {
                workflow.state = next;
                self.persist_and_announce(nym, &workflow)
            } else {
                tracing::debug!(workflow = %id, "cash send failed, attempt recorded");
                self.persist(nym, &workflow)
            }
        })
    }

    /// Record a purse conveyed to `nym`.
    pub fn receive_cash(
        &self,
        nym: &NymId,
        sender: &NymId,
        purse: &Purse,
    ) -> Result<WorkflowId, WorkflowError> {
        self.create_workflow(
            nym,
            &Instrument::Purse(purse.clone()),
            WorkflowKind::IncomingCash,
            &[WorkflowKind::IncomingCash],
            TransportKind::Notary,
            Some(sender),
            Vec::new(),
        )
    }

    /// Mark an allocated purse as lapsed.
    ///
    /// Purses carry no validity window of their own; the host signals when
    /// the token series behind the purse expired.
    pub fn expire_cash(&self, nym: &NymId, id: &WorkflowId) -> Result<(), WorkflowError> {
        self.transition(
            nym,
            id,
            &[WorkflowKind::OutgoingCash],
            EventKind::Expire,
            TransportKind::Local,
            None,
        )
    }

    // ---- queries ----------------------------------------------------------

    pub fn get_workflow(&self, nym: &NymId, id: &WorkflowId) -> Option<PaymentWorkflow> {
        match self.storage.load(nym, id) {
            Ok(workflow) => workflow,
            Err(e) => {
                tracing::warn!(nym = %nym, workflow = %id, error = %e, "failed to load workflow");
                None
            }
        }
    }

    pub fn workflow_by_instrument(
        &self,
        nym: &NymId,
        instrument: &InstrumentId,
    ) -> Option<WorkflowId> {
        match self.storage.lookup_by_source(nym, instrument, &WorkflowKind::ALL) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(nym = %nym, error = %e, "failed to look up workflow by instrument");
                None
            }
        }
    }

    pub fn list(&self, nym: &NymId) -> Vec<WorkflowId> {
        self.storage.list(nym)
    }

    pub fn by_account(&self, nym: &NymId, account: &AccountId) -> Vec<WorkflowId> {
        self.storage.by_account(nym, account)
    }

    pub fn by_unit(&self, nym: &NymId, unit: &UnitId) -> Vec<WorkflowId> {
        self.storage.by_unit(nym, unit)
    }

    pub fn by_state(
        &self,
        nym: &NymId,
        kind: WorkflowKind,
        state: WorkflowState,
    ) -> Vec<WorkflowId> {
        self.storage.by_state(nym, kind, state)
    }

    pub fn by_kind(&self, nym: &NymId, kind: WorkflowKind) -> Vec<WorkflowId> {
        self.storage.by_kind(nym, kind)
    }

    /// Remove a workflow and all of its index entries.
    pub fn delete_workflow(&self, nym: &NymId, id: &WorkflowId) -> bool {
        self.locks.exclusive(id.as_str(), || self.storage.delete(nym, id))
    }

    // ---- internals --------------------------------------------------------

    fn create_incoming_cheque(
        &self,
        nym: &NymId,
        sender: &NymId,
        cheque: &Cheque,
        transport: TransportKind,
    ) -> Result<WorkflowId, WorkflowError> {
        let kind = if cheque.is_invoice() {
            WorkflowKind::IncomingInvoice
        } else {
            WorkflowKind::IncomingCheque
        };
        self.create_workflow(
            nym,
            &Instrument::Cheque(cheque.clone()),
            kind,
            INCOMING_CHEQUE_KINDS,
            transport,
            Some(sender),
            Vec::new(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn create_workflow(
        &self,
        nym: &NymId,
        instrument: &Instrument,
        kind: WorkflowKind,
        lookup: &[WorkflowKind],
        transport: TransportKind,
        counterparty: Option<&NymId>,
        accounts: Vec<AccountId>,
    ) -> Result<WorkflowId, WorkflowError> {
        instrument
            .validate()
            .map_err(|e| WorkflowError::InvalidInstrument(e.to_string()))?;
        let instrument_id = instrument
            .id()
            .map_err(|e| WorkflowError::InvalidInstrument(e.to_string()))?;
        let payload = instrument
            .to_bytes()
            .map_err(|e| WorkflowError::Serialization(e.to_string()))?;
        let creation_key = format!("create/{}/{}", nym.as_str(), instrument_id.as_str());
        self.locks.exclusive(&creation_key, || {
            if let Some(existing) = self.storage.lookup_by_source(nym, &instrument_id, lookup)? {
                tracing::debug!(nym = %nym, workflow = %existing, "instrument already has a workflow");
                return Ok(existing);
            }
            let mut workflow = PaymentWorkflow {
                id: WorkflowId::random(),
                version: SCHEMA_VERSION,
                kind,
                state: kind.initial_state(),
                source: vec![InstrumentSource {
                    id: instrument_id.clone(),
                    revision: 1,
                    payload,
                }],
                notary: instrument.notary().clone(),
                parties: counterparty.cloned().into_iter().collect(),
                accounts,
                units: vec![instrument.unit().clone()],
                events: Vec::new(),
            };
            self.apply_event(
                &mut workflow,
                kind.initial_event(),
                transport,
                counterparty.cloned(),
                true,
                Vec::new(),
            );
            self.persist_and_announce(nym, &workflow)?;
            tracing::debug!(nym = %nym, workflow = %workflow.id, kind = ?kind, "created workflow");
            Ok(workflow.id.clone())
        })
    }

    /// Lock-free part of a simple state transition: load, check kind, check
    /// the table. Any failure leaves storage untouched.
    fn load_for_event(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        expected: &[WorkflowKind],
        event: EventKind,
    ) -> Result<(PaymentWorkflow, WorkflowState), WorkflowError> {
        let Some(workflow) = self.storage.load(nym, id)? else {
            return Err(WorkflowError::NotFound);
        };
        if !expected.contains(&workflow.kind) {
            tracing::warn!(workflow = %id, kind = ?workflow.kind, event = ?event, "operation does not apply to this workflow kind");
            return Err(WorkflowError::IllegalTransition {
                kind: workflow.kind,
                state: workflow.state,
                event,
            });
        }
        match advance(workflow.kind, workflow.state, event) {
            Some(next) => Ok((workflow, next)),
            None => {
                tracing::warn!(workflow = %id, kind = ?workflow.kind, state = ?workflow.state, event = ?event, "illegal transition rejected");
                Err(WorkflowError::IllegalTransition {
                    kind: workflow.kind,
                    state: workflow.state,
                    event,
                })
            }
        }
    }

    fn transition(
        &self,
        nym: &NymId,
        id: &WorkflowId,
        expected: &[WorkflowKind],
        event: EventKind,
        transport: TransportKind,
        counterparty: Option<NymId>,
    ) -> Result<(), WorkflowError> {
        self.locks.exclusive(id.as_str(), || {
            let (mut workflow, next) = self.load_for_event(nym, id, expected, event)?;
            if let Some(party) = counterparty.clone() {
                if !workflow.parties.contains(&party) {
                    workflow.parties.push(party);
                }
            }
            self.apply_event(&mut workflow, event, transport, counterparty, true, Vec::new());
            workflow.state = next;
            self.persist_and_announce(nym, &workflow)
        })
    }

    fn apply_event(
        &self,
        workflow: &mut PaymentWorkflow,
        kind: EventKind,
        transport: TransportKind,
        counterparty: Option<NymId>,
        success: bool,
        message: Vec<u8>,
    ) {
        let now = Utc::now().timestamp();
        // Wall clocks can step backwards; recorded history may not.
        let time = workflow
            .events
            .last()
            .map_or(now, |event| event.time.max(now));
        let conveyor = match transport {
            TransportKind::Notary => Some(workflow.notary.clone()),
            TransportKind::Local | TransportKind::OutOfBand => None,
        };
        workflow.events.push(WorkflowEvent {
            version: workflow.version,
            kind,
            time,
            transport,
            conveyor,
            counterparty,
            success,
            message,
        });
    }

    fn persist(&self, nym: &NymId, workflow: &PaymentWorkflow) -> Result<(), WorkflowError> {
        if let Err(e) = workflow.validate() {
            // Memory and disk must never diverge; a record the engine itself
            // built failing its schema is an invariant bug, not a runtime
            // error.
            panic!("workflow {} failed validation after mutation: {e}", workflow.id);
        }
        self.storage.store(nym, workflow)
    }

    fn persist_and_announce(
        &self,
        nym: &NymId,
        workflow: &PaymentWorkflow,
    ) -> Result<(), WorkflowError> {
        self.persist(nym, workflow)?;
        self.announce(nym, workflow);
        Ok(())
    }

    /// Best-effort fan-out after a successful mutation. Never affects the
    /// mutation result.
    fn announce(&self, nym: &NymId, workflow: &PaymentWorkflow) {
        for account in &workflow.accounts {
            self.bus
                .publish(ACCOUNT_EVENT_TOPIC, account.as_str().as_bytes());
        }
        let Some(event) = workflow.events.last() else {
            return;
        };
        let party = event
            .counterparty
            .as_ref()
            .or_else(|| workflow.parties.first());
        let contact = match (&self.contacts, party) {
            (Some(contacts), Some(party)) => contacts.contact_for_nym(party),
            _ => None,
        };
        let push = WorkflowPush::build(nym, workflow, event, contact);
        match serde_json::to_vec(&push) {
            Ok(payload) => self.bus.publish(&workflow_topic(nym), &payload),
            Err(e) => {
                tracing::warn!(workflow = %workflow.id, error = %e, "failed to encode workflow push");
            }
        }
    }
}
