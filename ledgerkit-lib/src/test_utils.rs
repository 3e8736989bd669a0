//! Shared fixtures for unit and integration tests.
//!
//! Enabled with the `test-utils` feature (always on for this crate's own
//! tests). Nothing here is meant for production wiring.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{Duration, Utc};

use crate::{
    AccountId, AccountResolver, Amount, Cheque, ContactId, ContactResolver, NotaryId,
    NotificationBus, NymId, Purse, Transfer, UnitId,
};

/// Bus that records every published message for assertions.
#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in order.
    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages for one topic.
    pub fn topic_messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl NotificationBus for MemoryBus {
    fn publish(&self, topic: &str, payload: &[u8]) {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.push((topic.to_string(), payload.to_vec()));
    }
}

/// Contact resolver backed by a map.
#[derive(Default)]
pub struct MemoryContactResolver {
    contacts: RwLock<HashMap<NymId, ContactId>>,
}

impl MemoryContactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, nym: NymId, contact: ContactId) {
        let mut contacts = self.contacts.write().unwrap_or_else(|e| e.into_inner());
        contacts.insert(nym, contact);
    }
}

impl ContactResolver for MemoryContactResolver {
    fn contact_for_nym(&self, nym: &NymId) -> Option<ContactId> {
        let contacts = self.contacts.read().unwrap_or_else(|e| e.into_inner());
        contacts.get(nym).cloned()
    }
}

/// Account resolver backed by a map of `(owner, notary, unit)` rows.
#[derive(Default)]
pub struct MemoryAccountResolver {
    accounts: RwLock<HashMap<AccountId, (NymId, NotaryId, UnitId)>>,
}

impl MemoryAccountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: AccountId, owner: NymId, notary: NotaryId, unit: UnitId) {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(account, (owner, notary, unit));
    }
}

impl AccountResolver for MemoryAccountResolver {
    fn owner(&self, account: &AccountId) -> Option<NymId> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account).map(|(owner, _, _)| owner.clone())
    }

    fn notary(&self, account: &AccountId) -> Option<NotaryId> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account).map(|(_, notary, _)| notary.clone())
    }

    fn unit(&self, account: &AccountId) -> Option<UnitId> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account).map(|(_, _, unit)| unit.clone())
    }
}

/// A week-long cheque from `sender` for `amount` units.
pub fn cheque_fixture(sender: &str, amount: i64) -> Cheque {
    let now = Utc::now();
    Cheque {
        notary: NotaryId::new("notary-test"),
        unit: UnitId::new("unit-test"),
        source_account: AccountId::new(format!("acct-{sender}")),
        sender: NymId::new(sender),
        recipient: None,
        amount: Amount::from_units(amount),
        memo: String::new(),
        valid_from: now - Duration::hours(1),
        valid_to: now + Duration::days(7),
    }
}

/// A cheque whose validity window already elapsed.
pub fn expired_cheque_fixture(sender: &str, amount: i64) -> Cheque {
    let now = Utc::now();
    Cheque {
        valid_from: now - Duration::days(14),
        valid_to: now - Duration::days(7),
        ..cheque_fixture(sender, amount)
    }
}

pub fn transfer_fixture(source: &str, destination: &str, amount: i64) -> Transfer {
    Transfer {
        notary: NotaryId::new("notary-test"),
        unit: UnitId::new("unit-test"),
        source_account: AccountId::new(source),
        destination_account: AccountId::new(destination),
        amount: Amount::from_units(amount),
        memo: String::new(),
    }
}

pub fn purse_fixture(value: i64, token_count: u32) -> Purse {
    Purse {
        notary: NotaryId::new("notary-test"),
        unit: UnitId::new("unit-test"),
        value: Amount::from_units(value),
        token_count,
    }
}
