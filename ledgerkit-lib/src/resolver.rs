//! Optional collaborator lookups.
//!
//! The workflow engine can decorate its records and notifications with
//! contact and account ownership data when the host provides resolvers.
//! Both are strictly best-effort: a `None` answer (or an absent resolver)
//! narrows behavior but never fails an operation.

use crate::{AccountId, ContactId, NotaryId, NymId, UnitId};

/// Maps nyms to address-book contacts for notification payloads.
pub trait ContactResolver: Send + Sync {
    fn contact_for_nym(&self, nym: &NymId) -> Option<ContactId>;
}

/// Answers ownership and shape questions about asset accounts.
///
/// Used to classify a transfer whose destination account belongs to the
/// initiating nym as internal rather than outgoing.
pub trait AccountResolver: Send + Sync {
    fn owner(&self, account: &AccountId) -> Option<NymId>;
    fn notary(&self, account: &AccountId) -> Option<NotaryId>;
    fn unit(&self, account: &AccountId) -> Option<UnitId>;
}
