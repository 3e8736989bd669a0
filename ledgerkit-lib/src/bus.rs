//! Notification fan-out.
//!
//! Engines announce state changes on a bus; the host wires a real transport
//! (or nothing) behind the trait. Delivery is fire-and-forget, at most once.
//! A publish failure must never affect the mutation that triggered it, so
//! the trait is infallible by construction.

use crate::NymId;

/// Topic for account balance-affecting changes. The payload is the account id.
pub const ACCOUNT_EVENT_TOPIC: &str = "accounts/updated";

/// Topic for seed creation and index changes. The payload is the seed id.
pub const SEED_EVENT_TOPIC: &str = "seeds/updated";

/// Per-nym workflow push topic.
pub fn workflow_topic(nym: &NymId) -> String {
    format!("workflows/{}", nym.as_str())
}

/// Outbound notification seam.
pub trait NotificationBus: Send + Sync {
    /// Publish a payload on a topic. Best effort; implementations swallow
    /// their own delivery failures.
    fn publish(&self, topic: &str, payload: &[u8]);
}

/// Bus that drops every message, for hosts without a subscriber side.
#[derive(Default)]
pub struct NullBus;

impl NullBus {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationBus for NullBus {
    fn publish(&self, topic: &str, payload: &[u8]) {
        tracing::debug!(topic, len = payload.len(), "dropping notification");
    }
}
