//! Typed identifiers.
//!
//! Every id the engines pass around is a thin newtype over `String`. The
//! wrappers cost nothing at runtime and keep a nym id from being handed to a
//! function that wanted an account id. Ids are ordered and hashable so they
//! can key both `HashMap` caches and the deterministic `BTreeMap` indices.

use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// True for the empty id, which no valid record may carry.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

identifier! {
    /// Identifier of a nym (a signing identity that owns workflows and seeds).
    NymId
}

identifier! {
    /// Identifier of the notary a payment instrument is drawn against.
    NotaryId
}

identifier! {
    /// Identifier of a unit of account (currency contract).
    UnitId
}

identifier! {
    /// Identifier of an asset account held at a notary.
    AccountId
}

identifier! {
    /// Identifier of a payment workflow record.
    WorkflowId
}

identifier! {
    /// Identifier of an HD seed. Derived from the seed entropy, so importing
    /// the same entropy twice yields the same id.
    SeedId
}

identifier! {
    /// Content-derived identifier of a payment instrument.
    InstrumentId
}

identifier! {
    /// Identifier of an address-book contact.
    ContactId
}

impl WorkflowId {
    /// Generate a fresh random workflow id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
