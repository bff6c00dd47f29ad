//! Identity types for IntentMesh
//!
//! Record identifiers are strongly typed wrappers around UUIDs so an escrow id
//! can never be handed to an operation expecting an intent id. Counterparties
//! are addressed through [`Account`], which pairs an external identifier with a
//! payment address and an opaque signing key reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(IntentId, "intent", "Unique identifier for a client intent");
define_id_type!(BidId, "bid", "Unique identifier for a provider bid");
define_id_type!(EscrowId, "escrow", "Unique identifier for an escrow custody record");
define_id_type!(SessionId, "session", "Unique identifier for a bilateral session");
define_id_type!(TransactionId, "tx", "Unique identifier for a recorded bilateral transaction");

/// Reference to a signing key held by the payment rail.
///
/// The core never sees key material, only the name under which the rail
/// knows the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef(pub String);

impl KeyRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

/// A counterparty that can send and receive funds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// External identifier (agent id, provider id, ...)
    pub id: String,
    /// Address funds are paid to
    pub address: String,
    /// Key used when this account pays
    pub key: KeyRef,
}

impl Account {
    pub fn new(id: impl Into<String>, address: impl Into<String>, key: KeyRef) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            key,
        }
    }
}
