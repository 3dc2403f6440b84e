//! Strongly-typed identifiers used across ETS.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EtsError;

/// Identifier of a subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

/// Identifier of an invocation (and of its status record).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = EtsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| EtsError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(SubscriptionId, "SubscriptionId");
impl_uuid_newtype!(InvocationId, "InvocationId");

/// Tenant identifier, `<pod>:<org>` or a bare org name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

/// Trigger identifier, e.g. `idn:access-request-pre-approval`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

/// Human-readable trigger name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build the identifier, rejecting blank values.
            pub fn new(value: impl Into<String>) -> Result<Self, EtsError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(EtsError::invalid_id(concat!($name, " must not be empty")));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = EtsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(TenantId, "TenantId");
impl_string_newtype!(TriggerId, "TriggerId");
impl_string_newtype!(TriggerName, "TriggerName");

const DEFAULT_POD: &str = "default";

impl TenantId {
    /// Compose a tenant id from pod and org.
    pub fn from_parts(pod: &str, org: &str) -> Result<Self, EtsError> {
        Self::new(format!("{pod}:{org}"))
    }

    /// Org part of the tenant.
    pub fn org(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, org)) => org,
            None => &self.0,
        }
    }

    /// Pod part of the tenant; `default` when the id carries none.
    pub fn pod(&self) -> &str {
        match self.0.split_once(':') {
            Some((pod, _)) => pod,
            None => DEFAULT_POD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_parts() {
        let t: TenantId = "dev:acme".parse().unwrap();
        assert_eq!(t.pod(), "dev");
        assert_eq!(t.org(), "acme");

        let bare = TenantId::new("acme").unwrap();
        assert_eq!(bare.pod(), "default");
        assert_eq!(bare.org(), "acme");
    }

    #[test]
    fn blank_string_ids_are_rejected() {
        assert!(TriggerId::new("  ").is_err());
        assert!(TenantId::new("").is_err());
    }

    #[test]
    fn uuid_ids_round_trip_through_display() {
        let id = InvocationId::new();
        let parsed: InvocationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SubscriptionId>().is_err());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = TriggerId::new("idn:identity-created").unwrap();
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"idn:identity-created\""
        );
    }
}
