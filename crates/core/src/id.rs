//! Tenant and stream identifiers.
//!
//! Lots get fresh time-ordered ids. Materials and SKUs get name-based ids, so
//! their identity follows from their content.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Shop partition. No stream, read-model row or derived id crosses it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

/// Key of one event stream within a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! uuid_id {
    ($t:ident) => {
        impl $t {
            /// Fresh UUIDv7 id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
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

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {e}", stringify!($t))))
            }
        }
    };
}

uuid_id!(TenantId);
uuid_id!(AggregateId);

impl AggregateId {
    /// UUIDv5 of `name` under `namespace`. Two "create" commands for the same
    /// content land on the same stream, and the second fails its version check.
    pub fn derived(namespace: &Uuid, name: &[u8]) -> Self {
        Self(Uuid::new_v5(namespace, name))
    }

    /// Like [`AggregateId::derived`], with the tenant mixed into the name so the
    /// same content in two shops yields two streams.
    pub fn derived_in(tenant_id: TenantId, namespace: &Uuid, name: &[u8]) -> Self {
        let mut scoped = Vec::with_capacity(16 + name.len());
        scoped.extend_from_slice(tenant_id.as_uuid().as_bytes());
        scoped.extend_from_slice(name);
        Self::derived(namespace, &scoped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable() {
        let ns = Uuid::NAMESPACE_OID;
        assert_eq!(AggregateId::derived(&ns, b"lot-1"), AggregateId::derived(&ns, b"lot-1"));
        assert_ne!(AggregateId::derived(&ns, b"lot-1"), AggregateId::derived(&ns, b"lot-2"));
    }

    #[test]
    fn tenant_scoped_ids_differ_across_tenants() {
        let ns = Uuid::NAMESPACE_OID;
        let (a, b) = (TenantId::new(), TenantId::new());
        assert_eq!(
            AggregateId::derived_in(a, &ns, b"3f9a"),
            AggregateId::derived_in(a, &ns, b"3f9a")
        );
        assert_ne!(
            AggregateId::derived_in(a, &ns, b"3f9a"),
            AggregateId::derived_in(b, &ns, b"3f9a")
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<AggregateId>().unwrap_err();
        assert!(matches!(&err, DomainError::InvalidId(msg) if msg.starts_with("AggregateId")));
    }
}
