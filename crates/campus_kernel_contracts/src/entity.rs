#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::actor::ActorRole;
use crate::{ContractViolation, Validate};

/// Prefix of client-generated ids for optimistic inserts that have not yet
/// been assigned a server id.
pub const TEMP_ENTITY_ID_PREFIX: &str = "tmp-";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "entity_id",
                reason: "must not be empty",
            });
        }
        if id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "entity_id",
                reason: "must be <= 128 chars",
            });
        }
        Ok(Self(id))
    }

    pub fn temporary(token: &str) -> Result<Self, ContractViolation> {
        Self::new(format!("{TEMP_ENTITY_ID_PREFIX}{token}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ENTITY_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a row that is new to the local list lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingRule {
    Append,
    Prepend,
    /// Kept sorted by [`RealtimeEntity::order_cmp`], ties broken by id.
    Sorted,
}

/// A row of a remote table mirrored into a realtime list.
pub trait RealtimeEntity:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Validate + Send + Sync + 'static
{
    const TABLE: &'static str;
    const ID_FIELD: &'static str = "id";
    const ORDERING: OrderingRule;

    fn entity_id(&self) -> &EntityId;

    fn set_entity_id(&mut self, id: EntityId);

    fn target_role(&self) -> Option<ActorRole> {
        None
    }

    fn owner(&self) -> Option<&str> {
        None
    }

    fn order_cmp(&self, _other: &Self) -> Ordering {
        Ordering::Equal
    }
}
