#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{ContractViolation, EntityId, RealtimeEntity, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// One notification from a table's change feed. Insert and update carry the
/// full row, never a diff.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete(EntityId),
}

impl<T: RealtimeEntity> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => row.entity_id(),
            ChangeEvent::Delete(id) => id,
        }
    }

    pub fn row(&self) -> Option<&T> {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => Some(row),
            ChangeEvent::Delete(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    /// Whether a feed event of `kind` can be the echo of this mutation. The
    /// feed reports an echoed insert as either INSERT or, when a server
    /// trigger touched the row in the same commit, UPDATE.
    pub fn echoed_by(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (MutationKind::Insert, ChangeKind::Insert)
                | (MutationKind::Insert, ChangeKind::Update)
                | (MutationKind::Update, ChangeKind::Update)
                | (MutationKind::Delete, ChangeKind::Delete)
        )
    }
}

/// A locally-issued edit, before it is applied optimistically.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent<T> {
    Insert(T),
    Update(T),
    Delete(EntityId),
}

impl<T: RealtimeEntity> MutationIntent<T> {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationIntent::Insert(_) => MutationKind::Insert,
            MutationIntent::Update(_) => MutationKind::Update,
            MutationIntent::Delete(_) => MutationKind::Delete,
        }
    }
}

/// Single round trip sent to the data store.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest<T> {
    pub kind: MutationKind,
    pub entity_id: EntityId,
    pub row: Option<T>,
}

impl<T: RealtimeEntity> Validate for MutationRequest<T> {
    fn validate(&self) -> Result<(), ContractViolation> {
        match (self.kind, &self.row) {
            (MutationKind::Delete, _) => Ok(()),
            (_, None) => Err(ContractViolation::InvalidValue {
                field: "mutation_request.row",
                reason: "insert and update must carry a row",
            }),
            (_, Some(row)) => {
                if self.kind == MutationKind::Update && row.entity_id() != &self.entity_id {
                    return Err(ContractViolation::InvalidValue {
                        field: "mutation_request.row",
                        reason: "row id must match entity_id",
                    });
                }
                row.validate()
            }
        }
    }
}

/// Remote acknowledgement. For inserts `entity_id` is the server-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationAck<T> {
    pub entity_id: EntityId,
    pub row: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawFeedPayload {
    #[serde(rename = "eventType")]
    event_type: ChangeKind,
    #[serde(default)]
    new: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

/// Decodes a `{eventType, new, old}` change notification into a typed event.
/// Rows are validated; anything malformed is a contract violation, never a
/// partially-applied event.
pub fn decode_feed_payload<T: RealtimeEntity>(
    payload: &Value,
) -> Result<ChangeEvent<T>, ContractViolation> {
    let raw: RawFeedPayload =
        serde_json::from_value(payload.clone()).map_err(|_| ContractViolation::InvalidValue {
            field: "feed_payload",
            reason: "not a change notification",
        })?;
    match raw.event_type {
        ChangeKind::Insert | ChangeKind::Update => {
            let new = raw.new.ok_or(ContractViolation::InvalidValue {
                field: "feed_payload.new",
                reason: "must be present for INSERT/UPDATE",
            })?;
            let row: T =
                serde_json::from_value(new).map_err(|_| ContractViolation::InvalidValue {
                    field: "feed_payload.new",
                    reason: "row does not match table schema",
                })?;
            row.validate()?;
            Ok(if raw.event_type == ChangeKind::Insert {
                ChangeEvent::Insert(row)
            } else {
                ChangeEvent::Update(row)
            })
        }
        ChangeKind::Delete => {
            let id = raw
                .old
                .as_ref()
                .and_then(|old| old.get(T::ID_FIELD))
                .and_then(Value::as_str)
                .ok_or(ContractViolation::InvalidValue {
                    field: "feed_payload.old",
                    reason: "must carry the row id for DELETE",
                })?;
            Ok(ChangeEvent::Delete(EntityId::new(id)?))
        }
    }
}

pub fn encode_feed_payload<T: RealtimeEntity>(
    event: &ChangeEvent<T>,
) -> Result<Value, ContractViolation> {
    let encode_row = |row: &T| {
        serde_json::to_value(row).map_err(|_| ContractViolation::InvalidValue {
            field: "feed_payload.new",
            reason: "row is not serializable",
        })
    };
    let (new, old) = match event {
        ChangeEvent::Insert(row) | ChangeEvent::Update(row) => {
            let mut old = Map::new();
            old.insert(
                T::ID_FIELD.to_string(),
                Value::String(row.entity_id().as_str().to_string()),
            );
            (encode_row(row)?, Value::Object(old))
        }
        ChangeEvent::Delete(id) => {
            let mut old = Map::new();
            old.insert(
                T::ID_FIELD.to_string(),
                Value::String(id.as_str().to_string()),
            );
            (Value::Object(Map::new()), Value::Object(old))
        }
    };
    Ok(json!({
        "eventType": event.kind().as_str(),
        "table": T::TABLE,
        "new": new,
        "old": old,
    }))
}
