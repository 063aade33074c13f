#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, ActorRole};
use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: EntityId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
    pub target_role: Option<ActorRole>,
}

impl Announcement {
    pub fn v1(
        id: EntityId,
        title: String,
        content: String,
        created_at: DateTime<Utc>,
        created_by: ActorId,
        target_role: Option<ActorRole>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            id,
            title,
            content,
            created_at,
            created_by,
            target_role,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for Announcement {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("announcement.title", &self.title, 200)?;
        validate_text("announcement.content", &self.content, 10_000)
    }
}

impl RealtimeEntity for Announcement {
    const TABLE: &'static str = "announcements";
    const ORDERING: OrderingRule = OrderingRule::Prepend;

    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn target_role(&self) -> Option<ActorRole> {
        self.target_role
    }

    fn owner(&self) -> Option<&str> {
        Some(self.created_by.as_str())
    }
}
