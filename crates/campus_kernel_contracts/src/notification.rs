#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, ActorRole};
use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

/// A row of the per-user unread notification view. Rows leave the view
/// once marked read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub notification_id: EntityId,
    pub user_id: ActorId,
    pub is_read: bool,
    pub notification_created_at: DateTime<Utc>,
    pub announcement_id: EntityId,
    pub title: String,
    pub content: String,
    pub created_by: ActorId,
    pub target_role: Option<ActorRole>,
}

impl Validate for NotificationItem {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("notification_item.title", &self.title, 200)?;
        if self.is_read {
            return Err(ContractViolation::InvalidValue {
                field: "notification_item.is_read",
                reason: "unread view must not carry read rows",
            });
        }
        Ok(())
    }
}

impl RealtimeEntity for NotificationItem {
    const TABLE: &'static str = "unread_notifications";
    const ID_FIELD: &'static str = "notification_id";
    const ORDERING: OrderingRule = OrderingRule::Prepend;

    fn entity_id(&self) -> &EntityId {
        &self.notification_id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.notification_id = id;
    }

    fn target_role(&self) -> Option<ActorRole> {
        self.target_role
    }

    fn owner(&self) -> Option<&str> {
        Some(self.user_id.as_str())
    }
}
