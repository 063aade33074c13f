#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Pending,
    Reviewed,
    Resolved,
}

/// A message a signed-in user sends to the administrators. Only its author
/// and admins can read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: EntityId,
    pub user_id: ActorId,
    pub user_name: String,
    pub user_email: String,
    pub subject: String,
    pub message: String,
    pub status: FeedbackStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feedback {
    /// New feedback always starts out pending.
    pub fn v1(
        id: EntityId,
        user_id: ActorId,
        user_name: String,
        user_email: String,
        subject: String,
        message: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            id,
            user_id,
            user_name,
            user_email,
            subject: subject.trim().to_string(),
            message: message.trim().to_string(),
            status: FeedbackStatus::Pending,
            created_at,
            updated_at: created_at,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn with_status(&self, status: FeedbackStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: at,
            ..self.clone()
        }
    }
}

impl Validate for Feedback {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("feedback.user_name", &self.user_name, 128)?;
        validate_text("feedback.subject", &self.subject, 200)?;
        validate_text("feedback.message", &self.message, 5_000)?;
        if !self.user_email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "feedback.user_email",
                reason: "must be an email address",
            });
        }
        if self.updated_at < self.created_at {
            return Err(ContractViolation::InvalidValue {
                field: "feedback.updated_at",
                reason: "must not precede created_at",
            });
        }
        Ok(())
    }
}

impl RealtimeEntity for Feedback {
    const TABLE: &'static str = "feedback";
    const ORDERING: OrderingRule = OrderingRule::Prepend;

    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn owner(&self) -> Option<&str> {
        Some(self.user_id.as_str())
    }
}
