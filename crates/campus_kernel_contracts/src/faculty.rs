#![forbid(unsafe_code)]

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FacultyAvailability {
    Available,
    Busy,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyStatus {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub department: String,
    pub status: FacultyAvailability,
    pub return_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl FacultyStatus {
    pub fn v1(
        id: EntityId,
        name: String,
        email: String,
        department: String,
        status: FacultyAvailability,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            id,
            name,
            email,
            department,
            status,
            return_date: None,
            notes: None,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for FacultyStatus {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("faculty_status.name", &self.name, 128)?;
        validate_text("faculty_status.department", &self.department, 128)?;
        if !self.email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "faculty_status.email",
                reason: "must be an email address",
            });
        }
        if self.return_date.is_some() && self.status != FacultyAvailability::Unavailable {
            return Err(ContractViolation::InvalidValue {
                field: "faculty_status.return_date",
                reason: "only allowed while UNAVAILABLE",
            });
        }
        Ok(())
    }
}

impl RealtimeEntity for FacultyStatus {
    const TABLE: &'static str = "faculty_availability";
    const ORDERING: OrderingRule = OrderingRule::Sorted;

    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn order_cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}
