#![forbid(unsafe_code)]

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassroomStatus {
    Available,
    Occupied,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: EntityId,
    pub name: String,
    pub building: String,
    pub floor: i32,
    pub status: ClassroomStatus,
    pub last_updated: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl Classroom {
    pub fn v1(
        id: EntityId,
        name: String,
        building: String,
        floor: i32,
        status: ClassroomStatus,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            id,
            name,
            building,
            floor,
            status,
            last_updated: None,
            updated_by: None,
        };
        row.validate()?;
        Ok(row)
    }
}

impl Validate for Classroom {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("classroom.name", &self.name, 64)?;
        validate_text("classroom.building", &self.building, 64)?;
        if !(-5..=200).contains(&self.floor) {
            return Err(ContractViolation::InvalidRange {
                field: "classroom.floor",
                min: -5.0,
                max: 200.0,
                got: self.floor as f64,
            });
        }
        Ok(())
    }
}

impl RealtimeEntity for Classroom {
    const TABLE: &'static str = "classrooms";
    const ORDERING: OrderingRule = OrderingRule::Sorted;

    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn order_cmp(&self, other: &Self) -> Ordering {
        self.building
            .cmp(&other.building)
            .then(self.floor.cmp(&other.floor))
            .then_with(|| self.name.cmp(&other.name))
    }
}
