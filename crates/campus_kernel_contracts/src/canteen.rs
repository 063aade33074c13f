#![forbid(unsafe_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, EntityId, OrderingRule, RealtimeEntity, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MenuCategory {
    Breakfast,
    Lunch,
    Dinner,
    Snacks,
    Beverages,
}

impl MenuCategory {
    pub const ALL: [MenuCategory; 5] = [
        MenuCategory::Breakfast,
        MenuCategory::Lunch,
        MenuCategory::Dinner,
        MenuCategory::Snacks,
        MenuCategory::Beverages,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: EntityId,
    pub name: String,
    pub category: MenuCategory,
    pub price: Decimal,
    pub description: Option<String>,
    pub votes: u32,
    pub image_url: Option<String>,
    pub is_vegetarian: bool,
}

impl MenuItem {
    pub fn v1(
        id: EntityId,
        name: String,
        category: MenuCategory,
        price: Decimal,
        votes: u32,
        is_vegetarian: bool,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            id,
            name,
            category,
            price,
            description: None,
            votes,
            image_url: None,
            is_vegetarian,
        };
        row.validate()?;
        Ok(row)
    }

    /// Vote counts never drop below zero.
    pub fn with_vote_delta(&self, delta: i64) -> Self {
        let mut next = self.clone();
        let votes = i64::from(self.votes).saturating_add(delta).max(0);
        next.votes = u32::try_from(votes).unwrap_or(u32::MAX);
        next
    }
}

impl Validate for MenuItem {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("menu_item.name", &self.name, 128)?;
        if self.price.is_sign_negative() {
            return Err(ContractViolation::InvalidValue {
                field: "menu_item.price",
                reason: "must be >= 0",
            });
        }
        Ok(())
    }
}

impl RealtimeEntity for MenuItem {
    const TABLE: &'static str = "canteen_menu";
    const ORDERING: OrderingRule = OrderingRule::Append;

    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn set_entity_id(&mut self, id: EntityId) {
        self.id = id;
    }
}
