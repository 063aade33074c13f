#![forbid(unsafe_code)]

pub mod actor;
pub mod announcement;
pub mod canteen;
pub mod change;
pub mod classroom;
pub mod common;
pub mod entity;
pub mod faculty;
pub mod feedback;
pub mod notification;
pub mod visibility;

pub use common::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
pub use entity::{EntityId, OrderingRule, RealtimeEntity};
