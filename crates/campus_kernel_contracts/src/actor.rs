#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const CAMPUS_SESSION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "actor_id",
                reason: "must not be empty",
            });
        }
        if id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "actor_id",
                reason: "must be <= 128 chars",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ActorId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ActorId> for String {
    fn from(value: ActorId) -> Self {
        value.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Portal roles. `Admin` is the privileged administrative role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActorRole {
    Student,
    Faculty,
    ClassRepresentative,
    CanteenStaff,
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Student => "student",
            ActorRole::Faculty => "faculty",
            ActorRole::ClassRepresentative => "cr",
            ActorRole::CanteenStaff => "canteen_staff",
            ActorRole::Admin => "admin",
        }
    }

    pub fn is_privileged(self) -> bool {
        self == ActorRole::Admin
    }

    /// Accepts the canonical wire names plus the display spellings stored by
    /// older profile rows ("Admin", "Canteen Staff", "CR").
    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "student" => Ok(ActorRole::Student),
            "faculty" => Ok(ActorRole::Faculty),
            "cr" | "class_representative" => Ok(ActorRole::ClassRepresentative),
            "canteen_staff" => Ok(ActorRole::CanteenStaff),
            "admin" => Ok(ActorRole::Admin),
            _ => Err(ContractViolation::InvalidValue {
                field: "actor_role",
                reason: "unknown role",
            }),
        }
    }
}

impl FromStr for ActorRole {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActorRole {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActorRole> for String {
    fn from(value: ActorRole) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub identity: ActorId,
    pub role: ActorRole,
    pub email: Option<String>,
}

impl Actor {
    pub fn v1(
        identity: ActorId,
        role: ActorRole,
        email: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let actor = Self {
            identity,
            role,
            email,
        };
        actor.validate()?;
        Ok(actor)
    }

    pub fn has_any_role(&self, roles: &[ActorRole]) -> bool {
        roles.contains(&self.role)
    }
}

impl Validate for Actor {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(email) = &self.email {
            if !email.contains('@') || email.len() > 254 {
                return Err(ContractViolation::InvalidValue {
                    field: "actor.email",
                    reason: "must be a plausible email address",
                });
            }
        }
        Ok(())
    }
}

/// What the authentication collaborator hands back for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub schema_version: SchemaVersion,
    pub actor: Actor,
    pub established_at: MonotonicTimeNs,
}

impl Session {
    pub fn v1(actor: Actor, established_at: MonotonicTimeNs) -> Result<Self, ContractViolation> {
        let session = Self {
            schema_version: CAMPUS_SESSION_CONTRACT_VERSION,
            actor,
            established_at,
        };
        session.validate()?;
        Ok(session)
    }
}

impl Validate for Session {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CAMPUS_SESSION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "session.schema_version",
                reason: "must match CAMPUS_SESSION_CONTRACT_VERSION",
            });
        }
        self.actor.validate()
    }
}
