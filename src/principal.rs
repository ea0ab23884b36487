use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{HarnessConfig, RegisteredUser};

const TEEN_AGE_LIMIT: u8 = 18;
const UNKNOWN_INDUSTRY: &str = "unknown";
pub const DEFAULT_DEVICE: &str = "desktop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Patient,
    Provider,
    Dynamic,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Patient => "patient",
            Self::Provider => "provider",
            Self::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeCategory {
    Teen,
    Adult,
    Unknown,
}

impl AgeCategory {
    pub fn from_age(age: Option<u8>) -> Self {
        match age {
            Some(age) if age < TEEN_AGE_LIMIT => Self::Teen,
            Some(_) => Self::Adult,
            None => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teen => "teen",
            Self::Adult => "adult",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    pub industry: String,
    pub age: Option<u8>,
    pub device: String,
}

impl Principal {
    pub fn from_registered(user: &RegisteredUser) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.name.clone(),
            role: user.role,
            industry: user.industry.clone(),
            age: user.age,
            device: user.device.clone(),
        }
    }

    /// A principal typed in at selection time with no registry entry.
    pub fn ad_hoc(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            role: Role::Dynamic,
            industry: UNKNOWN_INDUSTRY.to_string(),
            age: None,
            device: DEFAULT_DEVICE.to_string(),
        }
    }

    pub fn age_category(&self) -> AgeCategory {
        AgeCategory::from_age(self.age)
    }
}

#[derive(Debug, Clone)]
pub struct PrincipalRegistry {
    users: Vec<RegisteredUser>,
}

impl PrincipalRegistry {
    pub fn from_config(cfg: &HarnessConfig) -> Self {
        Self {
            users: cfg.users.clone(),
        }
    }

    pub fn users(&self) -> &[RegisteredUser] {
        &self.users
    }

    pub fn get(&self, principal_id: &str) -> Option<&RegisteredUser> {
        self.users.iter().find(|user| user.id == principal_id)
    }

    /// Registered users resolve to their stored profile; anything else becomes
    /// a dynamic principal.
    pub fn resolve(&self, principal_id: &str) -> Principal {
        let principal_id = principal_id.trim();
        match self.get(principal_id) {
            Some(user) => Principal::from_registered(user),
            None => Principal::ad_hoc(principal_id),
        }
    }
}
