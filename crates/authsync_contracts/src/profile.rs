#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::session::SubjectId;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const PROFILE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    User,
    AgentPending,
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::AgentPending => "agent_pending",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    /// Unknown role strings parse to `None`; callers decide the default.
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim() {
            "guest" => Some(Role::Guest),
            "user" => Some(Role::User),
            "agent_pending" => Some(Role::AgentPending),
            "agent" => Some(Role::Agent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileOrigin {
    Authoritative,
    Cached,
    Fallback,
}

impl ProfileOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileOrigin::Authoritative => "authoritative",
            ProfileOrigin::Cached => "cached",
            ProfileOrigin::Fallback => "fallback",
        }
    }
}

/// Canonical landing destination for a reconciled profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    AdminDashboard,
    AgentDashboard,
    UserDashboard,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Destination::AdminDashboard => "admin_dashboard",
            Destination::AgentDashboard => "agent_dashboard",
            Destination::UserDashboard => "user_dashboard",
        }
    }
}

/// The application's reconciled view of a user. Replaced wholesale per
/// reconciliation, never partially patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub schema_version: SchemaVersion,
    pub subject_id: SubjectId,
    pub role: Role,
    pub approved: bool,
    pub display_name: Option<String>,
    pub reconciled_at: MonotonicTimeNs,
    pub origin: ProfileOrigin,
}

impl Profile {
    pub fn v1(
        subject_id: SubjectId,
        role: Role,
        approved: bool,
        display_name: Option<String>,
        reconciled_at: MonotonicTimeNs,
        origin: ProfileOrigin,
    ) -> Result<Self, ContractViolation> {
        let profile = Self {
            schema_version: PROFILE_CONTRACT_VERSION,
            subject_id,
            role,
            approved,
            display_name,
            reconciled_at,
            origin,
        };
        profile.validate()?;
        Ok(profile)
    }
}

impl Validate for Profile {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PROFILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "profile.schema_version",
                reason: "must match PROFILE_CONTRACT_VERSION",
            });
        }
        self.subject_id.validate()?;
        if let Some(name) = &self.display_name {
            if name.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "profile.display_name",
                    reason: "must not be empty when provided",
                });
            }
            if name.len() > 128 {
                return Err(ContractViolation::InvalidValue {
                    field: "profile.display_name",
                    reason: "exceeds max length",
                });
            }
            if name.chars().any(|c| c.is_control()) {
                return Err(ContractViolation::InvalidValue {
                    field: "profile.display_name",
                    reason: "must contain no control chars",
                });
            }
        }
        Ok(())
    }
}

/// Persisted snapshot of a profile. Deliberately the minimal field subset:
/// no approval flag, so a rehydrated profile is never privileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_version: SchemaVersion,
    pub subject_id: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub cached_at: MonotonicTimeNs,
}

impl CacheEntry {
    pub fn from_profile(profile: &Profile, cached_at: MonotonicTimeNs) -> Self {
        Self {
            schema_version: PROFILE_CONTRACT_VERSION,
            subject_id: profile.subject_id.as_str().to_string(),
            role: profile.role,
            display_name: profile.display_name.clone(),
            cached_at,
        }
    }

    pub fn into_profile(
        self,
        reconciled_at: MonotonicTimeNs,
    ) -> Result<Profile, ContractViolation> {
        Profile::v1(
            SubjectId::new(self.subject_id)?,
            self.role,
            false,
            self.display_name,
            reconciled_at,
            ProfileOrigin::Cached,
        )
    }
}

impl Validate for CacheEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PROFILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "cache_entry.schema_version",
                reason: "must match PROFILE_CONTRACT_VERSION",
            });
        }
        SubjectId::new(self.subject_id.clone())?;
        if let Some(name) = &self.display_name {
            if name.len() > 128 || name.chars().any(|c| c.is_control()) {
                return Err(ContractViolation::InvalidValue {
                    field: "cache_entry.display_name",
                    reason: "must be <= 128 chars and contain no control chars",
                });
            }
        }
        Ok(())
    }
}
