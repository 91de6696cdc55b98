#![forbid(unsafe_code)]

use crate::{ContractViolation, SchemaVersion, Validate};

pub const SESSION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

fn validate_id(field: &'static str, s: &str, max_len: usize) -> Result<(), ContractViolation> {
    if s.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if s.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    if !s.is_ascii() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ASCII",
        });
    }
    Ok(())
}

fn validate_opt_text(
    field: &'static str,
    value: &Option<String>,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if let Some(v) = value {
        if v.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "must not be empty when provided",
            });
        }
        if v.len() > max_len {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "exceeds max length",
            });
        }
        if v.chars().any(|c| c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "must contain no control chars",
            });
        }
    }
    Ok(())
}

/// Opaque session identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        let v = Self(id);
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SessionId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("session_id", &self.0, 128)
    }
}

/// Stable user identifier shared between the identity provider and the
/// application's own record of the user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        let v = Self(id);
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SubjectId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("subject_id", &self.0, 96)
    }
}

/// The identity provider's custom-attribute bag. Read-only from this
/// subsystem; mutations go through the administrative fix endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionClaims {
    pub role: Option<String>,
    pub approved: Option<bool>,
    pub display_name: Option<String>,
}

impl Validate for SessionClaims {
    fn validate(&self) -> Result<(), ContractViolation> {
        if let Some(role) = &self.role {
            validate_id("session_claims.role", role, 64)?;
        }
        validate_opt_text("session_claims.display_name", &self.display_name, 128)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub schema_version: SchemaVersion,
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub claims: SessionClaims,
}

impl Session {
    pub fn v1(
        session_id: SessionId,
        subject_id: SubjectId,
        claims: SessionClaims,
    ) -> Result<Self, ContractViolation> {
        let session = Self {
            schema_version: SESSION_CONTRACT_VERSION,
            session_id,
            subject_id,
            claims,
        };
        session.validate()?;
        Ok(session)
    }
}

impl Validate for Session {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != SESSION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "session.schema_version",
                reason: "must match SESSION_CONTRACT_VERSION",
            });
        }
        self.session_id.validate()?;
        self.subject_id.validate()?;
        self.claims.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_rejects_empty_and_non_ascii() {
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("sess_äbc").is_err());
        assert!(SessionId::new("sess_2f9a").is_ok());
    }

    #[test]
    fn claims_reject_control_chars_in_display_name() {
        let claims = SessionClaims {
            role: Some("agent".to_string()),
            approved: Some(true),
            display_name: Some("Jo\u{7}hn".to_string()),
        };
        assert!(claims.validate().is_err());
    }

    #[test]
    fn session_validates_nested_fields() {
        let session = Session::v1(
            SessionId::new("sess_1").unwrap(),
            SubjectId::new("user_2f9a").unwrap(),
            SessionClaims::default(),
        )
        .unwrap();
        assert!(session.validate().is_ok());
    }
}
