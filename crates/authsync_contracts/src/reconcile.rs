#![forbid(unsafe_code)]

use crate::profile::{ProfileOrigin, Role};
use crate::session::SubjectId;
use crate::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};

pub const RECONCILE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Classification of an authoritative-fetch failure after the transport
/// layer has been unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchClass {
    Timeout,
    ServerError,
    NetworkError,
    Unknown,
}

impl FetchClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchClass::Timeout => "timeout",
            FetchClass::ServerError => "server_error",
            FetchClass::NetworkError => "network_error",
            FetchClass::Unknown => "unknown",
        }
    }
}

/// One failed fetch attempt. The detail string is bounded and must never
/// carry credentials or raw response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub class: FetchClass,
    pub http_status: Option<u16>,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(class: FetchClass, http_status: Option<u16>, detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        detail.truncate(160);
        Self {
            class,
            http_status,
            detail,
        }
    }

    pub fn safe_detail(&self) -> String {
        match self.http_status {
            Some(status) => format!("class={} status={}", self.class.as_str(), status),
            None => format!("class={} {}", self.class.as_str(), self.detail),
        }
    }
}

/// Emitted on every wholesale profile replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledEvent {
    pub schema_version: SchemaVersion,
    pub subject_id: SubjectId,
    pub origin: ProfileOrigin,
    pub role: Role,
    pub approved: bool,
    pub reason_code: ReasonCodeId,
    pub t_event: MonotonicTimeNs,
}

impl ReconciledEvent {
    pub fn v1(
        subject_id: SubjectId,
        origin: ProfileOrigin,
        role: Role,
        approved: bool,
        reason_code: ReasonCodeId,
        t_event: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let event = Self {
            schema_version: RECONCILE_CONTRACT_VERSION,
            subject_id,
            origin,
            role,
            approved,
            reason_code,
            t_event,
        };
        event.validate()?;
        Ok(event)
    }
}

impl Validate for ReconciledEvent {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RECONCILE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "reconciled_event.schema_version",
                reason: "must match RECONCILE_CONTRACT_VERSION",
            });
        }
        self.subject_id.validate()?;
        // A fallback profile must never claim privileged approval on its own.
        if self.origin == ProfileOrigin::Cached && self.approved {
            return Err(ContractViolation::InvalidValue {
                field: "reconciled_event.approved",
                reason: "cached profiles rehydrate unapproved",
            });
        }
        Ok(())
    }
}
