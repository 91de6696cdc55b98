#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const NAVIGATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// One observed page transition. The query shape keeps parameter names
/// only, never values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub schema_version: SchemaVersion,
    pub path: String,
    pub query_param_names: Vec<String>,
    pub query_len: u32,
    pub timestamp: MonotonicTimeNs,
}

impl NavigationEvent {
    pub fn v1(
        path: String,
        mut query_param_names: Vec<String>,
        query_len: u32,
        timestamp: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        query_param_names.sort();
        query_param_names.dedup();
        let event = Self {
            schema_version: NAVIGATION_CONTRACT_VERSION,
            path,
            query_param_names,
            query_len,
            timestamp,
        };
        event.validate()?;
        Ok(event)
    }
}

impl Validate for NavigationEvent {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != NAVIGATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "navigation_event.schema_version",
                reason: "must match NAVIGATION_CONTRACT_VERSION",
            });
        }
        if self.path.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "navigation_event.path",
                reason: "must not be empty",
            });
        }
        if self.path.len() > 512 || self.path.contains('?') {
            return Err(ContractViolation::InvalidValue {
                field: "navigation_event.path",
                reason: "must be <= 512 chars with the query string stripped",
            });
        }
        if self.query_param_names.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "navigation_event.query_param_names",
                reason: "must contain <= 64 parameter names",
            });
        }
        for name in &self.query_param_names {
            if name.is_empty() || name.len() > 64 {
                return Err(ContractViolation::InvalidValue {
                    field: "navigation_event.query_param_names[]",
                    reason: "names must be 1..=64 chars",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoopReason {
    RepeatedPath,
    AccumulatingTimestampParams,
    ExcessiveQueryLength,
    ExplicitRedirectCounter,
}

impl LoopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopReason::RepeatedPath => "repeated_path",
            LoopReason::AccumulatingTimestampParams => "accumulating_timestamp_params",
            LoopReason::ExcessiveQueryLength => "excessive_query_length",
            LoopReason::ExplicitRedirectCounter => "explicit_redirect_counter",
        }
    }
}

/// Momentary verdict over the navigation buffer. Never persisted;
/// recomputed on every navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSignal {
    pub suspected: bool,
    pub reasons: Vec<LoopReason>,
}

impl LoopSignal {
    pub fn clear() -> Self {
        Self {
            suspected: false,
            reasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorState {
    Monitoring,
    Suspected,
    Broken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_sorts_and_dedupes_param_names() {
        let event = NavigationEvent::v1(
            "/dashboard/agent".to_string(),
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
            12,
            MonotonicTimeNs(1),
        )
        .unwrap();
        assert_eq!(event.query_param_names, vec!["a", "b"]);
    }

    #[test]
    fn event_rejects_path_with_query_string() {
        let event = NavigationEvent::v1(
            "/dashboard?x=1".to_string(),
            Vec::new(),
            0,
            MonotonicTimeNs(1),
        );
        assert!(event.is_err());
    }
}
