#![forbid(unsafe_code)]

pub mod common;
pub mod navigation;
pub mod profile;
pub mod reconcile;
pub mod session;

pub use common::{
    ms_to_ns, ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate,
};
