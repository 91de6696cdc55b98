#![forbid(unsafe_code)]

pub mod navigation;
pub mod service;

pub use navigation::{NavigationPlan, NavigationPlanner};
pub use service::{
    ReconcileConfig, ReconcileError, ReconcileService, RefreshOutcome, RefreshTicket, Resolution,
};
