#![forbid(unsafe_code)]

pub mod fetch;
pub mod loop_detector;
pub mod retry;
pub mod router;
