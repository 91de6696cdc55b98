#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use authsync_contracts::reconcile::{FetchClass, FetchFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u8,
    pub retry_delay_ms: u32,
    pub timeout_ms: u32,
}

impl RetryConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1500,
            timeout_ms: 8000,
        }
    }
}

/// Cooperative cancellation flag shared between the host and an in-flight
/// retry run. Once cancelled, the run must not retry and must not report a
/// classified result as if it completed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Number of live clones of this token, the issuer's included. Lets an
    /// issuer tell a token that is still held somewhere from one whose
    /// every outside handle has been dropped.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    Cancelled,
    Exhausted { class: FetchClass, attempts: u32 },
}

/// Delay before the retry that follows failed attempt `attempt` (0-based):
/// `retry_delay_ms * 1.5^attempt`, saturating.
pub fn backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    let base = f64::from(config.retry_delay_ms);
    let scaled = base * 1.5f64.powi(attempt.min(64) as i32);
    if !scaled.is_finite() || scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// Run `op` with bounded retries. `op` receives the 0-based attempt number
/// so the fetch layer can carry a diagnostic attempt counter. `sleep` is
/// injected so tests stay instantaneous and hosts control scheduling.
///
/// An always-failing op is attempted exactly `1 + max_retries` times and
/// then rejected with the last failure's classification.
pub fn run_with_retry<T>(
    config: &RetryConfig,
    cancel: &CancelToken,
    sleep: &mut dyn FnMut(u64),
    op: &mut dyn FnMut(u32) -> Result<T, FetchFailure>,
) -> Result<T, RetryError> {
    let total_attempts = u32::from(config.max_retries).saturating_add(1);
    let mut last_class = FetchClass::Unknown;

    for attempt in 0..total_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        if attempt > 0 {
            sleep(backoff_delay_ms(config, attempt - 1));
            // The scheduled retry may have been torn down while sleeping.
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
        }
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(failure) => last_class = failure.class,
        }
    }

    Err(RetryError::Exhausted {
        class: last_class,
        attempts: total_attempts,
    })
}
