#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use url::Url;

use authsync_contracts::profile::Role;
use authsync_contracts::reconcile::{FetchClass, FetchFailure};
use authsync_contracts::session::SubjectId;

use crate::retry::RetryConfig;

/// Diagnostic attempt counter carried to the backend on each try.
pub const ATTEMPT_HEADER: &str = "x-authsync-attempt";
/// Cache-busting query parameter appended to the authoritative fetch.
pub const CACHE_BUST_PARAM: &str = "authsync_cb";

/// Payload of a successful authoritative fetch, before it is lifted into a
/// `Profile` by the reconciliation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoritativeProfile {
    pub role: Role,
    pub approved: bool,
    pub display_name: Option<String>,
}

/// Seam between the reconciliation service and the backend. Stubbed in
/// tests; `HttpProfileFetcher` is the production implementation.
pub trait ProfileFetcher {
    fn fetch_authoritative(
        &self,
        subject_id: &SubjectId,
        attempt: u32,
    ) -> Result<AuthoritativeProfile, FetchFailure>;

    /// Administrative reconciliation-fix endpoint: instructs the backend to
    /// re-derive and persist the role/approval mapping for the subject.
    fn request_role_fix(&self, subject_id: &SubjectId) -> Result<(), FetchFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFetchConfig {
    pub profile_endpoint: String,
    pub fix_endpoint: String,
    pub timeout_ms: u32,
    pub user_agent: String,
}

impl HttpFetchConfig {
    /// One timeout knob: the per-request deadline is the retry controller's
    /// `timeout_ms`, never an independent constant.
    pub fn mvp_v1(profile_endpoint: String, fix_endpoint: String, retry: &RetryConfig) -> Self {
        Self {
            profile_endpoint,
            fix_endpoint,
            timeout_ms: retry.timeout_ms,
            user_agent: "authsync/0.1".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct HttpProfileFetcher {
    config: HttpFetchConfig,
    bust_seq: AtomicU64,
}

impl HttpProfileFetcher {
    pub fn new(config: HttpFetchConfig) -> Self {
        Self {
            config,
            bust_seq: AtomicU64::new(0),
        }
    }

    fn agent(&self) -> Result<ureq::Agent, FetchFailure> {
        build_http_agent(self.config.timeout_ms, &self.config.user_agent)
            .map_err(|_| FetchFailure::new(FetchClass::Unknown, None, "agent_config_invalid"))
    }

    /// Cache-bust value advances on every request so intermediaries never
    /// see the same URL twice, even across resolve cycles.
    fn profile_url(&self, attempt: u32) -> Result<Url, FetchFailure> {
        let mut url = Url::parse(&self.config.profile_endpoint)
            .map_err(|_| FetchFailure::new(FetchClass::Unknown, None, "endpoint_invalid"))?;
        let seq = self.bust_seq.fetch_add(1, Ordering::Relaxed);
        url.query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &format!("{seq:x}-{attempt}"));
        Ok(url)
    }
}

impl ProfileFetcher for HttpProfileFetcher {
    fn fetch_authoritative(
        &self,
        _subject_id: &SubjectId,
        attempt: u32,
    ) -> Result<AuthoritativeProfile, FetchFailure> {
        let agent = self.agent()?;
        let url = self.profile_url(attempt)?;
        let response = agent
            .get(url.as_str())
            .set("Accept", "application/json")
            .set(ATTEMPT_HEADER, &attempt.to_string())
            .call()
            .map_err(failure_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|_| FetchFailure::new(FetchClass::ServerError, None, "json_parse"))?;
        parse_profile_payload(&body)
    }

    fn request_role_fix(&self, _subject_id: &SubjectId) -> Result<(), FetchFailure> {
        let agent = self.agent()?;
        let response = agent
            .post(&self.config.fix_endpoint)
            .set("Accept", "application/json")
            .call()
            .map_err(failure_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|_| FetchFailure::new(FetchClass::ServerError, None, "json_parse"))?;
        if body.pointer("/success").and_then(Value::as_bool) == Some(false) {
            return Err(FetchFailure::new(
                FetchClass::ServerError,
                None,
                "fix_rejected",
            ));
        }
        Ok(())
    }
}

/// Parse `{ success: bool, user?: {...}, message?: string }`. Non-success
/// is an authoritative rejection; a missing role claim defaults to `user`,
/// but an unparseable role string is contract drift and fails the fetch.
pub fn parse_profile_payload(body: &Value) -> Result<AuthoritativeProfile, FetchFailure> {
    if body.pointer("/success").and_then(Value::as_bool) != Some(true) {
        let detail = body
            .pointer("/message")
            .and_then(Value::as_str)
            .unwrap_or("success_false");
        return Err(FetchFailure::new(FetchClass::ServerError, None, detail));
    }
    let user = body
        .pointer("/user")
        .and_then(Value::as_object)
        .ok_or_else(|| FetchFailure::new(FetchClass::ServerError, None, "user_missing"))?;

    let role = match user.get("role").and_then(Value::as_str) {
        None => Role::User,
        Some(raw) => Role::parse(raw)
            .ok_or_else(|| FetchFailure::new(FetchClass::ServerError, None, "role_invalid"))?,
    };
    let approved = user
        .get("approved")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let display_name = user
        .get("displayName")
        .or_else(|| user.get("display_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty());

    Ok(AuthoritativeProfile {
        role,
        approved,
        display_name,
    })
}

fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, String> {
    if timeout_ms == 0 {
        return Err("timeout must be > 0".to_string());
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(user_agent)
        .build())
}

fn failure_from_ureq(err: ureq::Error) -> FetchFailure {
    match err {
        ureq::Error::Status(status, _) => FetchFailure::new(
            FetchClass::ServerError,
            Some(status),
            "http_non_2xx",
        ),
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            FetchFailure::new(classify_transport(&combined), None, "transport")
        }
    }
}

fn classify_transport(raw: &str) -> FetchClass {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        FetchClass::Timeout
    } else if lower.contains("dns")
        || lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("tls")
        || lower.contains("ssl")
    {
        FetchClass::NetworkError
    } else {
        FetchClass::Unknown
    }
}
