#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use authsync_contracts::profile::{CacheEntry, Profile, ProfileOrigin, Role};
use authsync_contracts::reconcile::{FetchClass, FetchFailure, ReconciledEvent};
use authsync_contracts::session::{Session, SubjectId};
use authsync_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
use authsync_engines::fetch::ProfileFetcher;
use authsync_engines::retry::{run_with_retry, CancelToken, RetryConfig, RetryError};
use authsync_storage::profile_cache::{ProfileCache, ProfileCacheConfig};
use authsync_storage::scope::KeyValueStore;

pub mod reason_codes {
    use authsync_contracts::ReasonCodeId;

    // Reconciliation reason-code namespace.
    pub const RECON_OK_AUTHORITATIVE: ReasonCodeId = ReasonCodeId(0x5243_0001);
    pub const RECON_OK_CACHED: ReasonCodeId = ReasonCodeId(0x5243_0002);
    pub const RECON_OK_FALLBACK: ReasonCodeId = ReasonCodeId(0x5243_0003);
    pub const RECON_REFRESH_APPLIED: ReasonCodeId = ReasonCodeId(0x5243_0004);
    pub const RECON_FIX_FORCED_REFRESH: ReasonCodeId = ReasonCodeId(0x5243_0005);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub retry: RetryConfig,
    pub cache: ProfileCacheConfig,
}

impl ReconcileConfig {
    pub fn mvp_v1() -> Self {
        Self {
            retry: RetryConfig::mvp_v1(),
            cache: ProfileCacheConfig::mvp_v1(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// No session at all: the only correct UI action is a sign-in prompt.
    NoSession,
    InvalidSession(ContractViolation),
    FixRejected(FetchFailure),
}

/// Handle for a background (stale-while-revalidate) refresh. The host runs
/// it via `run_refresh`; its result is applied through the per-subject
/// sequence guard, so a superseded ticket can never clobber newer state.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    pub subject_id: SubjectId,
    pub seq: u64,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub profile: Profile,
    /// Set when the profile is a degraded (fallback) result; the UI stays
    /// usable and may show a non-blocking notice plus a retry affordance.
    pub degraded: Option<FetchClass>,
    pub refresh: Option<RefreshTicket>,
}

impl PartialEq for RefreshTicket {
    fn eq(&self, other: &Self) -> bool {
        self.subject_id == other.subject_id && self.seq == other.seq
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(Profile),
    /// A newer result was applied first; this one was dropped unseen.
    StaleDropped,
    Cancelled,
    /// Retries exhausted; the previously cached profile stays in place.
    Failed(FetchClass),
}

#[derive(Debug, Clone)]
struct InFlight {
    seq: u64,
    cancel: CancelToken,
}

/// The single source of truth for "what can this user do right now".
/// Explicitly constructed with its collaborators and torn down by the host;
/// nothing here hangs off a global.
pub struct ReconcileService<S: KeyValueStore, F: ProfileFetcher> {
    config: ReconcileConfig,
    fetcher: F,
    cache: ProfileCache<S>,
    next_seq: BTreeMap<SubjectId, u64>,
    applied_seq: BTreeMap<SubjectId, u64>,
    inflight: BTreeMap<SubjectId, InFlight>,
    events: Vec<ReconciledEvent>,
    sleep: Box<dyn FnMut(u64)>,
}

impl<S: KeyValueStore, F: ProfileFetcher> ReconcileService<S, F> {
    pub fn new(config: ReconcileConfig, fetcher: F, store: S) -> Self {
        Self::with_sleeper(
            config,
            fetcher,
            store,
            Box::new(|ms| std::thread::sleep(Duration::from_millis(ms))),
        )
    }

    /// Test/host hook: backoff waits go through `sleep` so schedulers (and
    /// tests) stay in control of time.
    pub fn with_sleeper(
        config: ReconcileConfig,
        fetcher: F,
        store: S,
        sleep: Box<dyn FnMut(u64)>,
    ) -> Self {
        Self {
            cache: ProfileCache::new(config.cache, store),
            config,
            fetcher,
            next_seq: BTreeMap::new(),
            applied_seq: BTreeMap::new(),
            inflight: BTreeMap::new(),
            events: Vec::new(),
            sleep,
        }
    }

    pub fn cache_store(&self) -> &S {
        self.cache.store()
    }

    /// Drain emitted `reconciled` events in emission order.
    pub fn take_events(&mut self) -> Vec<ReconciledEvent> {
        std::mem::take(&mut self.events)
    }

    /// Produce the one profile the application should trust right now.
    /// Never blocks rendering on failure: the result is authoritative,
    /// cached, or a fallback synthesized from session claims.
    pub fn resolve(
        &mut self,
        session: Option<&Session>,
        force_refresh: bool,
        now: MonotonicTimeNs,
    ) -> Result<Resolution, ReconcileError> {
        let session = session.ok_or(ReconcileError::NoSession)?;
        self.resolve_session(
            session,
            force_refresh,
            now,
            reason_codes::RECON_OK_AUTHORITATIVE,
        )
    }

    /// `authoritative_reason` tags the event emitted when the fetch
    /// succeeds, so one profile replacement produces exactly one event even
    /// when the refresh was forced by the fix command.
    fn resolve_session(
        &mut self,
        session: &Session,
        force_refresh: bool,
        now: MonotonicTimeNs,
        authoritative_reason: ReasonCodeId,
    ) -> Result<Resolution, ReconcileError> {
        session.validate().map_err(ReconcileError::InvalidSession)?;
        let subject_id = session.subject_id.clone();

        if force_refresh {
            // Forced refresh drops the snapshot; any in-flight ticket is
            // superseded and will be dropped by the sequence guard.
            let _ = self.cache.clear(&subject_id);
        } else if let Some(entry) = self.cache.read(&subject_id, now) {
            match entry.into_profile(now) {
                Ok(profile) => {
                    self.push_event(&profile, reason_codes::RECON_OK_CACHED, now);
                    let refresh = self.issue_refresh_ticket(&subject_id);
                    return Ok(Resolution {
                        profile,
                        degraded: None,
                        refresh,
                    });
                }
                Err(_) => {
                    let _ = self.cache.clear(&subject_id);
                }
            }
        }

        let (seq, cancel) = self.begin_fetch(&subject_id);
        let fetched = {
            let fetcher = &self.fetcher;
            let sleep = &mut *self.sleep;
            run_with_retry(&self.config.retry, &cancel, sleep, &mut |attempt| {
                fetcher.fetch_authoritative(&subject_id, attempt)
            })
        };
        self.finish_fetch(&subject_id, seq);

        match fetched {
            Ok(auth) => {
                let profile = Profile::v1(
                    subject_id.clone(),
                    auth.role,
                    auth.approved,
                    sanitize_display_name(auth.display_name),
                    now,
                    ProfileOrigin::Authoritative,
                )
                .map_err(ReconcileError::InvalidSession)?;
                self.apply_profile(&subject_id, seq, &profile, authoritative_reason, now);
                Ok(Resolution {
                    profile,
                    degraded: None,
                    refresh: None,
                })
            }
            Err(RetryError::Cancelled) => {
                // Torn down mid-resolve: answer with a fallback but leave
                // shared state untouched.
                let profile = fallback_profile(session, now)?;
                Ok(Resolution {
                    profile,
                    degraded: Some(FetchClass::Unknown),
                    refresh: None,
                })
            }
            Err(RetryError::Exhausted { class, .. }) => {
                let profile = fallback_profile(session, now)?;
                // Persist the fallback so subsequent loads are not blind.
                self.apply_profile(
                    &subject_id,
                    seq,
                    &profile,
                    reason_codes::RECON_OK_FALLBACK,
                    now,
                );
                Ok(Resolution {
                    profile,
                    degraded: Some(class),
                    refresh: None,
                })
            }
        }
    }

    /// Execute a background refresh ticket. A refresh failure is soft: the
    /// cached profile stays in place and no fallback is synthesized.
    pub fn run_refresh(&mut self, ticket: &RefreshTicket, now: MonotonicTimeNs) -> RefreshOutcome {
        if ticket.cancel.is_cancelled() {
            self.finish_fetch(&ticket.subject_id, ticket.seq);
            return RefreshOutcome::Cancelled;
        }
        let fetched = {
            let fetcher = &self.fetcher;
            let sleep = &mut *self.sleep;
            run_with_retry(&self.config.retry, &ticket.cancel, sleep, &mut |attempt| {
                fetcher.fetch_authoritative(&ticket.subject_id, attempt)
            })
        };
        self.finish_fetch(&ticket.subject_id, ticket.seq);

        match fetched {
            Ok(_) if ticket.cancel.is_cancelled() => RefreshOutcome::Cancelled,
            Ok(auth) => {
                let profile = match Profile::v1(
                    ticket.subject_id.clone(),
                    auth.role,
                    auth.approved,
                    sanitize_display_name(auth.display_name),
                    now,
                    ProfileOrigin::Authoritative,
                ) {
                    Ok(profile) => profile,
                    Err(_) => return RefreshOutcome::Failed(FetchClass::Unknown),
                };
                if self.apply_profile(
                    &ticket.subject_id,
                    ticket.seq,
                    &profile,
                    reason_codes::RECON_REFRESH_APPLIED,
                    now,
                ) {
                    RefreshOutcome::Applied(profile)
                } else {
                    RefreshOutcome::StaleDropped
                }
            }
            Err(RetryError::Cancelled) => RefreshOutcome::Cancelled,
            Err(RetryError::Exhausted { class, .. }) => RefreshOutcome::Failed(class),
        }
    }

    /// Cancel outstanding work for the subject and fence off late results.
    pub fn teardown(&mut self, subject_id: &SubjectId) {
        if let Some(inflight) = self.inflight.remove(subject_id) {
            inflight.cancel.cancel();
        }
        let issued = self.next_seq.get(subject_id).copied().unwrap_or(0);
        let applied = self.applied_seq.entry(subject_id.clone()).or_insert(0);
        *applied = (*applied).max(issued);
    }

    pub fn teardown_all(&mut self) {
        let subjects: Vec<SubjectId> = self.inflight.keys().cloned().collect();
        for subject_id in subjects {
            self.teardown(&subject_id);
        }
    }

    pub fn sign_out(&mut self, subject_id: &SubjectId) {
        self.teardown(subject_id);
        let _ = self.cache.clear(subject_id);
    }

    /// The administrative fix command: ask the backend to re-derive the
    /// role/approval mapping, then force an authoritative refresh.
    pub fn apply_role_fix(
        &mut self,
        session: &Session,
        now: MonotonicTimeNs,
    ) -> Result<Resolution, ReconcileError> {
        session.validate().map_err(ReconcileError::InvalidSession)?;
        self.fetcher
            .request_role_fix(&session.subject_id)
            .map_err(ReconcileError::FixRejected)?;
        self.resolve_session(session, true, now, reason_codes::RECON_FIX_FORCED_REFRESH)
    }

    fn begin_fetch(&mut self, subject_id: &SubjectId) -> (u64, CancelToken) {
        let seq = self
            .next_seq
            .entry(subject_id.clone())
            .and_modify(|s| *s += 1)
            .or_insert(1);
        let seq = *seq;
        let cancel = CancelToken::new();
        self.inflight.insert(
            subject_id.clone(),
            InFlight {
                seq,
                cancel: cancel.clone(),
            },
        );
        (seq, cancel)
    }

    fn finish_fetch(&mut self, subject_id: &SubjectId, seq: u64) {
        if self
            .inflight
            .get(subject_id)
            .is_some_and(|inflight| inflight.seq == seq)
        {
            self.inflight.remove(subject_id);
        }
    }

    fn issue_refresh_ticket(&mut self, subject_id: &SubjectId) -> Option<RefreshTicket> {
        // Request coalescing: a second caller attaches to an in-flight
        // refresh instead of issuing a duplicate. A ticket the host dropped
        // without running it holds no outside handle any more; reclaim it
        // so revalidation does not stall until teardown.
        if let Some(inflight) = self.inflight.get(subject_id) {
            if inflight.cancel.handle_count() > 1 {
                return None;
            }
            inflight.cancel.cancel();
        }
        let (seq, cancel) = self.begin_fetch(subject_id);
        Some(RefreshTicket {
            subject_id: subject_id.clone(),
            seq,
            cancel,
        })
    }

    /// Apply a fetched profile through the sequence guard. Returns false
    /// when a newer result already landed (profile writes follow resolution
    /// order, never issue order).
    fn apply_profile(
        &mut self,
        subject_id: &SubjectId,
        seq: u64,
        profile: &Profile,
        reason_code: ReasonCodeId,
        now: MonotonicTimeNs,
    ) -> bool {
        let applied = self.applied_seq.entry(subject_id.clone()).or_insert(0);
        if seq <= *applied {
            return false;
        }
        *applied = seq;
        // storage_unavailable is non-fatal: the profile still flows.
        let _ = self.cache.write(&CacheEntry::from_profile(profile, now));
        self.push_event(profile, reason_code, now);
        true
    }

    fn push_event(&mut self, profile: &Profile, reason_code: ReasonCodeId, now: MonotonicTimeNs) {
        // Validated profiles always produce a constructible event; if one
        // ever did not, losing the observability record is the right call.
        if let Ok(event) = ReconciledEvent::v1(
            profile.subject_id.clone(),
            profile.origin,
            profile.role,
            profile.approved,
            reason_code,
            now,
        ) {
            self.events.push(event);
        }
    }
}

fn sanitize_display_name(display_name: Option<String>) -> Option<String> {
    display_name.filter(|name| {
        !name.trim().is_empty() && name.len() <= 128 && !name.chars().any(|c| c.is_control())
    })
}

/// Degraded profile derived solely from session claims: role claim absent
/// or unknown defaults to `user`, approval defaults to false. Pure; never
/// sufficient for privileged authorization decisions.
fn fallback_profile(session: &Session, now: MonotonicTimeNs) -> Result<Profile, ReconcileError> {
    let role = session
        .claims
        .role
        .as_deref()
        .and_then(Role::parse)
        .unwrap_or(Role::User);
    Profile::v1(
        session.subject_id.clone(),
        role,
        session.claims.approved.unwrap_or(false),
        sanitize_display_name(session.claims.display_name.clone()),
        now,
        ProfileOrigin::Fallback,
    )
    .map_err(ReconcileError::InvalidSession)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use authsync_contracts::profile::Destination;
    use authsync_contracts::session::{SessionClaims, SessionId};
    use authsync_engines::fetch::AuthoritativeProfile;
    use authsync_engines::router::route_for;
    use authsync_storage::scope::{MemoryKeyValueStore, UnavailableKeyValueStore};

    struct ScriptedFetcher {
        responses: RefCell<VecDeque<Result<AuthoritativeProfile, FetchFailure>>>,
        profile_calls: Cell<u32>,
        fix_result: RefCell<Result<(), FetchFailure>>,
        fix_calls: Cell<u32>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<AuthoritativeProfile, FetchFailure>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                profile_calls: Cell::new(0),
                fix_result: RefCell::new(Ok(())),
                fix_calls: Cell::new(0),
            }
        }

    }

    impl ProfileFetcher for ScriptedFetcher {
        fn fetch_authoritative(
            &self,
            _subject_id: &SubjectId,
            _attempt: u32,
        ) -> Result<AuthoritativeProfile, FetchFailure> {
            self.profile_calls.set(self.profile_calls.get() + 1);
            match self.responses.borrow_mut().pop_front() {
                Some(response) => response,
                None => Err(FetchFailure::new(FetchClass::NetworkError, None, "script empty")),
            }
        }

        fn request_role_fix(&self, _subject_id: &SubjectId) -> Result<(), FetchFailure> {
            self.fix_calls.set(self.fix_calls.get() + 1);
            self.fix_result.borrow().clone()
        }
    }

    fn auth(role: Role, approved: bool) -> Result<AuthoritativeProfile, FetchFailure> {
        Ok(AuthoritativeProfile {
            role,
            approved,
            display_name: None,
        })
    }

    fn failure(class: FetchClass) -> Result<AuthoritativeProfile, FetchFailure> {
        Err(FetchFailure::new(class, None, "scripted"))
    }

    fn session_with(role: Option<&str>, approved: Option<bool>) -> Session {
        Session::v1(
            SessionId::new("sess_1").unwrap(),
            SubjectId::new("user_2f9a").unwrap(),
            SessionClaims {
                role: role.map(str::to_string),
                approved,
                display_name: None,
            },
        )
        .unwrap()
    }

    fn service(
        fetcher: ScriptedFetcher,
    ) -> ReconcileService<MemoryKeyValueStore, ScriptedFetcher> {
        ReconcileService::with_sleeper(
            ReconcileConfig::mvp_v1(),
            fetcher,
            MemoryKeyValueStore::new(),
            Box::new(|_| {}),
        )
    }

    fn t(ms: u64) -> MonotonicTimeNs {
        MonotonicTimeNs::from_ms(ms)
    }

    #[test]
    fn at_recon_01_absent_session_is_a_sign_in_prompt() {
        let mut svc = service(ScriptedFetcher::new(vec![]));
        let out = svc.resolve(None, false, t(1));
        assert_eq!(out, Err(ReconcileError::NoSession));
    }

    #[test]
    fn at_recon_02_end_to_end_claims_user_backend_agent() {
        let mut svc = service(ScriptedFetcher::new(vec![auth(Role::Agent, true)]));
        let session = session_with(Some("user"), None);
        let out = svc.resolve(Some(&session), false, t(1)).unwrap();
        assert_eq!(out.profile.origin, ProfileOrigin::Authoritative);
        assert_eq!(out.profile.role, Role::Agent);
        assert!(out.profile.approved);
        assert_eq!(out.degraded, None);
        assert_eq!(route_for(&out.profile), Destination::AgentDashboard);
    }

    #[test]
    fn at_recon_03_fallback_derivation_is_pure_and_persisted() {
        let responses = vec![
            failure(FetchClass::Timeout),
            failure(FetchClass::Timeout),
            failure(FetchClass::Timeout),
            failure(FetchClass::Timeout),
        ];
        let mut svc = service(ScriptedFetcher::new(responses));
        let session = session_with(Some("agent"), Some(true));
        let out = svc.resolve(Some(&session), false, t(1)).unwrap();
        assert_eq!(out.profile.origin, ProfileOrigin::Fallback);
        assert_eq!(out.profile.role, Role::Agent);
        assert!(out.profile.approved);
        assert_eq!(out.degraded, Some(FetchClass::Timeout));

        // Subsequent load serves the persisted fallback as a cached profile.
        let again = svc.resolve(Some(&session), false, t(2)).unwrap();
        assert_eq!(again.profile.origin, ProfileOrigin::Cached);
        assert_eq!(again.profile.role, Role::Agent);
        assert!(!again.profile.approved);
    }

    #[test]
    fn at_recon_04_retry_bound_is_one_plus_max_retries() {
        let mut svc = service(ScriptedFetcher::new(vec![
            failure(FetchClass::ServerError),
            failure(FetchClass::ServerError),
            failure(FetchClass::ServerError),
            failure(FetchClass::ServerError),
        ]));
        let session = session_with(None, None);
        let out = svc.resolve(Some(&session), false, t(1)).unwrap();
        assert_eq!(svc.fetcher.profile_calls.get(), 4);
        assert_eq!(out.degraded, Some(FetchClass::ServerError));
        assert_eq!(out.profile.role, Role::User);
    }

    #[test]
    fn at_recon_05_cache_hit_revalidates_and_coalesces() {
        let mut svc = service(ScriptedFetcher::new(vec![auth(Role::User, false)]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();

        let hit = svc.resolve(Some(&session), false, t(2)).unwrap();
        assert_eq!(hit.profile.origin, ProfileOrigin::Cached);
        let ticket = hit.refresh.expect("stale-while-revalidate ticket");

        // A second caller attaches to the in-flight refresh.
        let attached = svc.resolve(Some(&session), false, t(3)).unwrap();
        assert_eq!(attached.profile.origin, ProfileOrigin::Cached);
        assert!(attached.refresh.is_none());

        drop(ticket);
    }

    #[test]
    fn at_recon_06_superseded_refresh_never_overwrites_newer_result() {
        let mut svc = service(ScriptedFetcher::new(vec![
            auth(Role::User, false),  // initial blocking fetch
            auth(Role::Admin, true),  // forced refresh (newer, lands first)
            auth(Role::User, false),  // stale ticket resolving late
        ]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();

        let ticket = svc
            .resolve(Some(&session), false, t(2))
            .unwrap()
            .refresh
            .expect("ticket");

        let forced = svc.resolve(Some(&session), true, t(3)).unwrap();
        assert_eq!(forced.profile.role, Role::Admin);

        let outcome = svc.run_refresh(&ticket, t(4));
        assert_eq!(outcome, RefreshOutcome::StaleDropped);

        let current = svc.resolve(Some(&session), false, t(5)).unwrap();
        assert_eq!(current.profile.role, Role::Admin);
    }

    #[test]
    fn at_recon_07_teardown_cancels_outstanding_refresh() {
        let mut svc = service(ScriptedFetcher::new(vec![auth(Role::User, false)]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();
        let ticket = svc
            .resolve(Some(&session), false, t(2))
            .unwrap()
            .refresh
            .expect("ticket");
        let calls_before = svc.fetcher.profile_calls.get();

        svc.teardown(&session.subject_id);
        let outcome = svc.run_refresh(&ticket, t(3));
        assert_eq!(outcome, RefreshOutcome::Cancelled);
        assert_eq!(svc.fetcher.profile_calls.get(), calls_before);
    }

    #[test]
    fn at_recon_08_events_carry_origin_and_reason() {
        let mut svc = service(ScriptedFetcher::new(vec![auth(Role::Agent, true)]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();
        svc.resolve(Some(&session), false, t(2)).unwrap();

        let events = svc.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].origin, ProfileOrigin::Authoritative);
        assert_eq!(events[0].reason_code, reason_codes::RECON_OK_AUTHORITATIVE);
        assert_eq!(events[1].origin, ProfileOrigin::Cached);
        assert_eq!(events[1].reason_code, reason_codes::RECON_OK_CACHED);
        assert!(svc.take_events().is_empty());
    }

    #[test]
    fn at_recon_09_sign_out_clears_the_cache() {
        let mut svc = service(ScriptedFetcher::new(vec![auth(Role::User, false)]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();
        assert!(!svc.cache_store().is_empty());

        svc.sign_out(&session.subject_id);
        assert!(svc.cache_store().is_empty());
    }

    #[test]
    fn at_recon_10_role_fix_is_post_then_forced_refresh() {
        let mut svc = service(ScriptedFetcher::new(vec![
            auth(Role::AgentPending, false), // initial view: stuck pending
            auth(Role::Agent, true),         // after the backend fix
        ]));
        let session = session_with(Some("agent_pending"), None);
        let before = svc.resolve(Some(&session), false, t(1)).unwrap();
        assert_eq!(before.profile.role, Role::AgentPending);

        let fixed = svc.apply_role_fix(&session, t(2)).unwrap();
        assert_eq!(svc.fetcher.fix_calls.get(), 1);
        assert_eq!(fixed.profile.role, Role::Agent);
        assert_eq!(fixed.profile.origin, ProfileOrigin::Authoritative);

        // One event per replacement; the forced one carries the fix reason.
        let events = svc.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].reason_code, reason_codes::RECON_OK_AUTHORITATIVE);
        assert_eq!(events[1].reason_code, reason_codes::RECON_FIX_FORCED_REFRESH);
    }

    #[test]
    fn at_recon_11_rejected_fix_surfaces_without_refresh() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let _ = fetcher.fix_result.replace(Err(FetchFailure::new(
            FetchClass::ServerError,
            Some(500),
            "fix_rejected",
        )));
        let mut svc = service(fetcher);
        let session = session_with(Some("user"), None);
        let out = svc.apply_role_fix(&session, t(1));
        assert!(matches!(out, Err(ReconcileError::FixRejected(_))));
        assert_eq!(svc.fetcher.profile_calls.get(), 0);
    }

    #[test]
    fn at_recon_12_unavailable_storage_never_blocks_resolution() {
        let mut svc = ReconcileService::with_sleeper(
            ReconcileConfig::mvp_v1(),
            ScriptedFetcher::new(vec![auth(Role::Admin, true)]),
            UnavailableKeyValueStore,
            Box::new(|_| {}),
        );
        let session = session_with(Some("admin"), Some(true));
        let out = svc.resolve(Some(&session), false, t(1)).unwrap();
        assert_eq!(out.profile.origin, ProfileOrigin::Authoritative);
        assert_eq!(out.degraded, None);
    }

    #[test]
    fn at_recon_13_dropped_ticket_does_not_stall_revalidation() {
        let mut svc = service(ScriptedFetcher::new(vec![
            auth(Role::User, false),
            auth(Role::Agent, true),
        ]));
        let session = session_with(Some("user"), None);
        svc.resolve(Some(&session), false, t(1)).unwrap();

        // Host discards the ticket without ever running it.
        let first = svc.resolve(Some(&session), false, t(2)).unwrap();
        drop(first.refresh.expect("ticket"));

        // The orphaned in-flight entry is reclaimed; a fresh ticket is
        // issued and still applies.
        let second = svc.resolve(Some(&session), false, t(3)).unwrap();
        let ticket = second.refresh.expect("replacement ticket");
        let outcome = svc.run_refresh(&ticket, t(4));
        assert!(matches!(outcome, RefreshOutcome::Applied(_)));

        let current = svc.resolve(Some(&session), false, t(5)).unwrap();
        assert_eq!(current.profile.role, Role::Agent);
    }
}
