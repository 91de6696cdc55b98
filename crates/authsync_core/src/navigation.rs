#![forbid(unsafe_code)]

use authsync_contracts::navigation::{DetectorState, LoopSignal, NavigationEvent};
use authsync_contracts::profile::{Destination, Profile};
use authsync_contracts::{ContractViolation, MonotonicTimeNs};
use authsync_engines::loop_detector::{
    CorrectiveNavigation, LoopDetector, LoopDetectorConfig, LoopVerdict,
};
use authsync_engines::router::route_for;
use authsync_storage::nav_buffer::NavBufferStore;
use authsync_storage::scope::KeyValueStore;

/// What the host should do after one navigation: where to send the user (if
/// automatic routing is allowed right now), whether a one-shot corrective
/// rewrite must be applied first, and what the detector concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationPlan {
    /// `None` while redirects are suppressed (broken episode in progress).
    pub destination: Option<Destination>,
    pub corrective: Option<CorrectiveNavigation>,
    pub state: DetectorState,
    pub signal: LoopSignal,
    pub manual_remediation: bool,
}

/// Ties the role router to the loop detector: the detector always gets to
/// veto an automatic redirect, and its buffer is persisted through the
/// session-scoped store so an episode survives page reloads.
pub struct NavigationPlanner<S: KeyValueStore> {
    config: LoopDetectorConfig,
    detector: LoopDetector,
    buffer: NavBufferStore<S>,
}

impl<S: KeyValueStore> NavigationPlanner<S> {
    pub fn new(config: LoopDetectorConfig, store: S) -> Self {
        let mut buffer = NavBufferStore::new(store);
        let detector = LoopDetector::from_events(config, buffer.load());
        Self {
            config,
            detector,
            buffer,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.detector.state()
    }

    pub fn events(&self) -> Vec<NavigationEvent> {
        self.detector.events()
    }

    /// Observe the navigation, persist the updated buffer, and decide the
    /// landing destination for the reconciled profile. A persistence failure
    /// is non-fatal; detection continues in memory.
    pub fn plan(
        &mut self,
        profile: &Profile,
        raw_url: &str,
        now: MonotonicTimeNs,
    ) -> Result<NavigationPlan, ContractViolation> {
        let verdict = self.detector.observe(raw_url, now)?;
        let _ = self
            .buffer
            .save(&self.detector.events(), self.config.window as usize);
        Ok(Self::plan_from_verdict(profile, verdict))
    }

    /// The remediation affordance succeeded: forget the episode entirely,
    /// in memory and in the persisted buffer.
    pub fn reset(&mut self) {
        self.detector.reset();
        let _ = self.buffer.clear();
    }

    fn plan_from_verdict(profile: &Profile, verdict: LoopVerdict) -> NavigationPlan {
        let destination = if verdict.suppress_auto_redirect {
            None
        } else {
            Some(route_for(profile))
        };
        NavigationPlan {
            destination,
            corrective: verdict.corrective,
            state: verdict.state,
            signal: verdict.signal,
            manual_remediation: verdict.manual_remediation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authsync_contracts::navigation::LoopReason;
    use authsync_contracts::profile::{ProfileOrigin, Role};
    use authsync_contracts::session::SubjectId;
    use authsync_storage::scope::MemoryKeyValueStore;

    fn profile(role: Role) -> Profile {
        Profile::v1(
            SubjectId::new("user_2f9a").unwrap(),
            role,
            role == Role::Agent || role == Role::Admin,
            None,
            MonotonicTimeNs(1),
            ProfileOrigin::Authoritative,
        )
        .unwrap()
    }

    fn t(n: u64) -> MonotonicTimeNs {
        MonotonicTimeNs(n)
    }

    #[test]
    fn at_plan_01_routes_by_role_while_monitoring() {
        let mut planner =
            NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), MemoryKeyValueStore::new());
        let plan = planner.plan(&profile(Role::Admin), "/", t(1)).unwrap();
        assert_eq!(plan.destination, Some(Destination::AdminDashboard));
        assert_eq!(plan.state, DetectorState::Monitoring);
        assert!(plan.corrective.is_none());
    }

    #[test]
    fn at_plan_02_broken_episode_suppresses_the_redirect() {
        let mut planner =
            NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), MemoryKeyValueStore::new());
        let agent = profile(Role::Agent);
        planner.plan(&agent, "/dashboard/agent", t(1)).unwrap();
        planner.plan(&agent, "/dashboard/agent", t(2)).unwrap();
        let tripped = planner.plan(&agent, "/dashboard/agent", t(3)).unwrap();
        assert_eq!(tripped.destination, None);
        assert!(tripped.corrective.is_some());
        assert!(tripped.manual_remediation);
        assert!(tripped.signal.reasons.contains(&LoopReason::RepeatedPath));
    }

    #[test]
    fn at_plan_03_buffer_survives_planner_restarts() {
        let mut store = MemoryKeyValueStore::new();
        let agent = profile(Role::Agent);

        // Each planner instance is one page load sharing the session store.
        for stamp in 1..=2u64 {
            let mut planner =
                NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), &mut store);
            let plan = planner
                .plan(&agent, "/dashboard/agent", t(stamp))
                .unwrap();
            assert_eq!(plan.destination, Some(Destination::AgentDashboard));
        }

        let mut planner = NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), &mut store);
        let tripped = planner.plan(&agent, "/dashboard/agent", t(3)).unwrap();
        assert_eq!(tripped.destination, None);
        assert!(tripped.corrective.is_some());
    }

    #[test]
    fn at_plan_04_reset_clears_memory_and_persistence() {
        let mut store = MemoryKeyValueStore::new();
        let agent = profile(Role::Agent);
        {
            let mut planner = NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), &mut store);
            for stamp in 1..=3u64 {
                planner.plan(&agent, "/dashboard/agent", t(stamp)).unwrap();
            }
            assert_eq!(planner.state(), DetectorState::Broken);
            planner.reset();
            assert_eq!(planner.state(), DetectorState::Monitoring);
            assert!(planner.events().is_empty());
        }
        assert!(store.is_empty());

        let mut planner = NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), &mut store);
        let plan = planner.plan(&agent, "/dashboard/agent", t(10)).unwrap();
        assert_eq!(plan.destination, Some(Destination::AgentDashboard));
    }

    #[test]
    fn at_plan_05_persistence_failure_does_not_stop_detection() {
        use authsync_storage::scope::UnavailableKeyValueStore;
        let mut planner =
            NavigationPlanner::new(LoopDetectorConfig::mvp_v1(), UnavailableKeyValueStore);
        let agent = profile(Role::Agent);
        planner.plan(&agent, "/dashboard/agent", t(1)).unwrap();
        planner.plan(&agent, "/dashboard/agent", t(2)).unwrap();
        let tripped = planner.plan(&agent, "/dashboard/agent", t(3)).unwrap();
        assert_eq!(tripped.destination, None);
        assert!(tripped.corrective.is_some());
    }
}
