#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};

use url::Url;

use authsync_contracts::navigation::{
    DetectorState, LoopReason, LoopSignal, NavigationEvent,
};
use authsync_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId};

pub mod reason_codes {
    use authsync_contracts::ReasonCodeId;

    // Loop-detector reason-code namespace.
    pub const LOOP_BREAK_APPLIED: ReasonCodeId = ReasonCodeId(0x4C50_0001);
    pub const LOOP_BROKEN_MARKER_SEEN: ReasonCodeId = ReasonCodeId(0x4C50_0002);
    pub const LOOP_RESET_FRESH_NAVIGATION: ReasonCodeId = ReasonCodeId(0x4C50_0003);
    pub const LOOP_RESET_MANUAL: ReasonCodeId = ReasonCodeId(0x4C50_0004);
}

/// Reserved control parameters (a signaling channel, never business
/// data). The break marker survives the corrective rewrite; everything else
/// volatile is stripped by it.
pub const PARAM_LOOP_BROKEN: &str = "authsync_break";
pub const PARAM_NAV_CACHE_BUST: &str = "authsync_ts";
pub const PARAM_REDIRECT_COUNT: &str = "authsync_rc";

const TIMESTAMP_PARAM_NAMES: [&str; 4] = ["t", "ts", "timestamp", "_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopDetectorConfig {
    pub window: u8,
    pub repeated_path_threshold: u8,
    pub timestamp_param_threshold: u8,
    pub query_length_threshold: u16,
}

impl LoopDetectorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            window: 10,
            repeated_path_threshold: 3,
            timestamp_param_threshold: 2,
            query_length_threshold: 200,
        }
    }
}

/// The one-shot corrective action: same path, volatile parameters stripped,
/// break marker appended. The host applies it without creating a new
/// history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectiveNavigation {
    pub sanitized_url: String,
    pub reason_code: ReasonCodeId,
    pub t_event: MonotonicTimeNs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopVerdict {
    pub state: DetectorState,
    pub signal: LoopSignal,
    pub corrective: Option<CorrectiveNavigation>,
    /// In `Broken` state all role-based automatic redirects for the current
    /// page load are suppressed.
    pub suppress_auto_redirect: bool,
    /// True when the only way forward is the explicit "fix and continue"
    /// affordance.
    pub manual_remediation: bool,
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    state: DetectorState,
    buffer: VecDeque<NavigationEvent>,
    broken_path: Option<String>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::Monitoring,
            buffer: VecDeque::new(),
            broken_path: None,
        }
    }

    /// Restore a detector from a persisted navigation buffer (session scope
    /// survives reloads; detector state does not and is re-derived from the
    /// break marker on the next observation).
    pub fn from_events(config: LoopDetectorConfig, events: Vec<NavigationEvent>) -> Self {
        let window = config.window as usize;
        let mut buffer: VecDeque<NavigationEvent> = events.into();
        while buffer.len() > window {
            buffer.pop_front();
        }
        Self {
            config,
            state: DetectorState::Monitoring,
            buffer,
            broken_path: None,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn events(&self) -> Vec<NavigationEvent> {
        self.buffer.iter().cloned().collect()
    }

    /// Explicit manual reset (the remediation affordance succeeded).
    pub fn reset(&mut self) {
        self.state = DetectorState::Monitoring;
        self.broken_path = None;
        self.buffer.clear();
    }

    /// Observe one navigation. Appends to the buffer in navigation order,
    /// recomputes the loop signal synchronously, and steps the
    /// monitoring/suspected/broken state machine.
    pub fn observe(
        &mut self,
        raw_url: &str,
        now: MonotonicTimeNs,
    ) -> Result<LoopVerdict, ContractViolation> {
        let parsed = parse_navigation(raw_url)?;
        let event = NavigationEvent::v1(
            parsed.path.clone(),
            parsed.pairs.iter().map(|(name, _)| name.clone()).collect(),
            parsed.query_len,
            now,
        )?;
        self.append(event);

        let marker_present = parsed
            .pairs
            .iter()
            .any(|(name, _)| name == PARAM_LOOP_BROKEN);

        if self.state == DetectorState::Broken {
            if marker_present || self.broken_path.as_deref() == Some(parsed.path.as_str()) {
                // Same episode: stay broken, never re-apply the corrective.
                return Ok(self.verdict(compute_signal(&self.buffer, &parsed, &self.config), None));
            }
            // Marker absent on a fresh navigation: the episode is over.
            self.state = DetectorState::Monitoring;
            self.broken_path = None;
            let current = self.buffer.pop_back();
            self.buffer.clear();
            if let Some(current) = current {
                self.buffer.push_back(current);
            }
        } else if marker_present {
            // A break was applied before this page load; honor it.
            self.state = DetectorState::Broken;
            self.broken_path = Some(parsed.path.clone());
            return Ok(self.verdict(compute_signal(&self.buffer, &parsed, &self.config), None));
        }

        let signal = compute_signal(&self.buffer, &parsed, &self.config);
        if !signal.suspected {
            self.state = DetectorState::Monitoring;
            return Ok(self.verdict(signal, None));
        }

        // monitoring -> suspected -> broken, with the corrective applied
        // exactly once for this episode.
        self.state = DetectorState::Suspected;
        let corrective = CorrectiveNavigation {
            sanitized_url: sanitize_url(&parsed),
            reason_code: reason_codes::LOOP_BREAK_APPLIED,
            t_event: now,
        };
        self.state = DetectorState::Broken;
        self.broken_path = Some(parsed.path);
        Ok(self.verdict(signal, Some(corrective)))
    }

    fn append(&mut self, event: NavigationEvent) {
        let window = self.config.window as usize;
        self.buffer.push_back(event);
        while self.buffer.len() > window {
            self.buffer.pop_front();
        }
    }

    fn verdict(&self, signal: LoopSignal, corrective: Option<CorrectiveNavigation>) -> LoopVerdict {
        let broken = self.state == DetectorState::Broken;
        LoopVerdict {
            state: self.state,
            signal,
            corrective,
            suppress_auto_redirect: broken,
            manual_remediation: broken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedNavigation {
    path: String,
    pairs: Vec<(String, String)>,
    query_len: u32,
}

fn parse_navigation(raw_url: &str) -> Result<ParsedNavigation, ContractViolation> {
    let url = match Url::parse(raw_url) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("app://local")
            .expect("static base url must parse")
            .join(raw_url)
            .map_err(|_| ContractViolation::InvalidValue {
                field: "navigation.url",
                reason: "must be an absolute or app-relative URL",
            })?,
        Err(_) => {
            return Err(ContractViolation::InvalidValue {
                field: "navigation.url",
                reason: "must parse as a URL",
            })
        }
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    let query_len = url.query().map(|q| q.len() as u32).unwrap_or(0);
    Ok(ParsedNavigation {
        path: url.path().to_string(),
        pairs,
        query_len,
    })
}

fn is_timestamp_like(name: &str, value: &str) -> bool {
    if name == PARAM_NAV_CACHE_BUST || TIMESTAMP_PARAM_NAMES.contains(&name) {
        return true;
    }
    // Epoch seconds or millis: all digits, 10-13 chars.
    (10..=13).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_volatile(name: &str, value: &str) -> bool {
    name == PARAM_LOOP_BROKEN || name == PARAM_REDIRECT_COUNT || is_timestamp_like(name, value)
}

/// Independent OR-conditions; any one suffices. Path repetition counting
/// uses the normalized path (query stripped) so cache-busting parameters do
/// not defeat detection.
fn compute_signal(
    buffer: &VecDeque<NavigationEvent>,
    current: &ParsedNavigation,
    config: &LoopDetectorConfig,
) -> LoopSignal {
    let mut reasons = Vec::new();

    let mut path_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for event in buffer {
        *path_counts.entry(event.path.as_str()).or_insert(0) += 1;
    }
    let max_repeats = path_counts.values().copied().max().unwrap_or(0);
    if max_repeats >= u32::from(config.repeated_path_threshold) {
        reasons.push(LoopReason::RepeatedPath);
    }

    let timestamp_params = current
        .pairs
        .iter()
        .filter(|(name, value)| is_timestamp_like(name, value))
        .count();
    if timestamp_params >= config.timestamp_param_threshold as usize {
        reasons.push(LoopReason::AccumulatingTimestampParams);
    }

    if current.query_len > u32::from(config.query_length_threshold) {
        reasons.push(LoopReason::ExcessiveQueryLength);
    }

    if current
        .pairs
        .iter()
        .any(|(name, _)| name == PARAM_REDIRECT_COUNT)
    {
        reasons.push(LoopReason::ExplicitRedirectCounter);
    }

    LoopSignal {
        suspected: !reasons.is_empty(),
        reasons,
    }
}

fn sanitize_url(parsed: &ParsedNavigation) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &parsed.pairs {
        if !is_volatile(name, value) {
            serializer.append_pair(name, value);
        }
    }
    serializer.append_pair(PARAM_LOOP_BROKEN, "1");
    format!("{}?{}", parsed.path, serializer.finish())
}
