//! Face matcher capability.
//!
//! The session never decides whether two faces match; it asks a
//! [`FaceMatcher`]. No biometric backend ships here. The implementations
//! below are fixed-answer and random stand-ins for wiring and tests.
//!
//! Contract for implementors:
//! - one decision per call; a call never retries internally
//! - the answer is final for the attempt that requested it
//! - calls may be slow and may block; callers run them off any UI path

use crate::types::{CapturedSample, SampleHandle};
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of comparing a candidate sample with a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub is_match: bool,
}

/// Strategy for deciding whether a capture belongs to the enrolled identity.
pub trait FaceMatcher: Send + Sync {
    fn compare(&self, candidate: &CapturedSample, reference: &SampleHandle) -> MatchResult;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Rejects everything. Default when no backend is configured, so a device
/// without a real matcher never auto-approves.
pub struct DenyAllMatcher;

impl FaceMatcher for DenyAllMatcher {
    fn compare(&self, _candidate: &CapturedSample, _reference: &SampleHandle) -> MatchResult {
        MatchResult { is_match: false }
    }

    fn name(&self) -> &str {
        "deny-all"
    }
}

/// Always returns the configured answer.
pub struct FixedMatcher {
    answer: bool,
}

impl FixedMatcher {
    pub fn new(answer: bool) -> Self {
        Self { answer }
    }
}

impl FaceMatcher for FixedMatcher {
    fn compare(&self, _candidate: &CapturedSample, _reference: &SampleHandle) -> MatchResult {
        MatchResult { is_match: self.answer }
    }

    fn name(&self) -> &str {
        if self.answer {
            "accept-all"
        } else {
            "fixed-reject"
        }
    }
}

/// Coin flip. Exercises both verdict paths in demos; not a biometric.
pub struct RandomMatcher {
    probability: f64,
}

impl RandomMatcher {
    /// `probability` of a match, clamped to `[0, 1]`.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }
}

impl FaceMatcher for RandomMatcher {
    fn compare(&self, _candidate: &CapturedSample, _reference: &SampleHandle) -> MatchResult {
        MatchResult {
            is_match: rand::thread_rng().gen_bool(self.probability),
        }
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Wraps another matcher and sleeps before answering, to mimic a slow backend.
pub struct DelayedMatcher<M> {
    inner: M,
    delay: Duration,
}

impl<M: FaceMatcher> DelayedMatcher<M> {
    pub fn new(inner: M, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<M: FaceMatcher> FaceMatcher for DelayedMatcher<M> {
    fn compare(&self, candidate: &CapturedSample, reference: &SampleHandle) -> MatchResult {
        std::thread::sleep(self.delay);
        self.inner.compare(candidate, reference)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Test double that counts calls and replays scripted answers.
///
/// Once the script runs out it keeps returning the last answer (or
/// `false` if the script was empty).
pub struct ScriptedMatcher {
    state: Mutex<Script>,
}

struct Script {
    /// Remaining answers, next one last.
    pending: Vec<bool>,
    last: bool,
    calls: usize,
}

impl ScriptedMatcher {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        let mut pending: Vec<bool> = answers.into_iter().collect();
        pending.reverse();
        Self {
            state: Mutex::new(Script {
                pending,
                last: false,
                calls: 0,
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).calls
    }
}

impl FaceMatcher for ScriptedMatcher {
    fn compare(&self, _candidate: &CapturedSample, _reference: &SampleHandle) -> MatchResult {
        let mut script = self.state.lock().unwrap_or_else(|e| e.into_inner());
        script.calls += 1;
        if let Some(next) = script.pending.pop() {
            script.last = next;
        }
        MatchResult {
            is_match: script.last,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> CapturedSample {
        CapturedSample {
            handle: SampleHandle::new("mem://capture"),
            digest: "00".into(),
            width: 1,
            height: 1,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_deny_all_never_matches() {
        let r = DenyAllMatcher.compare(&sample(), &SampleHandle::new("ref"));
        assert!(!r.is_match);
    }

    #[test]
    fn test_random_matcher_extremes() {
        let reference = SampleHandle::new("ref");
        let always = RandomMatcher::new(1.0);
        let never = RandomMatcher::new(0.0);
        for _ in 0..32 {
            assert!(always.compare(&sample(), &reference).is_match);
            assert!(!never.compare(&sample(), &reference).is_match);
        }
    }

    #[test]
    fn test_random_matcher_clamps_probability() {
        let reference = SampleHandle::new("ref");
        assert!(RandomMatcher::new(7.0).compare(&sample(), &reference).is_match);
        assert!(!RandomMatcher::new(f64::NAN).compare(&sample(), &reference).is_match);
    }

    #[test]
    fn test_scripted_matcher_replays_then_holds() {
        let m = ScriptedMatcher::new([false, true]);
        let reference = SampleHandle::new("ref");
        assert!(!m.compare(&sample(), &reference).is_match);
        assert!(m.compare(&sample(), &reference).is_match);
        assert!(m.compare(&sample(), &reference).is_match);
        assert_eq!(m.calls(), 3);
    }

    #[test]
    fn test_delayed_matcher_delegates() {
        let m = DelayedMatcher::new(FixedMatcher::new(true), Duration::from_millis(1));
        assert!(m.compare(&sample(), &SampleHandle::new("ref")).is_match);
        assert_eq!(m.name(), "accept-all");
    }
}
