//! Attendance session state machine.
//!
//! ```text
//! Idle -> AwaitingInput -> Verifying -> Accepted | Rejected -> Idle
//! ```
//!
//! One attempt at a time. Manual punches and face punches with nobody
//! enrolled skip straight to a verdict. The face comparison itself runs
//! outside the session: [`AttendanceSession::submit_face`] hands out a
//! [`FaceTicket`] and the caller reports back through
//! [`AttendanceSession::complete_face`]. A result for an attempt that is no
//! longer `Verifying` (cancelled, superseded) is dropped.

use crate::identifier;
use crate::matcher::MatchResult;
use crate::qr;
use crate::types::{
    AttendanceRecord, CapturedSample, GeoLocation, Identity, Method, PunchType, RejectReason,
    SampleHandle, Verdict,
};
use chrono::Utc;
use thiserror::Error;

/// Monotonic per-session attempt number.
pub type AttemptId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("an attendance attempt is already in progress")]
    SessionBusy,
    #[error("operation not valid while {0}")]
    WrongState(&'static str),
    #[error("attempt expects {expected} input, got {got}")]
    MethodMismatch { expected: Method, got: Method },
    #[error("cannot retry: {0}")]
    NotRetryable(RejectReason),
}

/// A punch attempt in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub id: AttemptId,
    pub punch_type: PunchType,
    pub method: Method,
    pub geo_location: Option<GeoLocation>,
    /// Identity the face path compares against, captured when the attempt began.
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    AwaitingInput(Attempt),
    Verifying(Attempt),
    Accepted(AttendanceRecord),
    Rejected { attempt: Attempt, reason: RejectReason },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingInput(_) => "awaiting input",
            SessionState::Verifying(_) => "verifying",
            SessionState::Accepted(_) => "accepted",
            SessionState::Rejected { .. } => "rejected",
        }
    }
}

/// What [`AttendanceSession::begin`] led to.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Waiting for a scan or capture.
    AwaitingInput(AttemptId),
    /// Decided without input (manual punch, nobody enrolled).
    Decided(Verdict),
}

/// Work order for one face comparison.
#[derive(Debug, Clone)]
pub struct FaceTicket {
    pub attempt: AttemptId,
    pub candidate: CapturedSample,
    pub reference: SampleHandle,
    pub display_name: String,
}

/// Coordinates a single punch attempt from selection to verdict.
#[derive(Debug)]
pub struct AttendanceSession {
    state: SessionState,
    last_attempt: AttemptId,
}

impl Default for AttendanceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AttendanceSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            last_attempt: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// An attempt is awaiting input or being verified.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            SessionState::AwaitingInput(_) | SessionState::Verifying(_)
        )
    }

    /// Whether `attempt` is the one currently being verified.
    pub fn is_verifying(&self, attempt: AttemptId) -> bool {
        matches!(&self.state, SessionState::Verifying(a) if a.id == attempt)
    }

    /// Start an attempt.
    ///
    /// `enrolled` is the device's active identity; only the face path uses it.
    /// An unacknowledged verdict from a previous attempt is discarded.
    pub fn begin(
        &mut self,
        punch_type: PunchType,
        method: Method,
        geo_location: Option<GeoLocation>,
        enrolled: Option<Identity>,
    ) -> Result<Transition, SessionError> {
        if self.is_busy() {
            tracing::warn!(state = self.state.name(), "begin rejected: session busy");
            return Err(SessionError::SessionBusy);
        }
        if !matches!(self.state, SessionState::Idle) {
            tracing::debug!(state = self.state.name(), "discarding unacknowledged verdict");
        }

        self.last_attempt += 1;
        let attempt = Attempt {
            id: self.last_attempt,
            punch_type,
            method,
            geo_location,
            identity: if method == Method::Face { enrolled } else { None },
        };
        tracing::info!(attempt = attempt.id, %punch_type, %method, "attempt started");

        match method {
            Method::Manual => {
                let verdict = self.accept(attempt, None);
                Ok(Transition::Decided(verdict))
            }
            Method::Face if attempt.identity.is_none() => {
                let verdict = self.reject(attempt, RejectReason::NotEnrolled);
                Ok(Transition::Decided(verdict))
            }
            Method::Qr | Method::Face => {
                let id = attempt.id;
                self.state = SessionState::AwaitingInput(attempt);
                Ok(Transition::AwaitingInput(id))
            }
        }
    }

    /// Feed raw scan text to a QR attempt and decide it.
    pub fn submit_qr(&mut self, payload: &str) -> Result<Verdict, SessionError> {
        let attempt = self.take_awaiting(Method::Qr)?;
        self.state = SessionState::Verifying(attempt.clone());

        let Some(identifier) = qr::parse(payload) else {
            tracing::info!(attempt = attempt.id, "scan held no identity number");
            return Ok(self.reject(attempt, RejectReason::InvalidQrFormat));
        };
        if !identifier::validate(&identifier) {
            tracing::info!(attempt = attempt.id, identifier = %identifier, "identity number failed checksum");
            return Ok(self.reject(attempt, RejectReason::InvalidIdentifier));
        }
        Ok(self.accept(attempt, Some(identifier)))
    }

    /// Hand a captured face to a face attempt. The session moves to
    /// `Verifying`; run the returned ticket through a matcher and report
    /// with [`complete_face`](Self::complete_face).
    pub fn submit_face(&mut self, candidate: CapturedSample) -> Result<FaceTicket, SessionError> {
        let attempt = self.take_awaiting(Method::Face)?;
        let Some(identity) = attempt.identity.clone() else {
            // only reachable if an Attempt was built outside begin()
            self.reject(attempt, RejectReason::NotEnrolled);
            return Err(SessionError::WrongState("awaiting input without an enrolled identity"));
        };

        tracing::debug!(
            attempt = attempt.id,
            candidate = %candidate.handle,
            reference = %identity.reference_sample,
            "face submitted for verification"
        );
        let ticket = FaceTicket {
            attempt: attempt.id,
            candidate,
            reference: identity.reference_sample,
            display_name: identity.display_name,
        };
        self.state = SessionState::Verifying(attempt);
        Ok(ticket)
    }

    /// Apply a matcher result. Returns `None` if `attempt` is no longer the
    /// one being verified.
    pub fn complete_face(&mut self, attempt: AttemptId, result: MatchResult) -> Option<Verdict> {
        let current = self.take_verifying(attempt)?;
        if result.is_match {
            let name = current.identity.as_ref().map(|i| i.display_name.clone());
            Some(self.accept(current, name))
        } else {
            tracing::warn!(attempt, "face mismatch");
            Some(self.reject(current, RejectReason::FaceMismatch))
        }
    }

    /// The matcher never answered for `attempt`.
    pub fn fail_face(&mut self, attempt: AttemptId) -> Option<Verdict> {
        let current = self.take_verifying(attempt)?;
        Some(self.reject(current, RejectReason::MatcherUnavailable))
    }

    /// Check a face attempt against the identity enrolled right now.
    ///
    /// If the identity the attempt was opened with has been reset or
    /// replaced, the attempt is rejected as `NotEnrolled` and that verdict
    /// is returned. Any other state is left alone.
    pub fn recheck_enrollment(&mut self, active: Option<&Identity>) -> Option<Verdict> {
        let attempt = match &self.state {
            SessionState::AwaitingInput(a) | SessionState::Verifying(a)
                if a.method == Method::Face =>
            {
                a.clone()
            }
            _ => return None,
        };
        let still_enrolled = match (&attempt.identity, active) {
            (Some(snapshot), Some(current)) => snapshot.id == current.id,
            _ => false,
        };
        if still_enrolled {
            return None;
        }
        tracing::warn!(attempt = attempt.id, "enrolled identity changed during attempt");
        Some(self.reject(attempt, RejectReason::NotEnrolled))
    }

    /// Send a retryable rejection back to `AwaitingInput` under a fresh attempt id.
    pub fn retry(&mut self) -> Result<AttemptId, SessionError> {
        let SessionState::Rejected { attempt, reason } = &self.state else {
            return Err(SessionError::WrongState(self.state.name()));
        };
        if !reason.is_retryable() {
            return Err(SessionError::NotRetryable(*reason));
        }

        self.last_attempt += 1;
        let next = Attempt {
            id: self.last_attempt,
            ..attempt.clone()
        };
        tracing::info!(previous = attempt.id, attempt = next.id, reason = ?reason, "retrying");
        let id = next.id;
        self.state = SessionState::AwaitingInput(next);
        Ok(id)
    }

    /// Abandon an in-flight attempt. No record is produced. Returns whether
    /// anything was cancelled.
    pub fn cancel(&mut self) -> bool {
        match &self.state {
            SessionState::AwaitingInput(a) | SessionState::Verifying(a) => {
                tracing::info!(attempt = a.id, state = self.state.name(), "attempt cancelled");
                self.state = SessionState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Consume a terminal verdict and return to `Idle`.
    pub fn acknowledge(&mut self) -> Option<Verdict> {
        let verdict = match &self.state {
            SessionState::Accepted(record) => Verdict::Accepted {
                record: record.clone(),
            },
            SessionState::Rejected { reason, .. } => Verdict::Rejected { reason: *reason },
            _ => return None,
        };
        self.state = SessionState::Idle;
        Some(verdict)
    }

    fn take_awaiting(&self, got: Method) -> Result<Attempt, SessionError> {
        match &self.state {
            SessionState::AwaitingInput(a) if a.method == got => Ok(a.clone()),
            SessionState::AwaitingInput(a) => Err(SessionError::MethodMismatch {
                expected: a.method,
                got,
            }),
            other => Err(SessionError::WrongState(other.name())),
        }
    }

    fn take_verifying(&self, attempt: AttemptId) -> Option<Attempt> {
        match &self.state {
            SessionState::Verifying(a) if a.id == attempt => Some(a.clone()),
            _ => {
                tracing::debug!(attempt, state = self.state.name(), "ignoring stale match result");
                None
            }
        }
    }

    fn accept(&mut self, attempt: Attempt, identifier_or_name: Option<String>) -> Verdict {
        let record = AttendanceRecord {
            punch_type: attempt.punch_type,
            method: attempt.method,
            identifier_or_name,
            timestamp: Utc::now(),
            geo_location: attempt.geo_location,
        };
        tracing::info!(attempt = attempt.id, method = %record.method, "attempt accepted");
        self.state = SessionState::Accepted(record.clone());
        Verdict::Accepted { record }
    }

    fn reject(&mut self, attempt: Attempt, reason: RejectReason) -> Verdict {
        tracing::info!(attempt = attempt.id, reason = ?reason, "attempt rejected");
        self.state = SessionState::Rejected { attempt, reason };
        Verdict::Rejected { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{FaceMatcher, FixedMatcher, ScriptedMatcher};
    use chrono::Utc;

    fn identity() -> Identity {
        Identity {
            id: "id-1".into(),
            display_name: "Ana Lopez".into(),
            reference_sample: SampleHandle::new("file:///ref.png"),
            enrolled_at: Utc::now(),
        }
    }

    fn sample() -> CapturedSample {
        CapturedSample {
            handle: SampleHandle::new("file:///capture.png"),
            digest: "ab".into(),
            width: 4,
            height: 4,
            captured_at: Utc::now(),
        }
    }

    fn run_face(session: &mut AttendanceSession, matcher: &dyn FaceMatcher) -> Option<Verdict> {
        let ticket = session.submit_face(sample()).unwrap();
        let result = matcher.compare(&ticket.candidate, &ticket.reference);
        session.complete_face(ticket.attempt, result)
    }

    #[test]
    fn test_manual_accepts_immediately() {
        let mut s = AttendanceSession::new();
        let t = s.begin(PunchType::CheckIn, Method::Manual, None, None).unwrap();
        let Transition::Decided(Verdict::Accepted { record }) = t else {
            panic!("manual punch should be accepted");
        };
        assert_eq!(record.method, Method::Manual);
        assert_eq!(record.identifier_or_name, None);
        assert!(s.acknowledge().unwrap().is_accepted());
        assert_eq!(s.state(), &SessionState::Idle);
    }

    #[test]
    fn test_qr_valid_identifier_accepted() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckOut, Method::Qr, None, None).unwrap();
        let v = s.submit_qr("RUN=12345678-5&type=CEDULA").unwrap();
        let record = v.record().expect("accepted");
        assert_eq!(record.method, Method::Qr);
        assert_eq!(record.punch_type, PunchType::CheckOut);
        assert_eq!(record.identifier_or_name.as_deref(), Some("12345678-5"));
    }

    #[test]
    fn test_qr_without_identifier_rejected_then_retried() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        let v = s.submit_qr("no-id-here").unwrap();
        assert_eq!(v.reason(), Some(RejectReason::InvalidQrFormat));

        s.retry().unwrap();
        assert!(matches!(s.state(), SessionState::AwaitingInput(_)));
        assert!(s.submit_qr("123456785").unwrap().is_accepted());
    }

    #[test]
    fn test_qr_bad_checksum_rejected() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        let v = s.submit_qr("12345678-9").unwrap();
        assert_eq!(v.reason(), Some(RejectReason::InvalidIdentifier));
        assert!(v.record().is_none());
    }

    #[test]
    fn test_face_without_enrollment_rejected_at_begin() {
        let mut s = AttendanceSession::new();
        let t = s.begin(PunchType::CheckIn, Method::Face, None, None).unwrap();
        assert_eq!(
            t,
            Transition::Decided(Verdict::Rejected {
                reason: RejectReason::NotEnrolled
            })
        );
        // no ticket is ever issued, so no matcher can run
        assert!(s.submit_face(sample()).is_err());
        assert_eq!(s.retry(), Err(SessionError::NotRetryable(RejectReason::NotEnrolled)));
    }

    #[test]
    fn test_face_mismatch_never_produces_record() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let v = run_face(&mut s, &FixedMatcher::new(false)).unwrap();
        assert_eq!(v.reason(), Some(RejectReason::FaceMismatch));
        assert!(v.record().is_none());
        let ack = s.acknowledge().unwrap();
        assert!(ack.record().is_none());
    }

    #[test]
    fn test_face_match_uses_display_name() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let v = run_face(&mut s, &FixedMatcher::new(true)).unwrap();
        let record = v.record().unwrap();
        assert_eq!(record.method, Method::Face);
        assert_eq!(record.identifier_or_name.as_deref(), Some("Ana Lopez"));
    }

    #[test]
    fn test_face_retry_after_mismatch_requires_new_capture() {
        let matcher = ScriptedMatcher::new([false, true]);
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        assert!(!run_face(&mut s, &matcher).unwrap().is_accepted());

        s.retry().unwrap();
        // retry waits for input; it never decides on its own
        assert!(matches!(s.state(), SessionState::AwaitingInput(_)));
        assert!(run_face(&mut s, &matcher).unwrap().is_accepted());
        assert_eq!(matcher.calls(), 2);
    }

    #[test]
    fn test_begin_while_busy() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        assert_eq!(
            s.begin(PunchType::CheckIn, Method::Qr, None, None),
            Err(SessionError::SessionBusy)
        );
        s.submit_face(sample()).unwrap();
        assert_eq!(
            s.begin(PunchType::CheckOut, Method::Manual, None, None),
            Err(SessionError::SessionBusy)
        );
    }

    #[test]
    fn test_cancel_awaiting_qr() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        assert!(s.cancel());
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(s.acknowledge().is_none());
        assert_eq!(s.submit_qr("12345678-5"), Err(SessionError::WrongState("idle")));
    }

    #[test]
    fn test_cancel_awaiting_face() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        assert!(s.cancel());
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(s.acknowledge().is_none());
    }

    #[test]
    fn test_cancel_while_verifying_drops_late_result() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let ticket = s.submit_face(sample()).unwrap();
        assert!(s.cancel());

        let late = s.complete_face(ticket.attempt, MatchResult { is_match: true });
        assert!(late.is_none());
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(s.acknowledge().is_none());
    }

    #[test]
    fn test_stale_result_does_not_touch_new_attempt() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let old = s.submit_face(sample()).unwrap();
        s.cancel();

        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let new = s.submit_face(sample()).unwrap();
        assert!(s.complete_face(old.attempt, MatchResult { is_match: true }).is_none());
        assert!(matches!(s.state(), SessionState::Verifying(a) if a.id == new.attempt));
    }

    #[test]
    fn test_cancel_in_idle_or_terminal_is_noop() {
        let mut s = AttendanceSession::new();
        assert!(!s.cancel());
        s.begin(PunchType::CheckIn, Method::Manual, None, None).unwrap();
        assert!(!s.cancel());
        assert!(s.acknowledge().unwrap().is_accepted());
    }

    #[test]
    fn test_method_mismatch() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        assert_eq!(
            s.submit_face(sample()).unwrap_err(),
            SessionError::MethodMismatch {
                expected: Method::Qr,
                got: Method::Face
            }
        );
        // attempt still open
        assert!(s.is_busy());
    }

    #[test]
    fn test_matcher_failure_is_rejection() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let ticket = s.submit_face(sample()).unwrap();
        let v = s.fail_face(ticket.attempt).unwrap();
        assert_eq!(v.reason(), Some(RejectReason::MatcherUnavailable));
        assert!(s.retry().is_ok());
    }

    #[test]
    fn test_geo_location_carried_to_record() {
        let geo = GeoLocation {
            latitude: 1.5,
            longitude: -2.5,
            address: None,
        };
        let mut s = AttendanceSession::new();
        let t = s
            .begin(PunchType::CheckOut, Method::Manual, Some(geo.clone()), None)
            .unwrap();
        let Transition::Decided(v) = t else {
            panic!("manual punch should decide immediately");
        };
        assert_eq!(v.record().unwrap().geo_location.as_ref(), Some(&geo));
    }

    #[test]
    fn test_recheck_after_reset_rejects_face_attempt() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        assert_eq!(s.recheck_enrollment(Some(&identity())), None);
        assert!(matches!(s.state(), SessionState::AwaitingInput(_)));

        let v = s.recheck_enrollment(None).unwrap();
        assert_eq!(v.reason(), Some(RejectReason::NotEnrolled));
        assert!(s.submit_face(sample()).is_err());
        assert_eq!(s.retry(), Err(SessionError::NotRetryable(RejectReason::NotEnrolled)));
    }

    #[test]
    fn test_recheck_while_verifying_drops_match() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Face, None, Some(identity())).unwrap();
        let ticket = s.submit_face(sample()).unwrap();

        let replacement = Identity {
            id: "id-2".into(),
            display_name: "Bob".into(),
            ..identity()
        };
        let v = s.recheck_enrollment(Some(&replacement)).unwrap();
        assert_eq!(v.reason(), Some(RejectReason::NotEnrolled));
        assert_eq!(s.complete_face(ticket.attempt, MatchResult { is_match: true }), None);
    }

    #[test]
    fn test_recheck_ignores_other_methods() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        assert_eq!(s.recheck_enrollment(None), None);
        assert!(matches!(s.state(), SessionState::AwaitingInput(_)));
    }

    #[test]
    fn test_unacknowledged_verdict_discarded_by_next_begin() {
        let mut s = AttendanceSession::new();
        s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        s.submit_qr("garbage").unwrap();
        let t = s.begin(PunchType::CheckIn, Method::Qr, None, None).unwrap();
        assert!(matches!(t, Transition::AwaitingInput(_)));
    }
}
