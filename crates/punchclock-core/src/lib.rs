//! punchclock-core: attendance verification decision engine.
//!
//! Validates identity numbers, extracts them from scanned card payloads,
//! defines the face matcher capability and drives each punch attempt
//! through the [`AttendanceSession`] state machine.

pub mod identifier;
pub mod matcher;
pub mod qr;
pub mod session;
pub mod types;

pub use matcher::{FaceMatcher, MatchResult};
pub use session::{AttendanceSession, AttemptId, FaceTicket, SessionError, SessionState, Transition};
pub use types::{
    Address, AttendanceRecord, CapturedSample, GeoLocation, Identity, Method, PunchType,
    RejectReason, SampleHandle, Verdict,
};
