use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder rendered for address parts the geocoder did not resolve.
const UNAVAILABLE: &str = "unavailable";

/// Direction of a punch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PunchType {
    CheckIn,
    CheckOut,
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PunchType::CheckIn => f.write_str("check-in"),
            PunchType::CheckOut => f.write_str("check-out"),
        }
    }
}

impl FromStr for PunchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "check-in" | "checkin" => Ok(PunchType::CheckIn),
            "out" | "check-out" | "checkout" => Ok(PunchType::CheckOut),
            other => Err(format!("unknown punch type: {other}")),
        }
    }
}

/// How the punch was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Manual,
    Qr,
    Face,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Manual => f.write_str("manual"),
            Method::Qr => f.write_str("qr"),
            Method::Face => f.write_str("face"),
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Method::Manual),
            "qr" => Ok(Method::Qr),
            "face" => Ok(Method::Face),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Opaque reference to a captured image (a file path, a content URI, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleHandle(String);

impl SampleHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A just-acquired face image. Lives for one verification attempt, or
/// becomes the reference sample of an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedSample {
    pub handle: SampleHandle,
    /// Lowercase hex SHA-256 of the decoded grayscale pixels.
    pub digest: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// The identity enrolled on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub reference_sample: SampleHandle,
    pub enrolled_at: DateTime<Utc>,
}

/// Reverse-geocoded address. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub city: Option<String>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: &Option<String>| p.clone().unwrap_or_else(|| UNAVAILABLE.to_string());
        write!(
            f,
            "{} {}, {}",
            part(&self.street),
            part(&self.street_number),
            part(&self.city)
        )
    }
}

/// Advisory position attached to a record for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<Address>,
}

/// A successful punch. Handed to the caller; never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub punch_type: PunchType,
    pub method: Method,
    /// Identity number for QR punches, display name for face punches.
    pub identifier_or_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub geo_location: Option<GeoLocation>,
}

impl AttendanceRecord {
    /// Multi-line message suitable for a confirmation dialog.
    pub fn summary(&self) -> String {
        let local = self.timestamp.with_timezone(&Local);
        let mut lines = vec![
            format!("type: {}", self.punch_type),
            format!("method: {}", self.method),
        ];
        if let Some(who) = &self.identifier_or_name {
            lines.push(format!("who: {who}"));
        }
        lines.push(format!("time: {}", local.format("%Y-%m-%d %H:%M:%S")));
        match &self.geo_location {
            Some(geo) => {
                let address = geo.address.clone().unwrap_or_default();
                lines.push(format!("address: {address}"));
                lines.push(format!("latitude: {}", geo.latitude));
                lines.push(format!("longitude: {}", geo.longitude));
            }
            None => lines.push(format!("location: {UNAVAILABLE}")),
        }
        lines.join("\n")
    }
}

/// Why an attempt was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Scan text held nothing shaped like an identity number.
    InvalidQrFormat,
    /// Identity number failed the checksum.
    InvalidIdentifier,
    /// Face punch requested with nobody enrolled.
    NotEnrolled,
    /// Captured face did not match the enrolled reference.
    FaceMismatch,
    /// The matcher never answered (engine gone or timed out).
    MatcherUnavailable,
}

impl RejectReason {
    /// Whether the same attempt may go back to awaiting input.
    pub fn is_retryable(self) -> bool {
        !matches!(self, RejectReason::NotEnrolled)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RejectReason::InvalidQrFormat => "no identity number found in scan",
            RejectReason::InvalidIdentifier => "identity number failed checksum",
            RejectReason::NotEnrolled => "no face enrolled on this device",
            RejectReason::FaceMismatch => "face does not match enrolled identity",
            RejectReason::MatcherUnavailable => "face matcher unavailable",
        };
        f.write_str(msg)
    }
}

/// Terminal outcome of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { record: AttendanceRecord },
    Rejected { reason: RejectReason },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    pub fn record(&self) -> Option<&AttendanceRecord> {
        match self {
            Verdict::Accepted { record } => Some(record),
            Verdict::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Accepted { .. } => None,
            Verdict::Rejected { reason } => Some(*reason),
        }
    }
}
