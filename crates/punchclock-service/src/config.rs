use punchclock_core::matcher::{
    DelayedMatcher, DenyAllMatcher, FaceMatcher, FixedMatcher, RandomMatcher,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which face matcher backs verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// Reject every face. Default until a real backend exists.
    Deny,
    /// Accept every face. Demos only.
    Accept,
    /// Coin flip with `match_probability`.
    Random,
}

impl FromStr for MatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deny" => Ok(MatcherKind::Deny),
            "accept" => Ok(MatcherKind::Accept),
            "random" => Ok(MatcherKind::Random),
            other => Err(format!("unknown matcher: {other}")),
        }
    }
}

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite enrollment database.
    pub db_path: PathBuf,
    /// Seconds to wait for a face match before rejecting the attempt.
    pub verify_timeout_secs: u64,
    /// Seconds to wait for a location fix before punching without one.
    pub location_timeout_secs: u64,
    /// Face matcher backend.
    pub matcher: MatcherKind,
    /// Match probability for [`MatcherKind::Random`].
    pub match_probability: f64,
    /// Artificial matcher latency in milliseconds.
    pub match_delay_ms: u64,
    /// Optional TOML file for a fixed device location.
    pub location_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `PUNCHCLOCK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("punchclock");

        let db_path = var("PUNCHCLOCK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("enrollment.db"));

        let matcher = match var("PUNCHCLOCK_MATCHER") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "falling back to deny matcher");
                MatcherKind::Deny
            }),
            None => MatcherKind::Deny,
        };

        Self {
            db_path,
            verify_timeout_secs: parsed(&var, "PUNCHCLOCK_VERIFY_TIMEOUT_SECS", 10),
            location_timeout_secs: parsed(&var, "PUNCHCLOCK_LOCATION_TIMEOUT_SECS", 5),
            matcher,
            match_probability: parsed(&var, "PUNCHCLOCK_MATCH_PROBABILITY", 0.5),
            match_delay_ms: parsed(&var, "PUNCHCLOCK_MATCH_DELAY_MS", 0),
            location_file: var("PUNCHCLOCK_LOCATION_FILE").map(PathBuf::from),
        }
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    /// Build the configured face matcher.
    pub fn build_matcher(&self) -> Arc<dyn FaceMatcher> {
        let delay = Duration::from_millis(self.match_delay_ms);
        match self.matcher {
            MatcherKind::Deny => with_delay(DenyAllMatcher, delay),
            MatcherKind::Accept => with_delay(FixedMatcher::new(true), delay),
            MatcherKind::Random => with_delay(RandomMatcher::new(self.match_probability), delay),
        }
    }
}

fn with_delay<M: FaceMatcher + 'static>(matcher: M, delay: Duration) -> Arc<dyn FaceMatcher> {
    if delay.is_zero() {
        Arc::new(matcher)
    } else {
        Arc::new(DelayedMatcher::new(matcher, delay))
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
