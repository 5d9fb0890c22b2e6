//! Attendance service: ties the session to enrollment, the matcher thread
//! and the location provider.
//!
//! The presentation layer calls in with raw events (a punch selection, scan
//! text, a captured face) and gets verdicts back. Scan and checksum
//! failures surface as rejected verdicts, not errors; errors are reserved
//! for misuse (`SessionBusy`, wrong state) and storage failures on writes.

use crate::config::Config;
use crate::engine::{spawn_engine, EngineError, MatchHandle};
use punchclock_core::{
    AttemptId, AttendanceSession, CapturedSample, GeoLocation, Identity, Method, PunchType,
    SessionError, SessionState, Transition, Verdict,
};
use punchclock_device::{FixedLocation, LocationProvider, NoLocation};
use punchclock_store::{EnrollmentStore, KvError, SqliteKv, StoreError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("open enrollment database: {0}")]
    Database(#[from] KvError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct AttendanceService {
    session: Mutex<AttendanceSession>,
    /// `Some(cancelled)` while `begin` waits on the location lookup.
    opening: Mutex<Option<bool>>,
    store: EnrollmentStore,
    engine: MatchHandle,
    location: Arc<dyn LocationProvider>,
    verify_timeout: Duration,
    location_timeout: Duration,
}

impl AttendanceService {
    pub fn new(
        store: EnrollmentStore,
        engine: MatchHandle,
        location: Arc<dyn LocationProvider>,
        verify_timeout: Duration,
        location_timeout: Duration,
    ) -> Self {
        Self {
            session: Mutex::new(AttendanceSession::new()),
            opening: Mutex::new(None),
            store,
            engine,
            location,
            verify_timeout,
            location_timeout,
        }
    }

    /// Open the database, build the matcher and location provider, spawn
    /// the matcher thread.
    ///
    /// A bad location file is logged and replaced by "no location"; the
    /// database and the matcher thread are required.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let store = EnrollmentStore::open(SqliteKv::open(&config.db_path)?);

        let matcher = config.build_matcher();
        tracing::info!(matcher = matcher.name(), "face matcher selected");
        let engine = spawn_engine(matcher)?;

        let location: Arc<dyn LocationProvider> = match &config.location_file {
            Some(path) => match FixedLocation::load(path) {
                Ok(fixed) => Arc::new(fixed),
                Err(e) => {
                    tracing::warn!(error = %e, "location file unusable; punching without location");
                    Arc::new(NoLocation)
                }
            },
            None => Arc::new(NoLocation),
        };

        Ok(Self::new(
            store,
            engine,
            location,
            config.verify_timeout(),
            config.location_timeout(),
        ))
    }

    /// Start a punch attempt. Location is looked up first and attached if
    /// available; its absence never blocks the punch.
    ///
    /// The service counts as busy while the lookup runs. Returns `Ok(None)`
    /// if [`cancel`](Self::cancel) was called during that wait.
    pub async fn begin(
        &self,
        punch_type: PunchType,
        method: Method,
    ) -> Result<Option<Transition>, ServiceError> {
        let opening = {
            let session = self.lock_session();
            let mut slot = lock(&self.opening);
            if session.is_busy() || slot.is_some() {
                return Err(SessionError::SessionBusy.into());
            }
            *slot = Some(false);
            OpeningGuard { slot: &self.opening }
        };

        let geo = self.locate().await;
        let enrolled = self.store.active();

        let mut session = self.lock_session();
        if opening.cancelled() {
            tracing::info!(method = %method, "punch cancelled during location lookup");
            return Ok(None);
        }
        let transition = session.begin(punch_type, method, geo, enrolled)?;
        Ok(Some(transition))
    }

    /// Decide a QR attempt from raw scan text.
    pub fn submit_qr(&self, payload: &str) -> Result<Verdict, ServiceError> {
        Ok(self.lock_session().submit_qr(payload)?)
    }

    /// Verify a captured face against the enrolled identity.
    ///
    /// Returns `Ok(None)` if the attempt was cancelled while the matcher was
    /// running; the late answer is dropped.
    pub async fn submit_face(
        &self,
        candidate: CapturedSample,
    ) -> Result<Option<Verdict>, ServiceError> {
        let ticket = {
            let active = self.store.active();
            let mut session = self.lock_session();
            if let Some(verdict) = session.recheck_enrollment(active.as_ref()) {
                return Ok(Some(verdict));
            }
            session.submit_face(candidate)?
        };
        tracing::info!(attempt = ticket.attempt, name = %ticket.display_name, "verifying face");

        let outcome = tokio::time::timeout(
            self.verify_timeout,
            self.engine
                .compare(ticket.candidate.clone(), ticket.reference.clone()),
        )
        .await;

        let active = self.store.active();
        let mut session = self.lock_session();
        if session.is_verifying(ticket.attempt) {
            if let Some(verdict) = session.recheck_enrollment(active.as_ref()) {
                return Ok(Some(verdict));
            }
        }
        let verdict = match outcome {
            Ok(Ok(result)) => session.complete_face(ticket.attempt, result),
            Ok(Err(e)) => {
                tracing::error!(attempt = ticket.attempt, error = %e, "matcher unavailable");
                session.fail_face(ticket.attempt)
            }
            Err(_) => {
                tracing::warn!(
                    attempt = ticket.attempt,
                    timeout_secs = self.verify_timeout.as_secs_f32(),
                    "face verification timed out"
                );
                session.fail_face(ticket.attempt)
            }
        };
        Ok(verdict)
    }

    pub fn retry(&self) -> Result<AttemptId, ServiceError> {
        Ok(self.lock_session().retry()?)
    }

    /// Abandon the current attempt, or a `begin` still waiting on location.
    pub fn cancel(&self) -> bool {
        let mut session = self.lock_session();
        if session.cancel() {
            return true;
        }
        let mut slot = lock(&self.opening);
        match slot.as_mut() {
            Some(cancelled) if !*cancelled => {
                *cancelled = true;
                tracing::info!("pending punch cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn acknowledge(&self) -> Option<Verdict> {
        self.lock_session().acknowledge()
    }

    pub fn state(&self) -> SessionState {
        self.lock_session().state().clone()
    }

    pub fn enroll(
        &self,
        sample: &CapturedSample,
        display_name: &str,
    ) -> Result<Identity, ServiceError> {
        Ok(self.store.enroll(sample, display_name)?)
    }

    pub fn reset(&self) -> Result<(), ServiceError> {
        Ok(self.store.reset()?)
    }

    pub fn active_identity(&self) -> Option<Identity> {
        self.store.active()
    }

    async fn locate(&self) -> Option<GeoLocation> {
        let provider = Arc::clone(&self.location);
        let lookup = tokio::task::spawn_blocking(move || provider.locate());
        match tokio::time::timeout(self.location_timeout, lookup).await {
            Ok(Ok(Ok(geo))) => Some(geo),
            Ok(Ok(Err(e))) => {
                tracing::info!(error = %e, "punching without location");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "location lookup task failed");
                None
            }
            Err(_) => {
                tracing::warn!("location lookup timed out");
                None
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, AttendanceSession> {
        lock(&self.session)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks a `begin` in progress; clears the mark however `begin` exits.
struct OpeningGuard<'a> {
    slot: &'a Mutex<Option<bool>>,
}

impl OpeningGuard<'_> {
    fn cancelled(&self) -> bool {
        lock(self.slot).unwrap_or(false)
    }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}
