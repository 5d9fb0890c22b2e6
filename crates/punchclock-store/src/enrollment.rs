use crate::kv::{KeyValueStore, KvError};
use chrono::Utc;
use punchclock_core::{CapturedSample, Identity};
use std::sync::Mutex;
use thiserror::Error;

/// Key under which the enrolled identities are stored, as a JSON array.
pub const IDENTITIES_KEY: &str = "enrolled_identities";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid enrollment: {0}")]
    Validation(String),
    #[error("storage: {0}")]
    Storage(#[from] KvError),
    #[error("serialize identities: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Enrolled identities for this device.
///
/// Shaped as a collection, but enrollment replaces the whole set and only
/// the first element is treated as the active identity. All mutations hold
/// the write lock for their full duration and write through to the backend
/// before updating memory.
pub struct EnrollmentStore {
    backend: Box<dyn KeyValueStore>,
    identities: Mutex<Vec<Identity>>,
}

impl EnrollmentStore {
    /// Load enrolled identities from `backend`.
    ///
    /// Never fails: an unreadable backend or a corrupt record leaves the
    /// device not enrolled.
    pub fn open(backend: impl KeyValueStore + 'static) -> Self {
        let identities = load(&backend);
        match identities.first() {
            Some(active) => tracing::info!(
                id = %active.id,
                name = %active.display_name,
                total = identities.len(),
                "enrollment loaded"
            ),
            None => tracing::info!("no identity enrolled"),
        }
        Self {
            backend: Box::new(backend),
            identities: Mutex::new(identities),
        }
    }

    /// Enroll `sample` under `display_name`, replacing any active identity.
    pub fn enroll(
        &self,
        sample: &CapturedSample,
        display_name: &str,
    ) -> Result<Identity, StoreError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(StoreError::Validation("display name is empty".into()));
        }

        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            reference_sample: sample.handle.clone(),
            enrolled_at: Utc::now(),
        };

        let mut identities = self.lock();
        let next = vec![identity.clone()];
        let json = serde_json::to_string(&next)?;
        self.backend.put(IDENTITIES_KEY, &json)?;
        let replaced = std::mem::replace(&mut *identities, next);

        tracing::info!(
            id = %identity.id,
            name = %identity.display_name,
            replaced = replaced.len(),
            "identity enrolled"
        );
        tracing::debug!(reference = %identity.reference_sample, "reference sample stored");
        Ok(identity)
    }

    /// The active identity, if any.
    pub fn active(&self) -> Option<Identity> {
        self.lock().first().cloned()
    }

    /// All stored identities; the first is the active one.
    pub fn identities(&self) -> Vec<Identity> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Identity> {
        self.lock().iter().find(|i| i.id == id).cloned()
    }

    /// Remove every enrolled identity. Idempotent.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut identities = self.lock();
        self.backend.delete(IDENTITIES_KEY)?;
        let removed = identities.len();
        identities.clear();
        tracing::info!(removed, "enrollment reset");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Identity>> {
        self.identities.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load(backend: &dyn KeyValueStore) -> Vec<Identity> {
    let raw = match backend.get(IDENTITIES_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, "enrollment storage unreadable; starting not enrolled");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<Identity>>(&raw) {
        Ok(identities) => identities,
        Err(e) => {
            tracing::warn!(error = %e, "enrollment record corrupt; starting not enrolled");
            Vec::new()
        }
    }
}
