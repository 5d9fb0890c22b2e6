//! punchclock-store: the device's enrollment record.
//!
//! [`EnrollmentStore`] keeps at most one active [`Identity`](punchclock_core::Identity)
//! on top of any [`KeyValueStore`]; [`SqliteKv`] is the durable backend.

pub mod enrollment;
pub mod kv;

pub use enrollment::{EnrollmentStore, StoreError, IDENTITIES_KEY};
pub use kv::{KeyValueStore, KvError, MemoryKv, SqliteKv};
