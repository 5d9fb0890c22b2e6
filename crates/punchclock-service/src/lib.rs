//! punchclock-service: runs attendance attempts for the presentation layer.

pub mod config;
pub mod engine;
pub mod service;

pub use config::{Config, MatcherKind};
pub use engine::{spawn_engine, EngineError, MatchHandle};
pub use service::{AttendanceService, ServiceError};
