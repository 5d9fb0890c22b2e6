//! punchclock-device: adapters for what the device supplies to a punch.
//!
//! Face captures arrive as image files and become
//! [`CapturedSample`](punchclock_core::CapturedSample)s; positions come from a
//! [`LocationProvider`].

pub mod location;
pub mod sample;

pub use location::{DeniedLocation, FixedLocation, LocationError, LocationProvider, NoLocation};
pub use sample::{load_sample, SampleError};
