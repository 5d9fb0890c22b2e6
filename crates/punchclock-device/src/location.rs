//! Location providers.
//!
//! Geo data only decorates a record; callers treat any [`LocationError`]
//! as "no location" and carry on. A fixed provider reads its position from
//! a TOML file for kiosks mounted in one place:
//!
//! ```toml
//! [position]
//! latitude = -33.4489
//! longitude = -70.6693
//!
//! [address]
//! street = "Alameda"
//! street_number = "1234"
//! city = "Santiago"
//! ```

use punchclock_core::{Address, GeoLocation};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the device position on demand. May block.
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> Result<GeoLocation, LocationError>;
}

/// Top-level location file structure.
#[derive(Debug, Clone, Deserialize)]
struct LocationFile {
    position: Position,
    address: Option<AddressSection>,
}

/// `[position]` section.
#[derive(Debug, Clone, Deserialize)]
struct Position {
    latitude: f64,
    longitude: f64,
}

/// `[address]` section; every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct AddressSection {
    street: Option<String>,
    street_number: Option<String>,
    city: Option<String>,
}

/// Always reports the same configured position.
#[derive(Debug, Clone)]
pub struct FixedLocation {
    location: GeoLocation,
}

impl FixedLocation {
    pub fn new(location: GeoLocation) -> Self {
        Self { location }
    }

    /// Parse a location file's contents.
    pub fn from_toml(src: &str) -> Result<Self, LocationError> {
        let file: LocationFile = toml::from_str(src)
            .map_err(|e| LocationError::Unavailable(format!("bad location file: {e}")))?;

        let Position {
            latitude,
            longitude,
        } = file.position;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::Unavailable(format!(
                "coordinates out of range: {latitude}, {longitude}"
            )));
        }

        let address = file.address.map(|a| Address {
            street: a.street,
            street_number: a.street_number,
            city: a.city,
        });
        Ok(Self::new(GeoLocation {
            latitude,
            longitude,
            address,
        }))
    }

    /// Read and parse a location file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LocationError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|e| LocationError::Unavailable(format!("{}: {e}", path.display())))?;
        let provider = Self::from_toml(&src)?;
        tracing::info!(
            path = %path.display(),
            latitude = provider.location.latitude,
            longitude = provider.location.longitude,
            "fixed location loaded"
        );
        Ok(provider)
    }
}

impl LocationProvider for FixedLocation {
    fn locate(&self) -> Result<GeoLocation, LocationError> {
        Ok(self.location.clone())
    }
}

/// No positioning on this device.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn locate(&self) -> Result<GeoLocation, LocationError> {
        Err(LocationError::Unavailable("no location provider configured".into()))
    }
}

/// Permission was refused by the user.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedLocation;

impl LocationProvider for DeniedLocation {
    fn locate(&self) -> Result<GeoLocation, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}
