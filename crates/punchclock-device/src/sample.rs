//! Captured face samples: decode, grayscale, dark detection, digest.

use chrono::Utc;
use punchclock_core::{CapturedSample, SampleHandle};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

/// Share of near-black pixels above which a capture is considered dark.
const DARK_THRESHOLD_PCT: f32 = 0.95;
/// Luma values below this count as near-black.
const DARK_PIXEL_MAX: u8 = 32;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("sample not found: {0}")]
    NotFound(String),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
    #[error("pixel buffer is {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("capture too dark to use")]
    TooDark,
}

/// Load a capture from an image file (camera roll, gallery pick, test fixture).
pub fn load_sample(path: impl AsRef<Path>) -> Result<CapturedSample, SampleError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SampleError::NotFound(path.display().to_string()));
    }

    let luma = image::open(path)?.to_luma8();
    let (width, height) = luma.dimensions();
    let handle = SampleHandle::new(path.display().to_string());
    let sample = from_luma(handle, luma.as_raw(), width, height)?;
    tracing::debug!(
        path = %path.display(),
        width,
        height,
        brightness = avg_brightness(luma.as_raw()),
        "sample loaded"
    );
    Ok(sample)
}

/// Build a sample from an 8-bit grayscale buffer (`width * height` bytes).
pub fn from_luma(
    handle: SampleHandle,
    gray: &[u8],
    width: u32,
    height: u32,
) -> Result<CapturedSample, SampleError> {
    let expected = width as usize * height as usize;
    if expected == 0 {
        return Err(SampleError::Empty);
    }
    if gray.len() != expected {
        return Err(SampleError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    if is_dark(gray, DARK_THRESHOLD_PCT) {
        return Err(SampleError::TooDark);
    }

    Ok(CapturedSample {
        handle,
        digest: digest(gray),
        width,
        height,
        captured_at: Utc::now(),
    })
}

/// Average pixel brightness (0.0–255.0).
pub fn avg_brightness(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
}

/// True if more than `threshold_pct` of pixels are near-black.
pub fn is_dark(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_MAX).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

fn digest(gray: &[u8]) -> String {
    Sha256::digest(gray)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
