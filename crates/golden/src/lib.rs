//! Golden-image harness for the deterministic rendering backend.
//!
//! A case is rendered with the CPU backend and compared byte-wise against a
//! stored baseline. Structural mismatches (dimensions, decode failures) are
//! errors; pixel drift within the case's tolerance is a passing report and
//! drift beyond it a failing one, so a runner can collect every failure
//! instead of stopping at the first.

use std::path::Path;

use model::{Bitmap, BitmapError, InputPoint, RenderOptions};
use renderer::RenderError;

/// Mean-absolute-error budget, normalized to the 0..=1 channel range. Two
/// byte steps of average drift absorbs rounding differences between
/// platforms without hiding real regressions.
pub const DEFAULT_TOLERANCE: f64 = 2.0 / 255.0;

/// One named comparison: a stroke plus everything needed to re-render it.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldenCase {
    pub name: String,
    pub options: RenderOptions,
    pub path: Vec<InputPoint>,
    pub seed: Option<u64>,
    /// Mean-absolute-error budget; `None` uses [`DEFAULT_TOLERANCE`].
    pub tolerance: Option<f64>,
}

/// Outcome of one comparison that structurally succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldenReport {
    pub name: String,
    pub passed: bool,
    /// Average per-channel drift, normalized to 0..=1.
    pub mean_absolute_error: f64,
    /// Largest single-channel drift, in byte units.
    pub max_byte_error: u8,
    pub tolerance: f64,
}

#[derive(Debug)]
pub enum GoldenError {
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    Render(RenderError),
    Bitmap(BitmapError),
    Io(std::io::Error),
    Image(image::ImageError),
}

impl From<RenderError> for GoldenError {
    fn from(error: RenderError) -> Self {
        Self::Render(error)
    }
}

impl From<BitmapError> for GoldenError {
    fn from(error: BitmapError) -> Self {
        Self::Bitmap(error)
    }
}

impl From<std::io::Error> for GoldenError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<image::ImageError> for GoldenError {
    fn from(error: image::ImageError) -> Self {
        Self::Image(error)
    }
}

/// Render a case at baseline dimensions and compare. The baseline's pixel
/// grid wins: the case is re-rendered at the baseline's size with a 1:1
/// pixel ratio so stored images stay authoritative across display scales.
pub fn run_case(case: &GoldenCase, baseline: &Bitmap) -> Result<GoldenReport, GoldenError> {
    let mut options = case.options.clone();
    options.width = baseline.width();
    options.height = baseline.height();
    options.pixel_ratio = 1.0;

    let mut actual = Bitmap::new(baseline.width(), baseline.height())?;
    renderer::render_stroke(&mut actual, &options, &case.path, case.seed)?;
    compare_bitmaps(
        &case.name,
        &actual,
        baseline,
        case.tolerance.unwrap_or(DEFAULT_TOLERANCE),
    )
}

/// Byte-wise comparison of two equally sized bitmaps.
pub fn compare_bitmaps(
    name: &str,
    actual: &Bitmap,
    expected: &Bitmap,
    tolerance: f64,
) -> Result<GoldenReport, GoldenError> {
    if actual.width() != expected.width() || actual.height() != expected.height() {
        return Err(GoldenError::DimensionMismatch {
            expected_width: expected.width(),
            expected_height: expected.height(),
            actual_width: actual.width(),
            actual_height: actual.height(),
        });
    }

    let mut total_error: u64 = 0;
    let mut max_byte_error: u8 = 0;
    for (actual_byte, expected_byte) in actual.pixels().iter().zip(expected.pixels()) {
        let difference = actual_byte.abs_diff(*expected_byte);
        total_error += u64::from(difference);
        max_byte_error = max_byte_error.max(difference);
    }
    let byte_count = actual.pixels().len();
    let mean_absolute_error = if byte_count == 0 {
        0.0
    } else {
        total_error as f64 / byte_count as f64 / 255.0
    };

    Ok(GoldenReport {
        name: name.to_owned(),
        passed: mean_absolute_error <= tolerance,
        mean_absolute_error,
        max_byte_error,
        tolerance,
    })
}

/// Decode a stored PNG baseline into a bitmap.
pub fn load_baseline(path: &Path) -> Result<Bitmap, GoldenError> {
    let decoded = image::ImageReader::open(path)?.decode()?.to_rgba8();
    let width = decoded.width();
    let height = decoded.height();
    Ok(Bitmap::from_pixels(width, height, decoded.into_raw())?)
}

/// Encode a rendered bitmap as a PNG baseline.
pub fn save_baseline(path: &Path, bitmap: &Bitmap) -> Result<(), GoldenError> {
    let encoded = image::RgbaImage::from_raw(
        bitmap.width(),
        bitmap.height(),
        bitmap.pixels().to_vec(),
    )
    .expect("bitmap length matches its dimensions");
    encoded.save(path)?;
    Ok(())
}
