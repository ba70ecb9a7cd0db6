//! Shared data model for the stroke rendering core.
//!
//! Everything in this crate is plain, copy-safe data: it crosses the worker
//! channel boundary by value and never carries GPU or thread handles.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerKind {
    Mouse,
    Pen,
    Touch,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokePhase {
    Start,
    Move,
    End,
    Cancel,
}

/// One normalized point of a stroke path.
///
/// `pressure`, `tilt` and `speed` are normalized to [0, 1] (`tilt` 1 means the
/// stylus is fully upright); `heading` is degrees in [0, 360). Points are
/// append-only: once recorded by the tracker they are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputPoint {
    pub x: f32,
    pub y: f32,
    pub time_ms: f64,
    pub pressure: f32,
    pub tilt: f32,
    pub heading: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorRgba {
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrushShape {
    Round,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValidationError {
    SpacingOutOfRange,
    HardnessOutOfRange,
    FlowOutOfRange,
    ScatterOutOfRange,
    SizeJitterOutOfRange,
}

/// Brush parameters consumed by the rendering backend.
///
/// Owned by the caller and passed by value into each render call; the
/// renderer never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub shape: BrushShape,
    /// Dab spacing as a fraction of the dab diameter.
    pub spacing: f32,
    /// Edge falloff, 0 soft to 1 hard.
    pub hardness: f32,
    /// Per-dab opacity, 0 to 1.
    pub flow: f32,
    /// Random positional offset per dab, as a fraction of the dab radius.
    pub scatter: f32,
    /// Random per-dab size variation, 0 to 1.
    pub size_jitter: f32,
    pub pressure_affects_size: bool,
    pub pressure_affects_flow: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shape: BrushShape::Round,
            spacing: 0.25,
            hardness: 0.8,
            flow: 1.0,
            scatter: 0.0,
            size_jitter: 0.0,
            pressure_affects_size: true,
            pressure_affects_flow: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.spacing.is_finite() || self.spacing <= 0.0 || self.spacing > 4.0 {
            return Err(ConfigValidationError::SpacingOutOfRange);
        }
        if !self.hardness.is_finite() || !(0.0..=1.0).contains(&self.hardness) {
            return Err(ConfigValidationError::HardnessOutOfRange);
        }
        if !self.flow.is_finite() || !(0.0..=1.0).contains(&self.flow) {
            return Err(ConfigValidationError::FlowOutOfRange);
        }
        if !self.scatter.is_finite() || !(0.0..=4.0).contains(&self.scatter) {
            return Err(ConfigValidationError::ScatterOutOfRange);
        }
        if !self.size_jitter.is_finite() || !(0.0..=1.0).contains(&self.size_jitter) {
            return Err(ConfigValidationError::SizeJitterOutOfRange);
        }
        Ok(())
    }
}

/// Per-call overrides applied on top of an [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderOverrides {
    pub size: Option<f32>,
    pub color: Option<ColorRgba>,
    pub flow: Option<f32>,
}

/// Optional GPU post-processing applied after rasterization.
///
/// Skipped wholesale when no shader-capable surface exists; that is a
/// capability-absent case, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PostProcess {
    /// Gaussian-style blur strength hint; `None` disables the blur pass.
    pub blur_sigma: Option<f32>,
    /// Derive a tangent-space normal map from the rendered output.
    pub extract_normal_map: bool,
}

impl PostProcess {
    pub fn is_noop(&self) -> bool {
        self.blur_sigma.is_none() && !self.extract_normal_map
    }
}

/// The full, self-contained input of one render call. The stroke path and the
/// determinism seed travel beside it on the wire (they are per-stroke, not
/// per-brush).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub config: EngineConfig,
    pub overrides: RenderOverrides,
    /// Brush diameter in surface units before pressure response.
    pub base_size: f32,
    pub color: ColorRgba,
    /// Logical surface size in surface units.
    pub width: u32,
    pub height: u32,
    /// Pixels per surface unit.
    pub pixel_ratio: f32,
    pub post_process: Option<PostProcess>,
}

impl RenderOptions {
    /// Effective dab diameter after overrides, in surface units.
    pub fn effective_size(&self) -> f32 {
        self.overrides.size.unwrap_or(self.base_size)
    }

    pub fn effective_color(&self) -> ColorRgba {
        self.overrides.color.unwrap_or(self.color)
    }

    pub fn effective_flow(&self) -> f32 {
        self.overrides.flow.unwrap_or(self.config.flow)
    }

    pub fn pixel_width(&self) -> u32 {
        scaled_dimension(self.width, self.pixel_ratio)
    }

    pub fn pixel_height(&self) -> u32 {
        scaled_dimension(self.height, self.pixel_ratio)
    }
}

/// Scale a logical dimension by a pixel ratio, never collapsing below one
/// pixel.
pub fn scaled_dimension(logical: u32, pixel_ratio: f32) -> u32 {
    let scaled = (logical as f64 * pixel_ratio as f64).round();
    if scaled < 1.0 { 1 } else { scaled as u32 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapError {
    PixelLengthMismatch {
        expected_len: usize,
        actual_len: usize,
    },
    ZeroDimension,
    RegionOutOfBounds,
}

/// An RGBA8 raster surface with exclusively owned backing memory.
///
/// Moving a `Bitmap` across the worker channel is the transferable-bitmap
/// handoff: ownership of the pixel buffer moves with it and the sender holds
/// nothing afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Result<Self, BitmapError> {
        if width == 0 || height == 0 {
            return Err(BitmapError::ZeroDimension);
        }
        let len = byte_len(width, height);
        Ok(Self {
            width,
            height,
            pixels: vec![0; len],
        })
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, BitmapError> {
        if width == 0 || height == 0 {
            return Err(BitmapError::ZeroDimension);
        }
        let expected_len = byte_len(width, height);
        if pixels.len() != expected_len {
            return Err(BitmapError::PixelLengthMismatch {
                expected_len,
                actual_len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Result<[u8; 4], BitmapError> {
        if x >= self.width || y >= self.height {
            return Err(BitmapError::RegionOutOfBounds);
        }
        let offset = pixel_offset(self.width, x, y);
        Ok([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ])
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) -> Result<(), BitmapError> {
        if x >= self.width || y >= self.height {
            return Err(BitmapError::RegionOutOfBounds);
        }
        let offset = pixel_offset(self.width, x, y);
        self.pixels[offset..offset + 4].copy_from_slice(&rgba);
        Ok(())
    }

    /// Replace this bitmap's contents with `source`, resizing the backing
    /// buffer if the dimensions differ.
    pub fn copy_from(&mut self, source: &Bitmap) {
        self.width = source.width;
        self.height = source.height;
        self.pixels.clear();
        self.pixels.extend_from_slice(&source.pixels);
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|area| area.checked_mul(4))
        .expect("bitmap byte length overflow")
}

fn pixel_offset(width: u32, x: u32, y: u32) -> usize {
    (y as usize)
        .checked_mul(width as usize)
        .and_then(|row| row.checked_add(x as usize))
        .and_then(|index| index.checked_mul(4))
        .expect("bitmap pixel offset overflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_rejects_mismatched_pixel_length() {
        let error = Bitmap::from_pixels(4, 4, vec![0; 60]).expect_err("length mismatch");
        assert_eq!(
            error,
            BitmapError::PixelLengthMismatch {
                expected_len: 64,
                actual_len: 60,
            }
        );
    }

    #[test]
    fn bitmap_rejects_zero_dimensions() {
        let error = Bitmap::new(0, 16).expect_err("zero width");
        assert_eq!(error, BitmapError::ZeroDimension);
    }

    #[test]
    fn bitmap_pixel_round_trip() {
        let mut bitmap = Bitmap::new(8, 8).expect("create bitmap");
        bitmap
            .put_pixel(3, 5, [10, 20, 30, 255])
            .expect("put pixel");
        assert_eq!(bitmap.pixel(3, 5).expect("read pixel"), [10, 20, 30, 255]);
        assert_eq!(bitmap.pixel(0, 0).expect("read pixel"), [0, 0, 0, 0]);
    }

    #[test]
    fn bitmap_rejects_out_of_bounds_access() {
        let bitmap = Bitmap::new(8, 8).expect("create bitmap");
        assert_eq!(
            bitmap.pixel(8, 0).expect_err("x out of bounds"),
            BitmapError::RegionOutOfBounds
        );
    }

    #[test]
    fn default_engine_config_is_valid() {
        EngineConfig::default()
            .validate()
            .expect("default config must validate");
    }

    #[test]
    fn validate_rejects_non_positive_spacing() {
        let config = EngineConfig {
            spacing: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate().expect_err("zero spacing should fail"),
            ConfigValidationError::SpacingOutOfRange
        );
    }

    #[test]
    fn validate_rejects_non_finite_hardness() {
        let config = EngineConfig {
            hardness: f32::NAN,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate().expect_err("nan hardness should fail"),
            ConfigValidationError::HardnessOutOfRange
        );
    }

    #[test]
    fn overrides_take_precedence_over_base_values() {
        let options = RenderOptions {
            config: EngineConfig::default(),
            overrides: RenderOverrides {
                size: Some(24.0),
                color: None,
                flow: Some(0.5),
            },
            base_size: 12.0,
            color: ColorRgba::BLACK,
            width: 100,
            height: 50,
            pixel_ratio: 2.0,
            post_process: None,
        };
        assert_eq!(options.effective_size(), 24.0);
        assert_eq!(options.effective_flow(), 0.5);
        assert_eq!(options.effective_color(), ColorRgba::BLACK);
        assert_eq!(options.pixel_width(), 200);
        assert_eq!(options.pixel_height(), 100);
    }
}
