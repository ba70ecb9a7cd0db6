//! CPU rendering backend.
//!
//! Rasterizes one stroke (a path plus [`RenderOptions`]) into a caller-owned
//! [`Bitmap`] by stamping dabs along the path at spacing proportional to the
//! dab diameter. All math runs in one code path with an explicit jitter
//! stream, so the same seed, path and config produce byte-identical output.

mod rng;

use model::{Bitmap, BrushShape, ColorRgba, ConfigValidationError, InputPoint, RenderOptions};
use rng::Pcg32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    Config(ConfigValidationError),
    BaseSizeInvalid,
    PixelRatioInvalid,
}

impl From<ConfigValidationError> for RenderError {
    fn from(error: ConfigValidationError) -> Self {
        Self::Config(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub dab_count: usize,
}

/// One dab placement after resampling and jitter, in pixel coordinates.
#[derive(Debug, Clone, Copy)]
struct DabPlacement {
    center_x: f32,
    center_y: f32,
    radius: f32,
    alpha: f32,
    heading_degrees: f32,
}

/// Rasterize one stroke into `target`.
///
/// An empty path is not an error: the target is cleared to transparent black
/// as the backend's placeholder fill. The path slice is only read during the
/// call; nothing is retained.
pub fn render_stroke(
    target: &mut Bitmap,
    options: &RenderOptions,
    path: &[InputPoint],
    seed: Option<u64>,
) -> Result<RenderStats, RenderError> {
    options.config.validate()?;
    let size = options.effective_size();
    if !size.is_finite() || size <= 0.0 {
        return Err(RenderError::BaseSizeInvalid);
    }
    if !options.pixel_ratio.is_finite() || options.pixel_ratio <= 0.0 {
        return Err(RenderError::PixelRatioInvalid);
    }

    target.clear();
    if path.is_empty() {
        return Ok(RenderStats::default());
    }

    let color = options.effective_color();
    let placements = place_dabs(options, path, seed.unwrap_or(0));
    for placement in &placements {
        stamp_dab(target, placement, color, options);
    }
    Ok(RenderStats {
        dab_count: placements.len(),
    })
}

/// Walk the path and emit one dab every `spacing * diameter` surface units,
/// interpolating pressure between recorded points. Mirrors the carry-distance
/// resampling loop used for stroke sampling on the input side.
fn place_dabs(options: &RenderOptions, path: &[InputPoint], seed: u64) -> Vec<DabPlacement> {
    let config = &options.config;
    let diameter = options.effective_size();
    let spacing_units = (config.spacing * diameter).max(0.05);
    let flow = options.effective_flow();
    let pixel_ratio = options.pixel_ratio;

    let mut placements = Vec::new();
    let mut dab_index: u64 = 0;
    let mut emit = |point_x: f32, point_y: f32, pressure: f32, heading: f32| {
        let mut rng = Pcg32::new(dab_index, seed);
        dab_index += 1;

        let size_factor = if config.pressure_affects_size {
            0.25 + 0.75 * pressure.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let jitter_factor = if config.size_jitter > 0.0 {
            (1.0 + config.size_jitter * rng.next_signed_f32()).max(0.05)
        } else {
            1.0
        };
        let radius = (diameter * 0.5) * size_factor * jitter_factor * pixel_ratio;

        let (scatter_x, scatter_y) = if config.scatter > 0.0 {
            (
                config.scatter * radius * rng.next_signed_f32(),
                config.scatter * radius * rng.next_signed_f32(),
            )
        } else {
            (0.0, 0.0)
        };

        let alpha = if config.pressure_affects_flow {
            flow * pressure.clamp(0.0, 1.0)
        } else {
            flow
        };

        placements.push(DabPlacement {
            center_x: point_x * pixel_ratio + scatter_x,
            center_y: point_y * pixel_ratio + scatter_y,
            radius,
            alpha,
            heading_degrees: heading,
        });
    };

    let first = path[0];
    emit(first.x, first.y, first.pressure, first.heading);

    let mut distance_since_last_dab = 0.0_f32;
    for segment in path.windows(2) {
        let [start, end] = [segment[0], segment[1]];
        let mut segment_start_x = start.x;
        let mut segment_start_y = start.y;
        let mut segment_start_pressure = start.pressure;
        let mut segment_dx = end.x - segment_start_x;
        let mut segment_dy = end.y - segment_start_y;
        let mut segment_length = (segment_dx * segment_dx + segment_dy * segment_dy).sqrt();

        while distance_since_last_dab + segment_length >= spacing_units {
            let distance_to_next = spacing_units - distance_since_last_dab;
            let interpolation_t = if segment_length == 0.0 {
                0.0
            } else {
                distance_to_next / segment_length
            };
            let dab_x = segment_start_x + segment_dx * interpolation_t;
            let dab_y = segment_start_y + segment_dy * interpolation_t;
            let dab_pressure = segment_start_pressure
                + (end.pressure - segment_start_pressure) * interpolation_t;

            emit(dab_x, dab_y, dab_pressure, end.heading);
            distance_since_last_dab = 0.0;
            segment_start_x = dab_x;
            segment_start_y = dab_y;
            segment_start_pressure = dab_pressure;
            segment_dx = end.x - segment_start_x;
            segment_dy = end.y - segment_start_y;
            segment_length = (segment_dx * segment_dx + segment_dy * segment_dy).sqrt();
        }
        distance_since_last_dab += segment_length;
    }

    placements
}

/// Source-over composite one dab into the target. Flat brushes squash the dab
/// into an ellipse oriented along the stylus heading.
fn stamp_dab(target: &mut Bitmap, dab: &DabPlacement, color: ColorRgba, options: &RenderOptions) {
    if dab.radius <= 0.0 || dab.alpha <= 0.0 {
        return;
    }
    let width = target.width();
    let height = target.height();

    let min_x = ((dab.center_x - dab.radius).floor().max(0.0)) as u32;
    let min_y = ((dab.center_y - dab.radius).floor().max(0.0)) as u32;
    let max_x = ((dab.center_x + dab.radius).ceil()).min(width as f32 - 1.0);
    let max_y = ((dab.center_y + dab.radius).ceil()).min(height as f32 - 1.0);
    if max_x < 0.0 || max_y < 0.0 || min_x >= width || min_y >= height {
        return;
    }
    let max_x = max_x as u32;
    let max_y = max_y as u32;

    let hardness = options.config.hardness;
    let flat = options.config.shape == BrushShape::Flat;
    let (heading_sin, heading_cos) = if flat {
        dab.heading_degrees.to_radians().sin_cos()
    } else {
        (0.0, 1.0)
    };
    // Flat brushes compress the axis perpendicular to the heading.
    const FLAT_ASPECT: f32 = 0.35;

    let pixels = target.pixels_mut();
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let offset_x = (x as f32 + 0.5) - dab.center_x;
            let offset_y = (y as f32 + 0.5) - dab.center_y;
            let normalized_distance = if flat {
                let along = offset_x * heading_cos + offset_y * heading_sin;
                let across = -offset_x * heading_sin + offset_y * heading_cos;
                let across = across / FLAT_ASPECT;
                (along * along + across * across).sqrt() / dab.radius
            } else {
                (offset_x * offset_x + offset_y * offset_y).sqrt() / dab.radius
            };
            if normalized_distance >= 1.0 {
                continue;
            }

            let coverage = edge_falloff(normalized_distance, hardness);
            let source_alpha = (dab.alpha * color.a * coverage).clamp(0.0, 1.0);
            if source_alpha <= 0.0 {
                continue;
            }

            let index = ((y as usize * width as usize) + x as usize) * 4;
            composite_source_over(
                &mut pixels[index..index + 4],
                color,
                source_alpha,
            );
        }
    }
}

/// 1 inside the hard core, smoothstep falloff from `hardness` to the rim.
fn edge_falloff(normalized_distance: f32, hardness: f32) -> f32 {
    if normalized_distance <= hardness {
        return 1.0;
    }
    if hardness >= 1.0 {
        return 1.0;
    }
    let t = ((normalized_distance - hardness) / (1.0 - hardness)).clamp(0.0, 1.0);
    let t = 1.0 - t;
    t * t * (3.0 - 2.0 * t)
}

fn composite_source_over(destination: &mut [u8], color: ColorRgba, source_alpha: f32) {
    let dest_r = destination[0] as f32 / 255.0;
    let dest_g = destination[1] as f32 / 255.0;
    let dest_b = destination[2] as f32 / 255.0;
    let dest_a = destination[3] as f32 / 255.0;

    let out_a = source_alpha + dest_a * (1.0 - source_alpha);
    let (out_r, out_g, out_b) = if out_a > 0.0 {
        (
            (color.r * source_alpha + dest_r * dest_a * (1.0 - source_alpha)) / out_a,
            (color.g * source_alpha + dest_g * dest_a * (1.0 - source_alpha)) / out_a,
            (color.b * source_alpha + dest_b * dest_a * (1.0 - source_alpha)) / out_a,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    destination[0] = channel_to_u8(out_r);
    destination[1] = channel_to_u8(out_g);
    destination[2] = channel_to_u8(out_b);
    destination[3] = channel_to_u8(out_a);
}

fn channel_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{EngineConfig, RenderOverrides};

    fn options() -> RenderOptions {
        RenderOptions {
            config: EngineConfig::default(),
            overrides: RenderOverrides::default(),
            base_size: 8.0,
            color: ColorRgba::new(1.0, 0.0, 0.0, 1.0),
            width: 64,
            height: 64,
            pixel_ratio: 1.0,
            post_process: None,
        }
    }

    fn point(x: f32, y: f32, time_ms: f64) -> InputPoint {
        InputPoint {
            x,
            y,
            time_ms,
            pressure: 1.0,
            tilt: 1.0,
            heading: 0.0,
            speed: 0.0,
        }
    }

    fn diagonal_path() -> Vec<InputPoint> {
        (0..12)
            .map(|step| point(8.0 + step as f32 * 4.0, 8.0 + step as f32 * 4.0, step as f64))
            .collect()
    }

    #[test]
    fn rendering_is_deterministic_for_same_seed() {
        let options = RenderOptions {
            config: EngineConfig {
                scatter: 0.8,
                size_jitter: 0.5,
                ..EngineConfig::default()
            },
            ..options()
        };
        let path = diagonal_path();

        let mut first = Bitmap::new(64, 64).expect("bitmap");
        let mut second = Bitmap::new(64, 64).expect("bitmap");
        render_stroke(&mut first, &options, &path, Some(99)).expect("first render");
        render_stroke(&mut second, &options, &path, Some(99)).expect("second render");
        assert_eq!(first.pixels(), second.pixels());
    }

    #[test]
    fn different_seeds_change_jittered_output() {
        let options = RenderOptions {
            config: EngineConfig {
                scatter: 1.5,
                ..EngineConfig::default()
            },
            ..options()
        };
        let path = diagonal_path();

        let mut first = Bitmap::new(64, 64).expect("bitmap");
        let mut second = Bitmap::new(64, 64).expect("bitmap");
        render_stroke(&mut first, &options, &path, Some(1)).expect("first render");
        render_stroke(&mut second, &options, &path, Some(2)).expect("second render");
        assert_ne!(first.pixels(), second.pixels());
    }

    #[test]
    fn empty_path_clears_to_placeholder_fill() {
        let mut target = Bitmap::new(16, 16).expect("bitmap");
        target.put_pixel(3, 3, [9, 9, 9, 9]).expect("dirty pixel");

        let stats = render_stroke(&mut target, &options(), &[], None).expect("render");
        assert_eq!(stats.dab_count, 0);
        assert!(target.pixels().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn single_point_path_stamps_one_dab() {
        let mut target = Bitmap::new(32, 32).expect("bitmap");
        let stats =
            render_stroke(&mut target, &options(), &[point(16.0, 16.0, 0.0)], None)
                .expect("render");
        assert_eq!(stats.dab_count, 1);
        let center = target.pixel(16, 16).expect("center pixel");
        assert_eq!(center[0], 255, "dab center must carry the brush color");
        assert!(center[3] > 0);
    }

    #[test]
    fn dab_spacing_follows_config() {
        // 40 units of path at spacing 0.25 * 8.0 = 2.0 units per dab.
        let path = vec![point(4.0, 16.0, 0.0), point(44.0, 16.0, 10.0)];
        let mut target = Bitmap::new(64, 32).expect("bitmap");
        let stats = render_stroke(&mut target, &options(), &path, None).expect("render");
        assert_eq!(stats.dab_count, 21);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut target = Bitmap::new(16, 16).expect("bitmap");
        let broken = RenderOptions {
            config: EngineConfig {
                spacing: -1.0,
                ..EngineConfig::default()
            },
            ..options()
        };
        let error = render_stroke(&mut target, &broken, &diagonal_path(), None)
            .expect_err("invalid spacing must fail");
        assert_eq!(
            error,
            RenderError::Config(ConfigValidationError::SpacingOutOfRange)
        );
    }

    #[test]
    fn invalid_base_size_is_rejected() {
        let mut target = Bitmap::new(16, 16).expect("bitmap");
        let broken = RenderOptions {
            base_size: 0.0,
            ..options()
        };
        let error = render_stroke(&mut target, &broken, &diagonal_path(), None)
            .expect_err("zero size must fail");
        assert_eq!(error, RenderError::BaseSizeInvalid);
    }

    #[test]
    fn pixel_ratio_scales_dab_position() {
        let mut target = Bitmap::new(64, 64).expect("bitmap");
        let scaled = RenderOptions {
            pixel_ratio: 2.0,
            width: 32,
            height: 32,
            ..options()
        };
        render_stroke(&mut target, &scaled, &[point(16.0, 16.0, 0.0)], None).expect("render");
        let center = target.pixel(32, 32).expect("scaled center");
        assert!(center[3] > 0, "dab must land at pixel-ratio-scaled center");
    }
}
