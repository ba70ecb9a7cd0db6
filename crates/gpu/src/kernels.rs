//! Post-processing kernel library: separable blur, Sobel normal extraction
//! and a plain blit, all driven through [`GpuSurface::fullscreen_pass`].

use crate::{Fbo, GpuSurface, KernelParams, PassTarget, Program, ShaderCompileError, Tex};

const BLIT_SOURCE: &str = include_str!("fullscreen_blit.wgsl");
const BLUR_SOURCE: &str = include_str!("separable_blur.wgsl");
const SOBEL_SOURCE: &str = include_str!("sobel_normal.wgsl");

/// How many horizontal+vertical blur passes a sigma hint maps to. The 9-tap
/// kernel has a fixed footprint, so larger sigmas repeat it.
pub fn blur_iteration_count(sigma_hint: f32) -> u32 {
    ((sigma_hint / 3.0).round() as i32).clamp(1, 6) as u32
}

/// The three fixed programs, compiled once per surface.
pub struct KernelLibrary {
    blit: Program,
    blur: Program,
    sobel_normal: Program,
}

impl KernelLibrary {
    pub fn compile(surface: &GpuSurface) -> Result<Self, ShaderCompileError> {
        Ok(Self {
            blit: surface.compile_program("kernels.blit", BLIT_SOURCE)?,
            blur: surface.compile_program("kernels.blur", BLUR_SOURCE)?,
            sobel_normal: surface.compile_program("kernels.sobel_normal", SOBEL_SOURCE)?,
        })
    }

    /// Copy `input` onto `target` (or the backing surface).
    pub fn blit(&self, surface: &GpuSurface, input: &Tex, target: PassTarget<'_>) {
        let (width, height) = target_dimensions(surface, target);
        surface.fullscreen_pass(
            &self.blit,
            input,
            KernelParams {
                step: [0.0, 0.0],
                _pad: [0.0, 0.0],
            },
            target,
            width,
            height,
        );
    }

    /// Separable blur of `input` into `output`, bouncing each iteration's
    /// horizontal pass off `scratch`. Both targets must match the input
    /// dimensions.
    pub fn blur(
        &self,
        surface: &GpuSurface,
        input: &Tex,
        scratch: &Fbo,
        output: &Fbo,
        sigma_hint: f32,
    ) {
        let width = input.width();
        let height = input.height();
        debug_assert_eq!(scratch.tex().width(), width);
        debug_assert_eq!(scratch.tex().height(), height);
        debug_assert_eq!(output.tex().width(), width);
        debug_assert_eq!(output.tex().height(), height);

        let horizontal = KernelParams {
            step: [1.0 / width as f32, 0.0],
            _pad: [0.0, 0.0],
        };
        let vertical = KernelParams {
            step: [0.0, 1.0 / height as f32],
            _pad: [0.0, 0.0],
        };

        let iterations = blur_iteration_count(sigma_hint);
        for iteration in 0..iterations {
            let horizontal_input = if iteration == 0 { input } else { output.tex() };
            surface.fullscreen_pass(
                &self.blur,
                horizontal_input,
                horizontal,
                PassTarget::Target(scratch),
                width,
                height,
            );
            surface.fullscreen_pass(
                &self.blur,
                scratch.tex(),
                vertical,
                PassTarget::Target(output),
                width,
                height,
            );
        }
    }

    /// Sobel luminance gradients of `input` rendered as a tangent-space
    /// normal map into `target`.
    pub fn sobel_normal(&self, surface: &GpuSurface, input: &Tex, target: &Fbo) {
        surface.fullscreen_pass(
            &self.sobel_normal,
            input,
            KernelParams {
                step: [1.0 / input.width() as f32, 1.0 / input.height() as f32],
                _pad: [0.0, 0.0],
            },
            PassTarget::Target(target),
            target.tex().width(),
            target.tex().height(),
        );
    }
}

fn target_dimensions(surface: &GpuSurface, target: PassTarget<'_>) -> (u32, u32) {
    match target {
        PassTarget::Backing => (surface.width(), surface.height()),
        PassTarget::Target(fbo) => (fbo.tex().width(), fbo.tex().height()),
    }
}
