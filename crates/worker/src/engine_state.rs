//! Request handling shared by the worker thread and the in-process fallback.
//!
//! All state lives behind one exhaustive dispatch over [`WorkerRequest`];
//! every request maps to exactly one response. Failures never poison the
//! state: a failed request reports `Error` and the next request proceeds.

use std::collections::HashMap;

use gpu::{GpuSurface, KernelLibrary};
use model::{Bitmap, PostProcess};
use protocol::{AckKind, LayerId, WorkerRequest, WorkerResponse};

struct GpuContext {
    surface: GpuSurface,
    kernels: KernelLibrary,
}

struct SurfaceState {
    pixel_width: u32,
    pixel_height: u32,
    gpu: Option<GpuContext>,
    layers: HashMap<Option<LayerId>, Bitmap>,
}

pub(crate) struct EngineState {
    surface: Option<SurfaceState>,
}

impl EngineState {
    pub(crate) fn new() -> Self {
        Self { surface: None }
    }

    pub(crate) fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::Init {
                width,
                height,
                pixel_ratio,
            } => self.handle_configure(width, height, pixel_ratio, AckKind::Init),
            WorkerRequest::Resize {
                width,
                height,
                pixel_ratio,
            } => {
                if self.surface.is_none() {
                    return error_response("resize before init");
                }
                self.handle_configure(width, height, pixel_ratio, AckKind::Resize)
            }
            WorkerRequest::Ping => WorkerResponse::Pong,
            WorkerRequest::Snapshot { layer_id } => self.handle_snapshot(layer_id),
            WorkerRequest::RenderStroke {
                layer_id,
                options,
                path,
                seed,
            } => self.handle_render_stroke(layer_id, options, path, seed),
        }
    }

    fn handle_configure(
        &mut self,
        width: u32,
        height: u32,
        pixel_ratio: Option<f32>,
        ack: AckKind,
    ) -> WorkerResponse {
        let pixel_ratio = pixel_ratio.unwrap_or(1.0);
        if width == 0 || height == 0 {
            return error_response("surface dimensions must be non-zero");
        }
        if !pixel_ratio.is_finite() || pixel_ratio <= 0.0 {
            return error_response("pixel ratio must be finite and positive");
        }
        let pixel_width = model::scaled_dimension(width, pixel_ratio);
        let pixel_height = model::scaled_dimension(height, pixel_ratio);

        // Shader capability is probed, not required. Without it the session
        // still renders; post-processing passes are skipped.
        let gpu = match GpuSurface::create(pixel_width, pixel_height) {
            Some(surface) => match KernelLibrary::compile(&surface) {
                Ok(kernels) => Some(GpuContext { surface, kernels }),
                Err(error) => {
                    return error_response(&format!(
                        "kernel compilation failed: {}",
                        error.message
                    ));
                }
            },
            None => {
                eprintln!("[worker] shader context unavailable, post-processing disabled");
                None
            }
        };

        self.surface = Some(SurfaceState {
            pixel_width,
            pixel_height,
            gpu,
            layers: HashMap::new(),
        });
        WorkerResponse::Ack { for_kind: ack }
    }

    fn handle_snapshot(&mut self, layer_id: Option<LayerId>) -> WorkerResponse {
        let Some(surface) = self.surface.as_ref() else {
            return error_response("snapshot before init");
        };
        let bitmap = match surface.layers.get(&layer_id) {
            Some(layer) => layer.clone(),
            // A layer nothing has drawn to yet reads back as transparent.
            None => match Bitmap::new(surface.pixel_width, surface.pixel_height) {
                Ok(bitmap) => bitmap,
                Err(error) => {
                    return error_response(&format!("snapshot allocation failed: {error:?}"));
                }
            },
        };
        WorkerResponse::Bitmap { bitmap, layer_id }
    }

    fn handle_render_stroke(
        &mut self,
        layer_id: Option<LayerId>,
        options: model::RenderOptions,
        path: Vec<model::InputPoint>,
        seed: Option<u64>,
    ) -> WorkerResponse {
        let Some(surface) = self.surface.as_mut() else {
            return error_response("render before init");
        };

        let pixel_width = options.pixel_width();
        let pixel_height = options.pixel_height();
        let mut target = match Bitmap::new(pixel_width, pixel_height) {
            Ok(bitmap) => bitmap,
            Err(error) => {
                return error_response(&format!("render target allocation failed: {error:?}"));
            }
        };
        if let Err(error) = renderer::render_stroke(&mut target, &options, &path, seed) {
            return error_response(&format!("stroke rejected: {error:?}"));
        }

        if let Some(post) = options.post_process.as_ref().filter(|post| !post.is_noop()) {
            match &surface.gpu {
                Some(gpu) => match apply_post_process(gpu, &target, post) {
                    Ok(processed) => target = processed,
                    Err(message) => return error_response(&message),
                },
                None => {
                    eprintln!("[worker] skipping post-processing, no shader context");
                }
            }
        }

        surface.layers.insert(layer_id, target.clone());
        WorkerResponse::Bitmap {
            bitmap: target,
            layer_id,
        }
    }
}

fn apply_post_process(
    gpu: &GpuContext,
    source: &Bitmap,
    post: &PostProcess,
) -> Result<Bitmap, String> {
    let width = source.width();
    let height = source.height();
    let input = gpu
        .surface
        .create_texture(width, height, Some(source.pixels()))
        .map_err(|error| format!("post-process upload failed: {error:?}"))?;
    let ping = match gpu.surface.create_render_target(width, height) {
        Ok(target) => target,
        Err(error) => {
            gpu.surface.delete_texture(input);
            return Err(format!("post-process target failed: {error:?}"));
        }
    };
    let pong = match gpu.surface.create_render_target(width, height) {
        Ok(target) => target,
        Err(error) => {
            gpu.surface.delete_texture(input);
            gpu.surface.delete_render_target(ping);
            return Err(format!("post-process target failed: {error:?}"));
        }
    };

    let blur_sigma = post.blur_sigma.filter(|sigma| *sigma > 0.0);
    if let Some(sigma) = blur_sigma {
        gpu.kernels.blur(&gpu.surface, &input, &ping, &pong, sigma);
    }
    let read_result = if post.extract_normal_map {
        let sobel_input = if blur_sigma.is_some() {
            pong.tex()
        } else {
            &input
        };
        gpu.kernels.sobel_normal(&gpu.surface, sobel_input, &ping);
        gpu.surface.read_target_pixels(&ping)
    } else if blur_sigma.is_some() {
        gpu.surface.read_target_pixels(&pong)
    } else {
        Ok(source.clone())
    };

    gpu.surface.delete_texture(input);
    gpu.surface.delete_render_target(ping);
    gpu.surface.delete_render_target(pong);
    read_result.map_err(|error| format!("post-process readback failed: {error:?}"))
}

fn error_response(message: &str) -> WorkerResponse {
    WorkerResponse::Error {
        message: message.to_owned(),
    }
}
