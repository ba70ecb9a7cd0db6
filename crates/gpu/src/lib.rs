//! GPU resource layer.
//!
//! Owns one shader-capable rendering context bound to one backing pixel
//! surface and provides texture, render-target and program primitives for the
//! kernel library. Ownership is explicit: every [`Tex`] / [`Fbo`] returned by
//! a creation call must be passed back to the matching delete call before the
//! surface goes away. Destroying the surface invalidates everything created
//! through it; the layer does not track leaks.

mod kernels;
#[cfg(test)]
mod tests;

pub use kernels::{KernelLibrary, blur_iteration_count};

use model::Bitmap;

/// A sampleable GPU-resident image. Linear filtering, edge-clamped wrapping.
#[derive(Debug)]
pub struct Tex {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl Tex {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// A [`Tex`] plus a render-target attachment point.
#[derive(Debug)]
pub struct Fbo {
    tex: Tex,
}

impl Fbo {
    pub fn tex(&self) -> &Tex {
        &self.tex
    }
}

/// A compiled and linked shader pass.
#[derive(Debug)]
pub struct Program {
    pipeline: wgpu::RenderPipeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuResourceError {
    ZeroDimension,
    /// The platform reported the render-target attachment unusable. This is
    /// an unrecoverable configuration error for the session.
    AttachmentIncomplete { detail: String },
    DimensionMismatch,
    ReadbackFailed,
}

/// Shader compile or link failure, carrying the platform diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCompileError {
    pub message: String,
}

/// Where a fullscreen pass draws.
#[derive(Debug, Clone, Copy)]
pub enum PassTarget<'a> {
    /// The surface's own backing texture.
    Backing,
    Target(&'a Fbo),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    /// One texel along the axis a kernel walks, in UV units.
    pub step: [f32; 2],
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// The live rendering context plus its backing pixel surface. Exactly one per
/// rendering session; the thread that owns it is the only thread that ever
/// touches objects created through it.
pub struct GpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    quad_vertex_buffer: wgpu::Buffer,
    linear_sampler: wgpu::Sampler,
    pass_bind_group_layout: wgpu::BindGroupLayout,
    backing: Tex,
}

impl GpuSurface {
    /// Probe for a shader-capable context sized to the given pixel
    /// dimensions. `None` means the platform cannot provide one; callers
    /// must treat that as capability-absent, not as an error.
    pub fn create(pixel_width: u32, pixel_height: u32) -> Option<Self> {
        if pixel_width == 0 || pixel_height == 0 {
            return None;
        }

        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("gpu.surface_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .ok()?;

            use wgpu::util::DeviceExt;
            let quad_vertex_buffer =
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("gpu.fullscreen_quad"),
                    contents: bytemuck::cast_slice(&QUAD_VERTICES),
                    usage: wgpu::BufferUsages::VERTEX,
                });
            let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("gpu.sampler.linear"),
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                ..Default::default()
            });
            let pass_bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gpu.pass_layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });
            let backing = make_texture(
                &device,
                pixel_width,
                pixel_height,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                "gpu.backing",
            );

            Some(Self {
                device,
                queue,
                quad_vertex_buffer,
                linear_sampler,
                pass_bind_group_layout,
                backing,
            })
        })
    }

    pub fn width(&self) -> u32 {
        self.backing.width
    }

    pub fn height(&self) -> u32 {
        self.backing.height
    }

    pub fn backing(&self) -> &Tex {
        &self.backing
    }

    /// Recreate the backing surface at new pixel dimensions. Previous backing
    /// contents are discarded.
    pub fn resize(&mut self, pixel_width: u32, pixel_height: u32) -> Result<(), GpuResourceError> {
        if pixel_width == 0 || pixel_height == 0 {
            return Err(GpuResourceError::ZeroDimension);
        }
        let old = std::mem::replace(
            &mut self.backing,
            make_texture(
                &self.device,
                pixel_width,
                pixel_height,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                "gpu.backing",
            ),
        );
        old.texture.destroy();
        Ok(())
    }

    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        initial_data: Option<&[u8]>,
    ) -> Result<Tex, GpuResourceError> {
        if width == 0 || height == 0 {
            return Err(GpuResourceError::ZeroDimension);
        }
        if let Some(data) = initial_data {
            let expected_len = rgba8_byte_len(width, height);
            if data.len() != expected_len {
                return Err(GpuResourceError::DimensionMismatch);
            }
        }

        let tex = make_texture(
            &self.device,
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "gpu.texture",
        );
        if let Some(data) = initial_data {
            self.write_texture_pixels(&tex, data);
        }
        Ok(tex)
    }

    /// Explicit destroy: the handle is consumed and its GPU memory released.
    pub fn delete_texture(&self, tex: Tex) {
        tex.texture.destroy();
    }

    /// Bundle a texture with a render-target attachment. An incomplete
    /// attachment report from the platform is unrecoverable for this session.
    pub fn create_render_target(&self, width: u32, height: u32) -> Result<Fbo, GpuResourceError> {
        if width == 0 || height == 0 {
            return Err(GpuResourceError::ZeroDimension);
        }

        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let tex = make_texture(
            &self.device,
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            "gpu.render_target",
        );
        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(GpuResourceError::AttachmentIncomplete {
                detail: error.to_string(),
            });
        }
        Ok(Fbo { tex })
    }

    pub fn delete_render_target(&self, fbo: Fbo) {
        fbo.tex.texture.destroy();
    }

    /// Compile and link a shader pass. On failure the platform diagnostic is
    /// carried in the error and no partial objects survive.
    pub fn compile_program(
        &self,
        label: &str,
        wgsl_source: &str,
    ) -> Result<Program, ShaderCompileError> {
        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(wgsl_source.into()),
            });
        let pipeline_layout =
            self.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[&self.pass_bind_group_layout],
                    immediate_size: 0,
                });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<QuadVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &QUAD_ATTRIBUTES,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SURFACE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });

        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(ShaderCompileError {
                message: error.to_string(),
            });
        }
        Ok(Program { pipeline })
    }

    /// Bind the given target (or the backing surface), set the viewport, and
    /// issue one full-surface triangle-strip draw of `program` sampling
    /// `input`. The quad geometry buffer is created once per surface.
    pub fn fullscreen_pass(
        &self,
        program: &Program,
        input: &Tex,
        params: KernelParams,
        target: PassTarget<'_>,
        viewport_width: u32,
        viewport_height: u32,
    ) {
        use wgpu::util::DeviceExt;
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gpu.pass_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gpu.pass_bind_group"),
            layout: &self.pass_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let target_view = match target {
            PassTarget::Backing => &self.backing.view,
            PassTarget::Target(fbo) => &fbo.tex.view,
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gpu.pass_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gpu.fullscreen_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
            pass.set_viewport(
                0.0,
                0.0,
                viewport_width as f32,
                viewport_height as f32,
                0.0,
                1.0,
            );
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    /// Upload a raster bitmap into the backing surface.
    pub fn write_backing_pixels(&self, bitmap: &Bitmap) -> Result<(), GpuResourceError> {
        if bitmap.width() != self.backing.width || bitmap.height() != self.backing.height {
            return Err(GpuResourceError::DimensionMismatch);
        }
        self.write_texture_pixels(&self.backing, bitmap.pixels());
        Ok(())
    }

    pub fn read_backing_pixels(&self) -> Result<Bitmap, GpuResourceError> {
        self.read_texture_pixels(&self.backing)
    }

    pub fn read_target_pixels(&self, fbo: &Fbo) -> Result<Bitmap, GpuResourceError> {
        self.read_texture_pixels(&fbo.tex)
    }

    fn write_texture_pixels(&self, tex: &Tex, data: &[u8]) {
        let bytes_per_row = tex
            .width
            .checked_mul(4)
            .expect("rgba8 bytes_per_row overflow");
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(tex.height),
            },
            wgpu::Extent3d {
                width: tex.width,
                height: tex.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Padded-row readback of a texture into a tightly packed RGBA8 bitmap.
    fn read_texture_pixels(&self, tex: &Tex) -> Result<Bitmap, GpuResourceError> {
        // wgpu requires bytes_per_row to be a multiple of 256 for texture
        // copies to buffers.
        let unpadded_bytes_per_row = tex
            .width
            .checked_mul(4)
            .expect("rgba8 readback bytes_per_row overflow");
        let padded_bytes_per_row = unpadded_bytes_per_row
            .checked_add(255)
            .expect("readback bytes_per_row pad overflow")
            / 256
            * 256;
        let buffer_size = (padded_bytes_per_row as u64)
            .checked_mul(tex.height as u64)
            .expect("rgba8 readback buffer size overflow");
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu.readback"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gpu.readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(tex.height),
                },
            },
            wgpu::Extent3d {
                width: tex.width,
                height: tex.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|_| GpuResourceError::ReadbackFailed)?;
        receiver
            .recv()
            .map_err(|_| GpuResourceError::ReadbackFailed)?
            .map_err(|_| GpuResourceError::ReadbackFailed)?;

        let mapped = readback.slice(..).get_mapped_range();
        let mut pixels = Vec::with_capacity(rgba8_byte_len(tex.width, tex.height));
        for row in 0..tex.height {
            let row_start = (row as usize)
                .checked_mul(padded_bytes_per_row as usize)
                .expect("readback row offset overflow");
            pixels.extend_from_slice(&mapped[row_start..row_start + unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback.unmap();

        Bitmap::from_pixels(tex.width, tex.height, pixels)
            .map_err(|_| GpuResourceError::ReadbackFailed)
    }
}

fn make_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
    label: &str,
) -> Tex {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Tex {
        texture,
        view,
        width,
        height,
    }
}

fn rgba8_byte_len(width: u32, height: u32) -> usize {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|area| area.checked_mul(4))
        .expect("rgba8 byte length overflow")
}
