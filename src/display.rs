//! Presentation fallback path: blitting a rendered frame to a target the
//! host is about to present, for hosts that do not supply their own draw
//! shader.
//!
//! The fallback program is built lazily on first use and the outcome is
//! sticky: a failed build is recorded and never retried, every later draw
//! through the fallback path fails fast instead of re-compiling a shader
//! that is known bad.

#[cfg(feature = "gpu")]
use crate::error::{LuminaError, LuminaResult};
#[cfg(feature = "gpu")]
use crate::gpu::GpuContext;
#[cfg(feature = "gpu")]
use crate::pixels::{PixelBuffer, PixelFormat};

/// Lifecycle of a lazily built resource. `Failed` is terminal.
#[derive(Debug)]
pub enum BuildState<T> {
    NotBuilt,
    Failed,
    Ready(T),
}

impl<T> Default for BuildState<T> {
    fn default() -> Self {
        BuildState::NotBuilt
    }
}

impl<T> BuildState<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, BuildState::Failed)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, BuildState::Ready(_))
    }

    /// Run `build` if nothing has been attempted yet, then return the ready
    /// value. A build that returns `None` marks the state `Failed`, and no
    /// later call will attempt again.
    pub fn get_or_build(&mut self, build: impl FnOnce() -> Option<T>) -> Option<&T> {
        if matches!(self, BuildState::NotBuilt) {
            *self = match build() {
                Some(value) => BuildState::Ready(value),
                None => BuildState::Failed,
            };
        }
        match self {
            BuildState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Host-supplied draw shader. When present, blits use it directly and the
/// fallback program is neither built nor consulted.
///
/// Bind group 0 of the returned pipeline must expose the frame texture at
/// binding 0 and a filtering sampler at binding 1; the quad arrives as one
/// vertex buffer of `[pos.xy, uv.xy]` float32 pairs.
#[cfg(feature = "gpu")]
pub trait DisplayShader: Send {
    /// Called once per blit, before encoding. Returns the pipeline to draw
    /// the quad with.
    fn bind(&mut self) -> &wgpu::RenderPipeline;

    /// Called after the draw has been encoded.
    fn unbind(&mut self) {}
}

/// One blit request: copy `src_rows` rows of `pixels` starting `src_row`
/// rows in onto `target` at `dst` scaled to `dst_size`, inside a viewport of
/// `viewport` pixels.
#[cfg(feature = "gpu")]
pub struct BlitParams<'a> {
    pub pixels: &'a PixelBuffer,
    /// First buffer row to draw.
    pub src_row: u32,
    /// Number of buffer rows to draw.
    pub src_rows: u32,
    pub target: &'a wgpu::TextureView,
    pub target_format: wgpu::TextureFormat,
    /// Full target size in pixels; used to place the quad.
    pub viewport: (u32, u32),
    /// Top-left corner of the destination rectangle.
    pub dst: (i32, i32),
    /// Destination rectangle size; differs from the region size when zoomed.
    pub dst_size: (u32, u32),
    /// Blend the image over existing target content instead of replacing it.
    pub transparent: bool,
}

#[cfg(feature = "gpu")]
struct FallbackProgram {
    /// Replaces target content.
    opaque: wgpu::RenderPipeline,
    /// Premultiplied-alpha blend over target content; selected per draw and
    /// never leaks into the other variant.
    transparent: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    target_format: wgpu::TextureFormat,
}

#[cfg(feature = "gpu")]
const FALLBACK_SHADER: &str = r#"
struct VsIn {
  @location(0) pos: vec2<f32>,
  @location(1) uv: vec2<f32>,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@vertex
fn vs(in: VsIn) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(in.pos, 0.0, 1.0);
  o.uv = in.uv;
  return o;
}

@group(0) @binding(0) var image_texture: texture_2d<f32>;
@group(0) @binding(1) var image_sampler: sampler;

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  return textureSample(image_texture, image_sampler, in.uv);
}
"#;

#[cfg(feature = "gpu")]
impl FallbackProgram {
    /// Build both pipeline variants inside a validation error scope, so a
    /// bad shader surfaces as an error instead of a panic deep inside the
    /// driver.
    fn build(ctx: &GpuContext, target_format: wgpu::TextureFormat) -> LuminaResult<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("lumina_display_shader"),
                source: wgpu::ShaderSource::Wgsl(FALLBACK_SHADER.into()),
            });

        let pipeline_layout = {
            let bind_group_layout =
                ctx.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("lumina_display_bgl"),
                        entries: &[
                            wgpu::BindGroupLayoutEntry {
                                binding: 0,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Texture {
                                    multisampled: false,
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                },
                                count: None,
                            },
                            wgpu::BindGroupLayoutEntry {
                                binding: 1,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                                count: None,
                            },
                        ],
                    });
            ctx.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("lumina_display_pl"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                })
        };

        let pipeline = |label: &str, blend: Option<wgpu::BlendState>| {
            ctx.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: 16,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &[
                                wgpu::VertexAttribute {
                                    format: wgpu::VertexFormat::Float32x2,
                                    offset: 0,
                                    shader_location: 0,
                                },
                                wgpu::VertexAttribute {
                                    format: wgpu::VertexFormat::Float32x2,
                                    offset: 8,
                                    shader_location: 1,
                                },
                            ],
                        }],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some("fs"),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: target_format,
                            blend,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
        };

        let opaque = pipeline("lumina_display_opaque", None);
        let transparent = pipeline(
            "lumina_display_transparent",
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        );

        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("lumina_display_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            for (number, line) in FALLBACK_SHADER.lines().enumerate() {
                tracing::error!("{:3}: {line}", number + 1);
            }
            return Err(LuminaError::render(format!(
                "display shader failed to build: {err}"
            )));
        }

        Ok(Self {
            opaque,
            transparent,
            sampler,
            target_format,
        })
    }
}

/// The draw-to-target path of a GPU device handle.
#[cfg(feature = "gpu")]
#[derive(Default)]
pub struct DisplayPipeline {
    program: BuildState<FallbackProgram>,
    build_attempts: u32,
    /// Created on first blit, then refilled per call.
    vertex_buffer: Option<wgpu::Buffer>,
}

#[cfg(feature = "gpu")]
impl DisplayPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many fallback builds have been attempted. At most 1 by design.
    pub fn build_attempts(&self) -> u32 {
        self.build_attempts
    }

    pub fn fallback_failed(&self) -> bool {
        self.program.is_failed()
    }

    fn ensure_ready(
        &mut self,
        ctx: &GpuContext,
        target_format: wgpu::TextureFormat,
    ) -> LuminaResult<()> {
        if matches!(self.program, BuildState::NotBuilt) {
            self.build_attempts += 1;
            match FallbackProgram::build(ctx, target_format) {
                Ok(program) => self.program = BuildState::Ready(program),
                Err(err) => {
                    self.program = BuildState::Failed;
                    return Err(err);
                }
            }
        }
        match &self.program {
            BuildState::Ready(program) if program.target_format != target_format => {
                Err(LuminaError::validation(format!(
                    "display pipeline was built for {:?}, got {target_format:?}",
                    program.target_format
                )))
            }
            BuildState::Ready(_) => Ok(()),
            _ => Err(LuminaError::render(
                "display shader previously failed to build",
            )),
        }
    }

    /// Draw a frame onto the target.
    ///
    /// The frame texture lives only for this call; the vertex buffer is
    /// created once and rewritten. With a host shader the fallback program is
    /// bypassed entirely, including its lazy build.
    pub fn blit(
        &mut self,
        ctx: &GpuContext,
        params: &BlitParams<'_>,
        mut host_shader: Option<&mut dyn DisplayShader>,
    ) -> LuminaResult<()> {
        if host_shader.is_none() {
            self.ensure_ready(ctx, params.target_format)?;
        }

        // Upload the requested rows. The texture is dropped at the end of
        // the call, which releases it as soon as the submitted work
        // completes.
        let width = params.pixels.width();
        let region = params
            .pixels
            .region_bytes(params.src_row, width, params.src_rows)?;
        let (texture_format, bytes_per_texel) = match params.pixels.format() {
            PixelFormat::Rgba8 => (wgpu::TextureFormat::Rgba8Unorm, 4u32),
            PixelFormat::RgbaHalf => (wgpu::TextureFormat::Rgba16Float, 8u32),
        };
        let extent = wgpu::Extent3d {
            width,
            height: params.src_rows,
            depth_or_array_layers: 1,
        };
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("lumina_display_frame"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            region,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_texel),
                rows_per_image: Some(params.src_rows),
            },
            extent,
        );
        let frame_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let vertex_buffer = self.vertex_buffer.get_or_insert_with(|| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lumina_display_quad"),
                size: std::mem::size_of::<[f32; 16]>() as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let quad = quad_vertices(params.viewport, params.dst, params.dst_size);
        ctx.queue
            .write_buffer(vertex_buffer, 0, bytemuck::cast_slice(&quad));

        let pipeline: &wgpu::RenderPipeline = match host_shader.as_deref_mut() {
            Some(shader) => shader.bind(),
            None => match &self.program {
                BuildState::Ready(program) if params.transparent => &program.transparent,
                BuildState::Ready(program) => &program.opaque,
                // ensure_ready above has already erred otherwise
                _ => unreachable!("fallback program checked before draw"),
            },
        };

        let fallback_sampler;
        let sampler = match &self.program {
            BuildState::Ready(program) => &program.sampler,
            _ => {
                fallback_sampler = ctx
                    .device
                    .create_sampler(&wgpu::SamplerDescriptor::default());
                &fallback_sampler
            }
        };

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lumina_display_bg"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumina_display_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lumina_display_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: params.target,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.set_vertex_buffer(0, vertex_buffer.slice(..));
            rp.draw(0..4, 0..1);
        }
        ctx.queue.submit(Some(encoder.finish()));

        if let Some(shader) = host_shader.as_deref_mut() {
            shader.unbind();
        }
        Ok(())
    }
}

/// Destination rectangle as a 4-vertex triangle strip of `[pos.xy, uv.xy]`,
/// in NDC with a top-left pixel origin.
#[cfg(feature = "gpu")]
fn quad_vertices(viewport: (u32, u32), dst: (i32, i32), dst_size: (u32, u32)) -> [f32; 16] {
    let (vw, vh) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
    let x0 = dst.0 as f32;
    let y0 = dst.1 as f32;
    let x1 = x0 + dst_size.0 as f32;
    let y1 = y0 + dst_size.1 as f32;

    let ndc_x = |x: f32| 2.0 * x / vw - 1.0;
    let ndc_y = |y: f32| 1.0 - 2.0 * y / vh;

    [
        // bottom-left, bottom-right, top-left, top-right
        ndc_x(x0), ndc_y(y1), 0.0, 1.0, //
        ndc_x(x1), ndc_y(y1), 1.0, 1.0, //
        ndc_x(x0), ndc_y(y0), 0.0, 0.0, //
        ndc_x(x1), ndc_y(y0), 1.0, 0.0, //
    ]
}
