//! wgpu backend.
//!
//! [`GpuContext`] holds the wgpu device, queue and window surface.
//! [`WgpuDevice`] wraps it and implements [`RenderDevice`]: commands are
//! recorded as the renderer issues them and encoded into one command buffer at
//! [`end_frame`](RenderDevice::end_frame).
//!
//! Uniform data for a frame lives in a single buffer. Each draw gets its own
//! slice at an aligned offset and binds it with a dynamic offset, so draws
//! sharing a program never overwrite each other's uniforms.
//!
//! Meshes and cubemaps are uploaded the first time they are drawn and cached by
//! id. Pipelines are cached by program, target formats and [`RenderState`].

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::camera::Camera;
use crate::device::{
    Attachment, MeshDraw, PassTarget, RenderDevice, TextureDesc, TextureFormat, TextureId,
};
use crate::error::{RenderError, Result};
use crate::material::{DepthState, RenderState};
use crate::mesh::{Mesh, MeshId, Vertex3d};
use crate::post_process::{EffectUniforms, PostEffect};
use crate::program::{ProgramId, ShaderProgram};
use crate::texture::{Cubemap, CubemapId};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const EFFECT_COMMON: &str = include_str!("shaders/effect_common.wgsl");
const SKYBOX_SHADER: &str = include_str!("shaders/skybox.wgsl");

fn effect_shader(effect: &PostEffect) -> &'static str {
    match effect {
        PostEffect::BrightPass { .. } => include_str!("shaders/bright_pass.wgsl"),
        PostEffect::Blur { .. } => include_str!("shaders/blur.wgsl"),
        PostEffect::BloomComposite { .. } => include_str!("shaders/bloom_composite.wgsl"),
        PostEffect::ColorGrade(_) => include_str!("shaders/color_grade.wgsl"),
        PostEffect::ToneMap(_) => include_str!("shaders/tone_map.wgsl"),
    }
}

impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

fn device_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Device(e.to_string())
}

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
pub struct GpuContext {
    /// The surface for presenting rendered frames to the window.
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Creates a GPU context presenting to `window`.
    ///
    /// Picks an sRGB surface format when one is available and presents with
    /// `Fifo`.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window).map_err(device_error)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(device_error)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Lantern Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(device_error)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Device("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        log::info!(
            "gpu ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            surface_format,
            config.width,
            config.height
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
        })
    }

    /// Resizes the surface. Zero sizes (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl GpuMesh {
    fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct MeshPipelineKey {
    program: ProgramId,
    color: wgpu::TextureFormat,
    depth: bool,
    state: RenderState,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SkyboxPipelineKey {
    color: wgpu::TextureFormat,
    depth: bool,
    state: DepthState,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct EffectPipelineKey {
    effect: &'static str,
    color: wgpu::TextureFormat,
}

/// A uniform slice inside the frame's uniform buffer.
#[derive(Clone, Copy)]
struct UniformSlice {
    offset: u32,
    size: NonZeroU64,
}

enum Command {
    Mesh {
        pipeline: MeshPipelineKey,
        mesh: MeshId,
        uniforms: UniformSlice,
    },
    Skybox {
        pipeline: SkyboxPipelineKey,
        cubemap: CubemapId,
        uniforms: UniformSlice,
    },
    Fullscreen {
        pipeline: EffectPipelineKey,
        inputs: Vec<TextureId>,
        uniforms: UniformSlice,
    },
}

struct RecordedPass {
    label: String,
    target: PassTarget,
    color: wgpu::TextureFormat,
    commands: Vec<Command>,
}

#[derive(Default)]
struct FrameRecording {
    passes: Vec<RecordedPass>,
    open: bool,
    uniforms: Vec<u8>,
}

/// A [`RenderDevice`] that renders with wgpu and presents to a window.
pub struct WgpuDevice {
    gpu: GpuContext,
    screen_depth: GpuTexture,
    textures: HashMap<TextureId, GpuTexture>,
    next_texture: u64,
    meshes: HashMap<MeshId, GpuMesh>,
    cubemaps: HashMap<CubemapId, wgpu::TextureView>,
    modules: HashMap<ProgramId, wgpu::ShaderModule>,
    mesh_pipelines: HashMap<MeshPipelineKey, wgpu::RenderPipeline>,
    skybox_pipelines: HashMap<SkyboxPipelineKey, wgpu::RenderPipeline>,
    effect_pipelines: HashMap<EffectPipelineKey, wgpu::RenderPipeline>,
    uniform_layout: wgpu::BindGroupLayout,
    skybox_layout: wgpu::BindGroupLayout,
    effect_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_alignment: u32,
    frame: Option<FrameRecording>,
    pending_destroy: Vec<TextureId>,
    /// Set while the window has a zero-sized client area.
    minimized: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum SurfaceResize {
    Minimize,
    Reconfigure,
    Keep,
}

/// What a window resize to `requested` means for a surface sized `current`.
fn surface_resize(current: (u32, u32), minimized: bool, requested: (u32, u32)) -> SurfaceResize {
    if requested.0 == 0 || requested.1 == 0 {
        SurfaceResize::Minimize
    } else if minimized || requested != current {
        SurfaceResize::Reconfigure
    } else {
        SurfaceResize::Keep
    }
}

fn dynamic_uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn create_depth(device: &wgpu::Device, width: u32, height: u32) -> GpuTexture {
    create_texture(device, "Screen Depth", width, height, DEPTH_FORMAT)
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> GpuTexture {
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
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        width,
        height,
        format,
    }
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        let device = &gpu.device;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Program Uniform Layout"),
            entries: &[dynamic_uniform_entry(0)],
        });
        let skybox_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Skybox Layout"),
            entries: &[
                dynamic_uniform_entry(0),
                texture_entry(1, wgpu::TextureViewDimension::Cube),
                sampler_entry(2),
            ],
        });
        let effect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Post Effect Layout"),
            entries: &[
                dynamic_uniform_entry(0),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                sampler_entry(2),
                texture_entry(3, wgpu::TextureViewDimension::D2),
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Post Effect Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment;
        let screen_depth = create_depth(device, gpu.width(), gpu.height());

        Self {
            gpu,
            screen_depth,
            textures: HashMap::new(),
            next_texture: 1,
            meshes: HashMap::new(),
            cubemaps: HashMap::new(),
            modules: HashMap::new(),
            mesh_pipelines: HashMap::new(),
            skybox_pipelines: HashMap::new(),
            effect_pipelines: HashMap::new(),
            uniform_layout,
            skybox_layout,
            effect_layout,
            sampler,
            uniform_alignment,
            frame: None,
            pending_destroy: Vec::new(),
            minimized: false,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// The pass being recorded, for draw commands.
    fn open_pass(&mut self) -> Result<(&mut RecordedPass, &mut Vec<u8>)> {
        match self.frame.as_mut() {
            Some(frame) if frame.open => {
                let pass = frame
                    .passes
                    .last_mut()
                    .ok_or_else(|| RenderError::Device("no pass recorded".into()))?;
                Ok((pass, &mut frame.uniforms))
            }
            _ => Err(RenderError::Device("draw issued outside a render pass".into())),
        }
    }

    fn push_uniforms(alignment: u32, buffer: &mut Vec<u8>, bytes: &[u8]) -> Result<UniformSlice> {
        let alignment = alignment.max(1) as usize;
        let offset = buffer.len().div_ceil(alignment) * alignment;
        buffer.resize(offset, 0);
        buffer.extend_from_slice(bytes);
        let size = NonZeroU64::new(bytes.len() as u64)
            .ok_or_else(|| RenderError::Device("empty uniform block".into()))?;
        let offset = u32::try_from(offset).map_err(device_error)?;
        Ok(UniformSlice { offset, size })
    }

    fn color_format(&self, attachment: Attachment) -> Result<wgpu::TextureFormat> {
        match attachment {
            Attachment::Screen => Ok(self.gpu.config.format),
            Attachment::Texture(id) => self
                .textures
                .get(&id)
                .map(|t| t.format)
                .ok_or_else(|| RenderError::Device(format!("unknown texture {id:?}"))),
        }
    }

    fn ensure_mesh_pipeline(&mut self, program: &ShaderProgram, key: MeshPipelineKey) {
        if self.mesh_pipelines.contains_key(&key) {
            return;
        }
        let device = &self.gpu.device;
        let module = self.modules.entry(program.id()).or_insert_with(|| {
            log::debug!("compiling program '{}'", program.label());
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.label()),
                source: wgpu::ShaderSource::Wgsl(program.source().to_owned().into()),
            })
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Program Pipeline Layout"),
            bind_group_layouts: &[&self.uniform_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(program.label()),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs"),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color,
                    blend: Some(key.state.blend.into()),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: key.state.depth.write,
                depth_compare: key.state.depth.compare.into(),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        self.mesh_pipelines.insert(key, pipeline);
    }

    fn ensure_skybox_pipeline(&mut self, key: SkyboxPipelineKey) {
        if self.skybox_pipelines.contains_key(&key) {
            return;
        }
        let pipeline = self.fullscreen_pipeline(
            "Skybox Pipeline",
            SKYBOX_SHADER,
            &self.skybox_layout,
            key.color,
            key.depth.then(|| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: key.state.write,
                depth_compare: key.state.compare.into(),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
        );
        self.skybox_pipelines.insert(key, pipeline);
    }

    fn ensure_effect_pipeline(&mut self, effect: &PostEffect, key: EffectPipelineKey) {
        if self.effect_pipelines.contains_key(&key) {
            return;
        }
        let source = format!("{EFFECT_COMMON}\n{}", effect_shader(effect));
        let pipeline =
            self.fullscreen_pipeline(effect.name(), &source, &self.effect_layout, key.color, None);
        self.effect_pipelines.insert(key, pipeline);
    }

    fn fullscreen_pipeline(
        &self,
        label: &str,
        source: &str,
        bind_group_layout: &wgpu::BindGroupLayout,
        color: wgpu::TextureFormat,
        depth_stencil: Option<wgpu::DepthStencilState>,
    ) -> wgpu::RenderPipeline {
        let device = &self.gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn upload_cubemap(&mut self, cubemap: &Cubemap) {
        if self.cubemaps.contains_key(&cubemap.id()) {
            return;
        }
        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("Skybox Cubemap"),
                size: wgpu::Extent3d {
                    width: cubemap.size(),
                    height: cubemap.size(),
                    depth_or_array_layers: 6,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &cubemap.to_rgba8(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        self.cubemaps.insert(cubemap.id(), view);
    }

    fn texture_view(&self, id: TextureId) -> Result<&wgpu::TextureView> {
        self.textures
            .get(&id)
            .map(|t| &t.view)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {id:?}")))
    }

    fn bind_group(&self, command: &Command, frame_uniforms: &wgpu::Buffer) -> Result<wgpu::BindGroup> {
        let buffer_entry = |slice: UniformSlice| wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: frame_uniforms,
                offset: 0,
                size: Some(slice.size),
            }),
        };
        let device = &self.gpu.device;
        Ok(match command {
            Command::Mesh { uniforms, .. } => device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Program Uniforms"),
                layout: &self.uniform_layout,
                entries: &[buffer_entry(*uniforms)],
            }),
            Command::Skybox {
                cubemap, uniforms, ..
            } => {
                let view = self
                    .cubemaps
                    .get(cubemap)
                    .ok_or_else(|| RenderError::Device("cubemap was not uploaded".into()))?;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Skybox Bind Group"),
                    layout: &self.skybox_layout,
                    entries: &[
                        buffer_entry(*uniforms),
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                })
            }
            Command::Fullscreen {
                inputs, uniforms, ..
            } => {
                let primary = inputs
                    .first()
                    .ok_or_else(|| RenderError::Device("post effect without inputs".into()))?;
                let source = self.texture_view(*primary)?;
                let tap = self.texture_view(*inputs.get(1).unwrap_or(primary))?;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Post Effect Bind Group"),
                    layout: &self.effect_layout,
                    entries: &[
                        buffer_entry(*uniforms),
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(tap),
                        },
                    ],
                })
            }
        })
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &RecordedPass,
        screen: &wgpu::TextureView,
        uniforms: &wgpu::Buffer,
    ) -> Result<()> {
        let color_view = match pass.target.color {
            Attachment::Screen => screen,
            Attachment::Texture(id) => self.texture_view(id)?,
        };
        let depth_view = match pass.target.depth {
            None => None,
            Some(Attachment::Screen) => Some(&self.screen_depth.view),
            Some(Attachment::Texture(id)) => Some(self.texture_view(id)?),
        };
        let bind_groups = pass
            .commands
            .iter()
            .map(|command| self.bind_group(command, uniforms))
            .collect::<Result<Vec<_>>>()?;

        let clear = pass.target.clear;
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: match clear {
                        Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                            r: c.color[0] as f64,
                            g: c.color[1] as f64,
                            b: c.color[2] as f64,
                            a: c.color[3] as f64,
                        }),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: match clear {
                        Some(c) => wgpu::LoadOp::Clear(c.depth),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for (command, bind_group) in pass.commands.iter().zip(&bind_groups) {
            match command {
                Command::Mesh {
                    pipeline,
                    mesh,
                    uniforms,
                } => {
                    let (Some(pipeline), Some(mesh)) =
                        (self.mesh_pipelines.get(pipeline), self.meshes.get(mesh))
                    else {
                        return Err(RenderError::Device("mesh draw lost its resources".into()));
                    };
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, bind_group, &[uniforms.offset]);
                    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                Command::Skybox {
                    pipeline, uniforms, ..
                } => {
                    let pipeline = self
                        .skybox_pipelines
                        .get(pipeline)
                        .ok_or_else(|| RenderError::Device("missing skybox pipeline".into()))?;
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, bind_group, &[uniforms.offset]);
                    render_pass.draw(0..3, 0..1);
                }
                Command::Fullscreen {
                    pipeline, uniforms, ..
                } => {
                    let pipeline = self
                        .effect_pipelines
                        .get(pipeline)
                        .ok_or_else(|| RenderError::Device("missing effect pipeline".into()))?;
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, bind_group, &[uniforms.offset]);
                    render_pass.draw(0..3, 0..1);
                }
            }
        }
        Ok(())
    }
}

impl RenderDevice for WgpuDevice {
    fn viewport(&self) -> (u32, u32) {
        if self.minimized {
            return (0, 0);
        }
        (self.gpu.width(), self.gpu.height())
    }

    /// A zero size reports a `0x0` viewport until the next real resize; the
    /// surface keeps its last configuration meanwhile.
    fn resize(&mut self, width: u32, height: u32) {
        let current = (self.gpu.width(), self.gpu.height());
        match surface_resize(current, self.minimized, (width, height)) {
            SurfaceResize::Minimize => self.minimized = true,
            SurfaceResize::Reconfigure => {
                self.minimized = false;
                if (width, height) != current {
                    self.gpu.resize(width, height);
                    self.screen_depth = create_depth(&self.gpu.device, width, height);
                }
            }
            SurfaceResize::Keep => {}
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Device(format!(
                "cannot create a {}x{} texture",
                desc.width, desc.height
            )));
        }
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let texture = create_texture(
            &self.gpu.device,
            "Render Target",
            desc.width,
            desc.height,
            desc.format.into(),
        );
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.frame.is_some() {
            self.pending_destroy.push(id);
        } else if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.frame.is_some() {
            return Err(RenderError::Device("frame already in progress".into()));
        }
        self.frame = Some(FrameRecording::default());
        Ok(())
    }

    fn begin_pass(&mut self, label: &str, target: &PassTarget) -> Result<()> {
        let color = self.color_format(target.color)?;
        match self.frame.as_mut() {
            Some(frame) if !frame.open => {
                frame.open = true;
                frame.passes.push(RecordedPass {
                    label: label.to_string(),
                    target: *target,
                    color,
                    commands: Vec::new(),
                });
                Ok(())
            }
            _ => Err(RenderError::Device(format!("cannot begin pass '{label}' here"))),
        }
    }

    fn draw_mesh(&mut self, draw: &MeshDraw<'_>) -> Result<()> {
        let (color, depth) = {
            let (pass, _) = self.open_pass()?;
            (pass.color, pass.target.depth.is_some())
        };
        let key = MeshPipelineKey {
            program: draw.program.id(),
            color,
            depth,
            state: draw.state,
        };
        self.ensure_mesh_pipeline(draw.program, key);
        let device = &self.gpu.device;
        self.meshes
            .entry(draw.mesh.id())
            .or_insert_with(|| GpuMesh::upload(device, draw.mesh));

        let alignment = self.uniform_alignment;
        let (pass, buffer) = self.open_pass()?;
        let uniforms = Self::push_uniforms(alignment, buffer, draw.uniforms.as_bytes())?;
        pass.commands.push(Command::Mesh {
            pipeline: key,
            mesh: draw.mesh.id(),
            uniforms,
        });
        Ok(())
    }

    fn draw_skybox(&mut self, cubemap: &Cubemap, camera: &Camera, depth: DepthState) -> Result<()> {
        let (color, has_depth) = {
            let (pass, _) = self.open_pass()?;
            (pass.color, pass.target.depth.is_some())
        };
        let key = SkyboxPipelineKey {
            color,
            depth: has_depth,
            state: depth,
        };
        self.ensure_skybox_pipeline(key);
        self.upload_cubemap(cubemap);

        let world_from_clip = camera.inverse_view_rotation_projection().to_cols_array();
        let alignment = self.uniform_alignment;
        let (pass, buffer) = self.open_pass()?;
        let uniforms = Self::push_uniforms(alignment, buffer, bytemuck::cast_slice(&world_from_clip))?;
        pass.commands.push(Command::Skybox {
            pipeline: key,
            cubemap: cubemap.id(),
            uniforms,
        });
        Ok(())
    }

    fn draw_fullscreen(&mut self, effect: &PostEffect, inputs: &[TextureId]) -> Result<()> {
        let primary = inputs
            .first()
            .ok_or_else(|| RenderError::Device(format!("{} has no input", effect.name())))?;
        let source = self
            .textures
            .get(primary)
            .ok_or_else(|| RenderError::Device(format!("unknown texture {primary:?}")))?;
        let texel = [1.0 / source.width as f32, 1.0 / source.height as f32];
        let color = self.open_pass()?.0.color;
        let key = EffectPipelineKey {
            effect: effect.name(),
            color,
        };
        self.ensure_effect_pipeline(effect, key);

        let block: EffectUniforms = effect.uniforms(texel);
        let alignment = self.uniform_alignment;
        let (pass, buffer) = self.open_pass()?;
        let uniforms = Self::push_uniforms(alignment, buffer, bytemuck::bytes_of(&block))?;
        pass.commands.push(Command::Fullscreen {
            pipeline: key,
            inputs: inputs.to_vec(),
            uniforms,
        });
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        match self.frame.as_mut() {
            Some(frame) if frame.open => {
                frame.open = false;
                Ok(())
            }
            _ => Err(RenderError::Device("end_pass without begin_pass".into())),
        }
    }

    fn end_frame(&mut self) -> Result<()> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| RenderError::Device("end_frame without begin_frame".into()))?;

        let output = self.gpu.surface.get_current_texture().map_err(device_error)?;
        let screen = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut uniform_bytes = frame.uniforms;
        if uniform_bytes.is_empty() {
            uniform_bytes.resize(self.uniform_alignment.max(16) as usize, 0);
        }
        let uniforms = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Uniforms"),
                contents: &uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Lantern Frame"),
            });
        for pass in &frame.passes {
            self.encode_pass(&mut encoder, pass, &screen, &uniforms)?;
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        for id in std::mem::take(&mut self.pending_destroy) {
            if let Some(texture) = self.textures.remove(&id) {
                texture.texture.destroy();
            }
        }
        log::trace!("submitted {} passes", frame.passes.len());
        Ok(())
    }

    fn abort_frame(&mut self) {
        if let Some(frame) = self.frame.take() {
            log::debug!("discarding {} recorded passes", frame.passes.len());
        }
        for id in std::mem::take(&mut self.pending_destroy) {
            if let Some(texture) = self.textures.remove(&id) {
                texture.texture.destroy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_resize_minimizes_until_a_real_size_arrives() {
        assert_eq!(surface_resize((800, 600), false, (0, 0)), SurfaceResize::Minimize);
        assert_eq!(surface_resize((800, 600), false, (800, 0)), SurfaceResize::Minimize);
        assert_eq!(surface_resize((800, 600), true, (800, 600)), SurfaceResize::Reconfigure);
        assert_eq!(surface_resize((800, 600), false, (800, 600)), SurfaceResize::Keep);
        assert_eq!(surface_resize((800, 600), false, (1024, 768)), SurfaceResize::Reconfigure);
    }

    #[test]
    fn uniform_slices_respect_alignment() {
        let mut buffer = Vec::new();
        let a = WgpuDevice::push_uniforms(256, &mut buffer, &[1; 48]).unwrap();
        let b = WgpuDevice::push_uniforms(256, &mut buffer, &[2; 432]).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(b.size.get(), 432);
        assert_eq!(buffer.len(), 256 + 432);
    }

    #[test]
    fn empty_uniform_blocks_are_rejected() {
        let mut buffer = Vec::new();
        assert!(WgpuDevice::push_uniforms(256, &mut buffer, &[]).is_err());
    }

    #[test]
    fn every_effect_has_a_fragment_shader() {
        use crate::post_process::{ColorGrade, ToneMapping};
        for effect in [
            PostEffect::BrightPass { min: 1.0, max: 2.0 },
            PostEffect::Blur { horizontal: true },
            PostEffect::BloomComposite { intensity: 1.0 },
            PostEffect::ColorGrade(ColorGrade::IDENTITY),
            PostEffect::ToneMap(ToneMapping::Reinhard),
        ] {
            assert!(effect_shader(&effect).contains("fn fs"), "{}", effect.name());
        }
        assert!(EFFECT_COMMON.contains("fn vs"));
    }
}
