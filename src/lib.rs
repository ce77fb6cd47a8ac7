//! # Lantern
//!
//! **A forward renderer built from ordered render passes.**
//!
//! A [`Renderer`] runs a fixed sequence of passes every frame: a skybox, forward
//! lighting of submitted meshes grouped by shader program, then a chain of
//! full-screen post effects (bloom, color grading, tone mapping) ping-ponging
//! between pooled render targets.
//!
//! Shader programs are registered together with a [`UniformBinder`]: two
//! callbacks that upload per-draw transforms and light arrays. The defaults,
//! [`default_update_transform_function`] and [`default_update_lights_function`],
//! cover programs that follow the standard uniform names.
//!
//! ## Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use lantern::*;
//!
//! let program = Rc::new(ShaderProgram::standard_lit());
//! let mut renderer = Renderer::new(RendererConfig::default());
//! renderer
//!     .register_shader_program(
//!         program.clone(),
//!         default_update_transform_function(&program),
//!         default_update_lights_function(&program),
//!     )
//!     .unwrap();
//! renderer.add_render_pass(RenderPass::skybox(Rc::new(Cubemap::solid(Vec4::ONE)))).unwrap();
//! renderer.add_render_pass(RenderPass::forward()).unwrap();
//! renderer.add_post_effects(&PostProcessSettings::default()).unwrap();
//!
//! let material = Rc::new(Material::new(program).with_uniform("Color", Vec4::new(1.0, 0.0, 0.0, 1.0)));
//! renderer.add_light(Light::directional(Vec3::new(-0.3, -1.0, -0.3)));
//! renderer.submit(DrawSubmission::new(Rc::new(Mesh::cube()), material, Mat4::IDENTITY));
//!
//! let mut device = SoftwareDevice::new(64, 64);
//! let stats = renderer.render(&mut device).unwrap();
//! // sky, cube, then bright pass, six blurs, composite, grade and tone map
//! assert_eq!(stats.draw_calls, 12);
//! ```
//!
//! Two backends implement [`RenderDevice`]: [`WgpuDevice`] draws to a window
//! through wgpu, and [`SoftwareDevice`] is a CPU reference that also records
//! every command it receives.

mod binder;
mod camera;
mod config;
mod device;
mod error;
mod gpu;
mod light;
mod material;
mod mesh;
mod post_process;
mod program;
mod render_graph;
mod software;
mod texture;

pub use binder::{
    LightUpdateFn, TransformUpdateFn, UniformBinder, default_update_lights_function,
    default_update_transform_function,
};
pub use camera::Camera;
pub use config::{Config, ConfigError, LightOverflowPolicy, RendererConfig};
pub use device::{
    Attachment, Clear, MeshDraw, PassTarget, RenderDevice, TextureDesc, TextureFormat, TextureId,
};
pub use error::{ErrorCategory, RenderError, Result};
pub use gpu::{GpuContext, WgpuDevice};
pub use light::Light;
pub use material::{
    BlendEquation, BlendFactor, BlendState, DepthCompare, DepthState, Material, MaterialHandle,
    RenderQueue, RenderState,
};
pub use mesh::{Mesh, MeshHandle, MeshId, Transform, Vertex3d};
pub use post_process::{
    ColorGrade, EffectUniforms, PostEffect, PostProcessSettings, ToneMapping, bloom_composite,
    bright_pass, color_grade, luminance, tone_map,
};
pub use program::{
    ActiveProgram, MAX_LIGHTS, ProgramId, ShaderProgram, ShaderProgramHandle, UniformBlock,
    UniformLayout, UniformLocation, UniformType, UniformValue,
};
pub use render_graph::{
    ColorFormat, DrawSubmission, ForwardPass, FrameStats, PassKind, PassState, PostEffectPass,
    ProgramGroup, RenderPass, RenderTarget, RenderTargetChain, Renderer, SkyboxPass,
    SubmissionQueue, TargetFormat, TargetHandle, Tap,
};
pub use software::{DeviceEvent, SoftwareDevice};
pub use texture::{CubeFace, Cubemap, CubemapHandle, CubemapId};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
