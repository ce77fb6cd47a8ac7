//! The seam between the pass pipeline and a GPU backend.
//!
//! The renderer never touches wgpu directly. It drives a [`RenderDevice`]
//! through a small command vocabulary:
//!
//! ```text
//! begin_frame
//!   begin_pass(target) ── draw_mesh / draw_skybox / draw_fullscreen ── end_pass
//!   begin_pass(target) ── ...                                        ── end_pass
//! end_frame
//! ```
//!
//! Two backends implement it: [`WgpuDevice`](crate::WgpuDevice) for real GPUs
//! and [`SoftwareDevice`](crate::SoftwareDevice), a CPU reference used by
//! tests and the headless viewer.

use crate::camera::Camera;
use crate::error::Result;
use crate::material::{DepthState, RenderState};
use crate::mesh::Mesh;
use crate::post_process::PostEffect;
use crate::program::{ShaderProgram, UniformBlock};
use crate::texture::Cubemap;

/// Identity of a device-owned texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u64);

/// Pixel formats for offscreen textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Where a pass writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attachment {
    /// The displayed framebuffer (and, for depth, the device's screen depth buffer).
    Screen,
    Texture(TextureId),
}

/// Clear values applied when a pass begins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Clear {
    pub color: [f32; 4],
    pub depth: f32,
}

/// Color and optional depth attachment of one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassTarget {
    pub color: Attachment,
    pub depth: Option<Attachment>,
    /// `None` loads the existing contents.
    pub clear: Option<Clear>,
}

impl PassTarget {
    /// The screen with its depth buffer, contents loaded.
    pub fn screen() -> Self {
        Self {
            color: Attachment::Screen,
            depth: Some(Attachment::Screen),
            clear: None,
        }
    }

    pub fn with_clear(mut self, clear: Option<Clear>) -> Self {
        self.clear = clear;
        self
    }
}

/// One mesh draw with fully resolved uniform state.
pub struct MeshDraw<'a> {
    pub program: &'a ShaderProgram,
    pub uniforms: &'a UniformBlock,
    pub mesh: &'a Mesh,
    pub state: RenderState,
}

/// A backend capable of executing the pass pipeline.
///
/// Draw calls are only valid between `begin_pass` and `end_pass`, and passes
/// only between `begin_frame` and `end_frame`.
pub trait RenderDevice {
    /// Current output size in pixels.
    fn viewport(&self) -> (u32, u32);

    /// Window (or offscreen output) resize. Zero sizes are ignored.
    fn resize(&mut self, width: u32, height: u32);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    fn destroy_texture(&mut self, id: TextureId);

    fn begin_frame(&mut self) -> Result<()>;

    fn begin_pass(&mut self, label: &str, target: &PassTarget) -> Result<()>;

    fn draw_mesh(&mut self, draw: &MeshDraw<'_>) -> Result<()>;

    /// Draws `cubemap` behind everything at the far plane.
    fn draw_skybox(&mut self, cubemap: &Cubemap, camera: &Camera, depth: DepthState) -> Result<()>;

    /// Full-screen triangle running `effect`. `inputs[0]` is the primary
    /// source, the rest are taps in declaration order.
    fn draw_fullscreen(&mut self, effect: &PostEffect, inputs: &[TextureId]) -> Result<()>;

    fn end_pass(&mut self) -> Result<()>;

    /// Submits the frame (and presents, for windowed backends).
    fn end_frame(&mut self) -> Result<()>;

    /// Drops whatever was recorded since `begin_frame` after a failed frame.
    /// Does nothing outside a frame.
    fn abort_frame(&mut self) {}
}
