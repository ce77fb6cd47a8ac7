//! CPU reference backend.
//!
//! [`SoftwareDevice`] implements [`RenderDevice`] with plain `Vec<Vec4>`
//! images: a bounding-box rasterizer with depth testing and
//! blending, a cubemap skybox, and the post-effect kernels from
//! [`post_process`](crate::post_process). It shades every mesh with the flat
//! `Color` uniform, transformed by `WorldMatrix` and `ViewProjMatrix`.
//!
//! Every command is also recorded as a [`DeviceEvent`], which makes the device
//! useful for inspecting what the pipeline did in a frame.

use std::collections::HashMap;
use std::path::Path;

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::camera::Camera;
use crate::device::{
    Attachment, MeshDraw, PassTarget, RenderDevice, TextureDesc, TextureFormat, TextureId,
};
use crate::error::{RenderError, Result};
use crate::material::{BlendState, DepthCompare, DepthState, RenderState};
use crate::mesh::MeshId;
use crate::post_process::{self, BLUR_WEIGHTS, PostEffect};
use crate::program::{ProgramId, UniformValue};
use crate::texture::Cubemap;

/// A command received by a [`SoftwareDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    CreateTexture { id: TextureId, desc: TextureDesc },
    DestroyTexture(TextureId),
    BeginFrame,
    BeginPass { label: String, target: PassTarget },
    DrawMesh { program: ProgramId, mesh: MeshId, state: RenderState },
    DrawSkybox { depth: DepthState },
    Fullscreen { effect: PostEffect, inputs: Vec<TextureId> },
    EndPass,
    EndFrame,
}

#[derive(Debug)]
struct ColorImage {
    width: u32,
    height: u32,
    format: TextureFormat,
    pixels: Vec<Vec4>,
}

impl ColorImage {
    fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            pixels: vec![Vec4::ZERO; (width * height) as usize],
        }
    }

    /// Nearest texel at integer coordinates, clamped to the edge.
    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Debug)]
struct DepthImage {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

/// Color and depth buffers the current pass writes.
struct Canvas<'a> {
    width: u32,
    height: u32,
    format: TextureFormat,
    color: &'a mut [Vec4],
    depth: Option<&'a mut [f32]>,
}

impl Canvas<'_> {
    /// Depth-tests, blends and stores one fragment.
    fn shade(&mut self, index: usize, z: f32, color: Vec4, blend: BlendState, depth: DepthState) {
        if let Some(buffer) = self.depth.as_deref_mut() {
            if !depth.compare.passes(z, buffer[index]) {
                return;
            }
            if depth.write {
                buffer[index] = z;
            }
        }
        let blended = blend.apply(color, self.color[index]);
        self.color[index] = quantize(blended, self.format);
    }
}

fn quantize(c: Vec4, format: TextureFormat) -> Vec4 {
    match format {
        TextureFormat::Rgba8Unorm => (c.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0,
        _ => c,
    }
}

/// A CPU implementation of [`RenderDevice`].
pub struct SoftwareDevice {
    width: u32,
    height: u32,
    screen: Vec<Vec4>,
    screen_depth: Vec<f32>,
    colors: HashMap<TextureId, ColorImage>,
    depths: HashMap<TextureId, DepthImage>,
    next_texture: u64,
    current_pass: Option<PassTarget>,
    in_frame: bool,
    events: Vec<DeviceEvent>,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        let mut device = Self {
            width: 0,
            height: 0,
            screen: Vec::new(),
            screen_depth: Vec::new(),
            colors: HashMap::new(),
            depths: HashMap::new(),
            next_texture: 1,
            current_pass: None,
            in_frame: false,
            events: Vec::new(),
        };
        device.allocate_screen(width, height);
        device
    }

    fn allocate_screen(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.screen = vec![Vec4::ZERO; (width * height) as usize];
        self.screen_depth = vec![1.0; (width * height) as usize];
    }

    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The displayed framebuffer, row-major, linear values.
    pub fn screen_pixels(&self) -> &[Vec4] {
        &self.screen
    }

    /// Overwrites a color texture's contents. Returns `false` if the texture
    /// does not exist or `pixels` has the wrong length.
    pub fn write_texture(&mut self, id: TextureId, pixels: &[Vec4]) -> bool {
        match self.colors.get_mut(&id) {
            Some(image) if image.pixels.len() == pixels.len() => {
                let format = image.format;
                for (dst, src) in image.pixels.iter_mut().zip(pixels) {
                    *dst = quantize(*src, format);
                }
                true
            }
            _ => false,
        }
    }

    pub fn read_texture(&self, id: TextureId) -> Option<&[Vec4]> {
        self.colors.get(&id).map(|image| image.pixels.as_slice())
    }

    /// Number of textures (color and depth) currently alive.
    pub fn live_textures(&self) -> usize {
        self.colors.len() + self.depths.len()
    }

    pub fn live_texture_sizes(&self) -> Vec<(u32, u32)> {
        self.colors
            .values()
            .map(|c| (c.width, c.height))
            .chain(self.depths.values().map(|d| (d.width, d.height)))
            .collect()
    }

    /// Writes the screen as an 8-bit PNG (values clamped to `[0, 1]`).
    pub fn save_png(&self, path: impl AsRef<Path>) -> std::result::Result<(), image::ImageError> {
        let image = image::RgbaImage::from_fn(self.width, self.height, |x, y| {
            let c = self.screen[(y * self.width + x) as usize].clamp(Vec4::ZERO, Vec4::ONE);
            let c = (c * 255.0).round();
            image::Rgba([c.x as u8, c.y as u8, c.z as u8, 255])
        });
        image.save(path)
    }

    fn canvas(&mut self) -> Result<Canvas<'_>> {
        let target = self
            .current_pass
            .ok_or_else(|| RenderError::Device("draw issued outside a render pass".into()))?;
        let (width, height, format, color) = match target.color {
            Attachment::Screen => (
                self.width,
                self.height,
                TextureFormat::Rgba16Float,
                self.screen.as_mut_slice(),
            ),
            Attachment::Texture(id) => {
                let image = self
                    .colors
                    .get_mut(&id)
                    .ok_or_else(|| RenderError::Device(format!("unknown color texture {id:?}")))?;
                (image.width, image.height, image.format, image.pixels.as_mut_slice())
            }
        };
        let depth = match target.depth {
            None => None,
            Some(Attachment::Screen) => Some(self.screen_depth.as_mut_slice()),
            Some(Attachment::Texture(id)) => {
                let image = self
                    .depths
                    .get_mut(&id)
                    .ok_or_else(|| RenderError::Device(format!("unknown depth texture {id:?}")))?;
                if (image.width, image.height) != (width, height) {
                    return Err(RenderError::Device("depth attachment size mismatch".into()));
                }
                Some(image.depth.as_mut_slice())
            }
        };
        Ok(Canvas {
            width,
            height,
            format,
            color,
            depth,
        })
    }

    fn source(&self, id: TextureId) -> Result<&ColorImage> {
        self.colors
            .get(&id)
            .ok_or_else(|| RenderError::Device(format!("unknown source texture {id:?}")))
    }
}

fn mat4_uniform(draw: &MeshDraw<'_>, name: &str) -> Mat4 {
    match draw
        .program
        .uniform_location(name)
        .and_then(|loc| draw.uniforms.read(loc, 0))
    {
        Some(UniformValue::Mat4(m)) => m,
        _ => Mat4::IDENTITY,
    }
}

fn color_uniform(draw: &MeshDraw<'_>) -> Vec4 {
    match draw
        .program
        .uniform_location("Color")
        .and_then(|loc| draw.uniforms.read(loc, 0))
    {
        Some(UniformValue::Vec4(c)) => c,
        Some(UniformValue::Vec3(c)) => c.extend(1.0),
        _ => Vec4::ONE,
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b - a).perp_dot(p - a)
}

impl RenderDevice for SoftwareDevice {
    fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 && (width, height) != (self.width, self.height) {
            self.allocate_screen(width, height);
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
        if desc.format.is_depth() {
            self.depths.insert(
                id,
                DepthImage {
                    width: desc.width,
                    height: desc.height,
                    depth: vec![1.0; (desc.width * desc.height) as usize],
                },
            );
        } else {
            self.colors
                .insert(id, ColorImage::new(desc.width, desc.height, desc.format));
        }
        self.events.push(DeviceEvent::CreateTexture { id, desc: *desc });
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.colors.remove(&id);
        self.depths.remove(&id);
        self.events.push(DeviceEvent::DestroyTexture(id));
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(RenderError::Device("frame already in progress".into()));
        }
        self.in_frame = true;
        self.events.push(DeviceEvent::BeginFrame);
        Ok(())
    }

    fn begin_pass(&mut self, label: &str, target: &PassTarget) -> Result<()> {
        if !self.in_frame || self.current_pass.is_some() {
            return Err(RenderError::Device(format!("cannot begin pass '{label}' here")));
        }
        self.current_pass = Some(*target);
        self.events.push(DeviceEvent::BeginPass {
            label: label.to_string(),
            target: *target,
        });
        if let Some(clear) = target.clear {
            let canvas = self.canvas()?;
            let color = quantize(Vec4::from_array(clear.color), canvas.format);
            canvas.color.fill(color);
            if let Some(depth) = canvas.depth {
                depth.fill(clear.depth);
            }
        }
        Ok(())
    }

    fn draw_mesh(&mut self, draw: &MeshDraw<'_>) -> Result<()> {
        let clip_from_model = mat4_uniform(draw, "ViewProjMatrix") * mat4_uniform(draw, "WorldMatrix");
        let color = color_uniform(draw);
        self.events.push(DeviceEvent::DrawMesh {
            program: draw.program.id(),
            mesh: draw.mesh.id(),
            state: draw.state,
        });

        let mut canvas = self.canvas()?;
        let size = Vec2::new(canvas.width as f32, canvas.height as f32);
        for tri in draw.mesh.triangles() {
            let clip = tri.map(|v| clip_from_model * Vec3::from_array(v.position).extend(1.0));
            if clip.iter().any(|c| c.w <= 1e-6) {
                continue;
            }
            let ndc = clip.map(|c| c.xyz() / c.w);
            let screen = ndc.map(|n| Vec2::new((n.x * 0.5 + 0.5) * size.x, (0.5 - n.y * 0.5) * size.y));
            let area = edge(screen[0], screen[1], screen[2]);
            if area.abs() < f32::EPSILON {
                continue;
            }

            let min = screen[0].min(screen[1]).min(screen[2]).floor().max(Vec2::ZERO);
            let max = screen[0].max(screen[1]).max(screen[2]).ceil().min(size);
            for y in min.y as u32..max.y as u32 {
                for x in min.x as u32..max.x as u32 {
                    let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                    let w0 = edge(screen[1], screen[2], p) / area;
                    let w1 = edge(screen[2], screen[0], p) / area;
                    let w2 = edge(screen[0], screen[1], p) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }
                    let z = w0 * ndc[0].z + w1 * ndc[1].z + w2 * ndc[2].z;
                    if !(0.0..=1.0).contains(&z) {
                        continue;
                    }
                    let index = (y * canvas.width + x) as usize;
                    canvas.shade(index, z, color, draw.state.blend, draw.state.depth);
                }
            }
        }
        Ok(())
    }

    fn draw_skybox(&mut self, cubemap: &Cubemap, camera: &Camera, depth: DepthState) -> Result<()> {
        self.events.push(DeviceEvent::DrawSkybox { depth });
        let world_from_clip = camera.inverse_view_rotation_projection();
        let mut canvas = self.canvas()?;
        let (width, height) = (canvas.width, canvas.height);
        for y in 0..height {
            for x in 0..width {
                let ndc = Vec2::new(
                    (x as f32 + 0.5) / width as f32 * 2.0 - 1.0,
                    1.0 - (y as f32 + 0.5) / height as f32 * 2.0,
                );
                let world = world_from_clip * Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
                let dir = (world.xyz() / world.w).normalize_or_zero();
                let color = cubemap.sample(dir);
                canvas.shade((y * width + x) as usize, 1.0, color, BlendState::REPLACE, depth);
            }
        }
        Ok(())
    }

    fn draw_fullscreen(&mut self, effect: &PostEffect, inputs: &[TextureId]) -> Result<()> {
        self.events.push(DeviceEvent::Fullscreen {
            effect: *effect,
            inputs: inputs.to_vec(),
        });
        if inputs.len() < effect.input_count() {
            return Err(RenderError::Device(format!(
                "{} needs {} inputs, got {}",
                effect.name(),
                effect.input_count(),
                inputs.len()
            )));
        }

        let (width, height) = {
            let canvas = self.canvas()?;
            (canvas.width, canvas.height)
        };
        let primary = self.source(inputs[0])?;
        // Maps a destination pixel to the nearest source texel.
        let fetch = |image: &ColorImage, x: u32, y: u32, dx: i64, dy: i64| {
            let sx = (x as u64 * image.width as u64 / width as u64) as i64;
            let sy = (y as u64 * image.height as u64 / height as u64) as i64;
            image.texel(sx + dx, sy + dy)
        };

        let mut output = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let c = fetch(primary, x, y, 0, 0);
                let pixel = match *effect {
                    PostEffect::BrightPass { min, max } => post_process::bright_pass(c, min, max),
                    PostEffect::Blur { horizontal } => {
                        let (ux, uy) = if horizontal { (1, 0) } else { (0, 1) };
                        let mut sum = c * BLUR_WEIGHTS[0];
                        for (i, weight) in BLUR_WEIGHTS.iter().enumerate().skip(1) {
                            let i = i as i64;
                            sum += fetch(primary, x, y, ux * i, uy * i) * *weight;
                            sum += fetch(primary, x, y, -ux * i, -uy * i) * *weight;
                        }
                        sum.xyz().extend(c.w)
                    }
                    PostEffect::BloomComposite { intensity } => {
                        let scene = fetch(self.source(inputs[1])?, x, y, 0, 0);
                        post_process::bloom_composite(scene, c, intensity)
                    }
                    PostEffect::ColorGrade(grade) => post_process::color_grade(c, &grade),
                    PostEffect::ToneMap(mode) => post_process::tone_map(c, mode),
                };
                output.push(pixel);
            }
        }

        let mut canvas = self.canvas()?;
        for (index, pixel) in output.into_iter().enumerate() {
            canvas.shade(
                index,
                0.0,
                pixel,
                BlendState::REPLACE,
                DepthState::read_only(DepthCompare::Always),
            );
        }
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        if self.current_pass.take().is_none() {
            return Err(RenderError::Device("end_pass without begin_pass".into()));
        }
        self.events.push(DeviceEvent::EndPass);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.in_frame {
            return Err(RenderError::Device("end_frame without begin_frame".into()));
        }
        self.in_frame = false;
        self.current_pass = None;
        self.events.push(DeviceEvent::EndFrame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.in_frame = false;
        self.current_pass = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Clear;
    use crate::mesh::Mesh;
    use crate::program::{ActiveProgram, ShaderProgram, UniformBlock};

    fn begin_screen(device: &mut SoftwareDevice) {
        device.begin_frame().unwrap();
        device
            .begin_pass(
                "test",
                &PassTarget::screen().with_clear(Some(Clear {
                    color: [0.0, 0.0, 0.0, 1.0],
                    depth: 1.0,
                })),
            )
            .unwrap();
    }

    fn quad_uniforms(program: &ShaderProgram, z: f32, color: Vec4) -> UniformBlock {
        let mut block = UniformBlock::new(program.layout());
        let mut active = ActiveProgram::new(program, &mut block);
        // Scale the unit plane into a full-screen quad at depth `z`.
        active.set_named(
            "WorldMatrix",
            Mat4::from_translation(Vec3::new(0.0, 0.0, z))
                * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
                * Mat4::from_scale(Vec3::splat(2.0)),
        );
        active.set_named("ViewProjMatrix", Mat4::IDENTITY);
        active.set_named("Color", color);
        block
    }

    #[test]
    fn nearer_geometry_wins_the_depth_test() {
        let program = ShaderProgram::standard_lit();
        let plane = Mesh::plane(1.0);
        let mut device = SoftwareDevice::new(8, 8);
        begin_screen(&mut device);

        let near = quad_uniforms(&program, 0.25, Vec4::new(1.0, 0.0, 0.0, 1.0));
        let far = quad_uniforms(&program, 0.75, Vec4::new(0.0, 1.0, 0.0, 1.0));
        for uniforms in [&near, &far] {
            device
                .draw_mesh(&MeshDraw {
                    program: &program,
                    uniforms,
                    mesh: &plane,
                    state: RenderState::default(),
                })
                .unwrap();
        }
        device.end_pass().unwrap();
        device.end_frame().unwrap();

        assert!(device.screen_pixels().iter().all(|p| *p == Vec4::new(1.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn skybox_fills_only_far_pixels_after_geometry() {
        let program = ShaderProgram::standard_lit();
        let plane = Mesh::plane(0.5);
        let mut device = SoftwareDevice::new(8, 8);
        begin_screen(&mut device);

        let uniforms = quad_uniforms(&program, 0.5, Vec4::new(1.0, 0.0, 0.0, 1.0));
        device
            .draw_mesh(&MeshDraw {
                program: &program,
                uniforms: &uniforms,
                mesh: &plane,
                state: RenderState::default(),
            })
            .unwrap();
        device
            .draw_skybox(
                &Cubemap::solid(Vec4::new(0.0, 0.0, 1.0, 1.0)),
                &Camera::default(),
                DepthState::read_only(DepthCompare::LessEqual),
            )
            .unwrap();
        device.end_pass().unwrap();
        device.end_frame().unwrap();

        let screen = device.screen_pixels();
        assert_eq!(screen[4 * 8 + 4], Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(screen[0], Vec4::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn draws_outside_a_pass_are_device_errors() {
        let mut device = SoftwareDevice::new(4, 4);
        let err = device
            .draw_skybox(&Cubemap::solid(Vec4::ONE), &Camera::default(), DepthState::LESS)
            .unwrap_err();
        assert!(matches!(err, RenderError::Device(_)));
    }

    #[test]
    fn rgba8_targets_quantize() {
        let mut device = SoftwareDevice::new(2, 2);
        let id = device
            .create_texture(&TextureDesc {
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
            })
            .unwrap();
        assert!(device.write_texture(id, &[Vec4::splat(2.0); 4]));
        assert_eq!(device.read_texture(id).unwrap()[0], Vec4::ONE);
        assert!(!device.write_texture(id, &[Vec4::ONE; 3]));
    }

    #[test]
    fn resize_ignores_zero() {
        let mut device = SoftwareDevice::new(4, 4);
        device.resize(0, 8);
        assert_eq!(device.viewport(), (4, 4));
        device.resize(8, 2);
        assert_eq!(device.screen_pixels().len(), 16);
    }
}
