//! Shader programs and their CPU-side uniform state.
//!
//! A [`ShaderProgram`] is WGSL source plus a [`UniformLayout`] describing the
//! program's single uniform block (`@group(0) @binding(0)`). The layout follows
//! WGSL's uniform address space rules, so offsets computed here match what the
//! shader declares:
//!
//! | Type     | Size | Align |
//! |----------|------|-------|
//! | `f32`    | 4    | 4     |
//! | `i32`    | 4    | 4     |
//! | `vec2f`  | 8    | 8     |
//! | `vec3f`  | 12   | 16    |
//! | `vec4f`  | 16   | 16    |
//! | `mat4x4f`| 64   | 16    |
//!
//! Arrays are 16-byte aligned with a stride rounded up to 16, and the block size
//! is rounded up to 16. Scalar arrays therefore have to be declared as
//! `array<vec4f, N>` on the WGSL side.
//!
//! Uniform values live in a [`UniformBlock`] owned by the renderer, one per
//! registered program. Values persist between frames, so a callback that skips
//! re-uploading camera uniforms leaves the previous values in place.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Process-unique identity of a shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u32);

impl ProgramId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scalar, vector and matrix types a uniform can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    /// Size in bytes of one element.
    pub const fn size(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat4 => 64,
        }
    }

    /// Alignment in bytes of one element in the uniform address space.
    pub const fn align(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat4 => 16,
        }
    }
}

/// A value that can be written into a uniform slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// The uniform type this value fills.
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Int(v as i32)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Where a named uniform lives inside a program's uniform block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLocation {
    offset: u32,
    ty: UniformType,
    len: u32,
    stride: u32,
}

impl UniformLocation {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn ty(&self) -> UniformType {
        self.ty
    }

    /// Number of elements (1 for non-array uniforms).
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}

#[derive(Clone, Debug)]
struct UniformField {
    name: String,
    location: UniformLocation,
}

/// Byte layout of a program's uniform block.
#[derive(Clone, Debug, Default)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u32,
}

impl UniformLayout {
    pub fn builder() -> UniformLayoutBuilder {
        UniformLayoutBuilder::default()
    }

    /// Total block size in bytes, a multiple of 16.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.location)
    }

    /// Field names with their locations, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, UniformLocation)> {
        self.fields.iter().map(|f| (f.name.as_str(), f.location))
    }
}

/// Builds a [`UniformLayout`] field by field, in WGSL declaration order.
#[derive(Debug, Default)]
pub struct UniformLayoutBuilder {
    fields: Vec<UniformField>,
    cursor: u32,
}

impl UniformLayoutBuilder {
    /// Appends a single uniform.
    pub fn field(mut self, name: &str, ty: UniformType) -> Self {
        let offset = round_up(ty.align(), self.cursor);
        self.push(name, offset, ty, 1, ty.size());
        self.cursor = offset + ty.size();
        self
    }

    /// Appends a fixed-size array uniform.
    pub fn array(mut self, name: &str, ty: UniformType, len: u32) -> Self {
        let stride = round_up(16, round_up(ty.align(), ty.size()));
        let offset = round_up(16, self.cursor);
        self.push(name, offset, ty, len, stride);
        self.cursor = offset + stride * len;
        self
    }

    pub fn build(self) -> UniformLayout {
        UniformLayout {
            fields: self.fields,
            size: round_up(16, self.cursor),
        }
    }

    fn push(&mut self, name: &str, offset: u32, ty: UniformType, len: u32, stride: u32) {
        debug_assert!(
            self.fields.iter().all(|f| f.name != name),
            "duplicate uniform '{name}'"
        );
        self.fields.push(UniformField {
            name: name.to_string(),
            location: UniformLocation {
                offset,
                ty,
                len,
                stride,
            },
        });
    }
}

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

/// CPU-side storage for one program's uniform block.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBlock {
    bytes: Vec<u8>,
}

impl UniformBlock {
    /// A zero-filled block sized for `layout`.
    pub fn new(layout: &UniformLayout) -> Self {
        Self {
            bytes: vec![0; layout.size() as usize],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Writes `value` into element `index` of `location`.
    ///
    /// Returns `false` (and writes nothing) on a type mismatch or an
    /// out-of-range index.
    pub fn write(&mut self, location: UniformLocation, index: u32, value: UniformValue) -> bool {
        if value.ty() != location.ty || index >= location.len {
            return false;
        }
        let start = (location.offset + index * location.stride) as usize;
        let mut scratch = [0u8; 64];
        let encoded: &[u8] = match value {
            UniformValue::Float(v) => {
                scratch[..4].copy_from_slice(bytemuck::bytes_of(&v));
                &scratch[..4]
            }
            UniformValue::Int(v) => {
                scratch[..4].copy_from_slice(bytemuck::bytes_of(&v));
                &scratch[..4]
            }
            UniformValue::Vec2(v) => {
                scratch[..8].copy_from_slice(bytemuck::cast_slice(&v.to_array()));
                &scratch[..8]
            }
            UniformValue::Vec3(v) => {
                scratch[..12].copy_from_slice(bytemuck::cast_slice(&v.to_array()));
                &scratch[..12]
            }
            UniformValue::Vec4(v) => {
                scratch[..16].copy_from_slice(bytemuck::cast_slice(&v.to_array()));
                &scratch[..16]
            }
            UniformValue::Mat4(m) => {
                scratch.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array()));
                &scratch[..]
            }
        };
        match self.bytes.get_mut(start..start + encoded.len()) {
            Some(slot) => {
                slot.copy_from_slice(encoded);
                true
            }
            None => false,
        }
    }

    /// Reads element `index` of `location` back out of the block.
    pub fn read(&self, location: UniformLocation, index: u32) -> Option<UniformValue> {
        if index >= location.len {
            return None;
        }
        let start = (location.offset + index * location.stride) as usize;
        let raw = self.bytes.get(start..start + location.ty.size() as usize)?;
        let floats = |n: usize| -> Vec<f32> {
            raw[..n * 4]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        };
        Some(match location.ty {
            UniformType::Float => UniformValue::Float(floats(1)[0]),
            UniformType::Int => UniformValue::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            UniformType::Vec2 => UniformValue::Vec2(Vec2::from_slice(&floats(2))),
            UniformType::Vec3 => UniformValue::Vec3(Vec3::from_slice(&floats(3))),
            UniformType::Vec4 => UniformValue::Vec4(Vec4::from_slice(&floats(4))),
            UniformType::Mat4 => UniformValue::Mat4(Mat4::from_cols_slice(&floats(16))),
        })
    }
}

/// A compiled-shader description: identity, WGSL source and uniform layout.
///
/// Programs are shared as [`ShaderProgramHandle`]s; the renderer only keeps a
/// clone of the handle and keys everything on [`ShaderProgram::id`].
///
/// The WGSL must expose a vertex entry point `vs` taking
/// [`Vertex3d`](crate::Vertex3d) attributes at locations 0..=2, a fragment entry
/// point `fs`, and the uniform block at `@group(0) @binding(0)`.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    label: String,
    source: Cow<'static, str>,
    layout: UniformLayout,
}

/// Shared, non-owning reference to a shader program.
pub type ShaderProgramHandle = Rc<ShaderProgram>;

impl ShaderProgram {
    pub fn new(
        label: impl Into<String>,
        source: impl Into<Cow<'static, str>>,
        layout: UniformLayout,
    ) -> Self {
        Self {
            id: ProgramId::next(),
            label: label.into(),
            source: source.into(),
            layout,
        }
    }

    /// The built-in lit program: Lambert diffuse over up to [`MAX_LIGHTS`]
    /// lights per draw, plus an ambient term gated by `LightIndirect`.
    ///
    /// Its uniform names match what
    /// [`default_update_lights_function`](crate::Renderer::default_update_lights_function)
    /// writes.
    pub fn standard_lit() -> Self {
        let layout = UniformLayout::builder()
            .field("WorldMatrix", UniformType::Mat4)
            .field("ViewProjMatrix", UniformType::Mat4)
            .field("CameraPosition", UniformType::Vec3)
            .field("LightIndirect", UniformType::Int)
            .field("Color", UniformType::Vec4)
            .field("AmbientColor", UniformType::Vec3)
            .field("LightCount", UniformType::Int)
            .array("LightColor", UniformType::Vec3, MAX_LIGHTS)
            .array("LightPosition", UniformType::Vec3, MAX_LIGHTS)
            .array("LightDirection", UniformType::Vec3, MAX_LIGHTS)
            .array("LightAttenuation", UniformType::Vec4, MAX_LIGHTS)
            .build();
        Self::new("Standard Lit", include_str!("shaders/lit.wgsl"), layout)
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.layout.location(name)
    }
}

/// Light array length of [`ShaderProgram::standard_lit`].
pub const MAX_LIGHTS: u32 = 4;

/// A program bound for uniform updates.
///
/// This is what binder callbacks receive: the program (for locations) together
/// with its persistent uniform block.
pub struct ActiveProgram<'a> {
    program: &'a ShaderProgram,
    block: &'a mut UniformBlock,
}

impl<'a> ActiveProgram<'a> {
    pub fn new(program: &'a ShaderProgram, block: &'a mut UniformBlock) -> Self {
        Self { program, block }
    }

    pub fn program(&self) -> &ShaderProgram {
        self.program
    }

    pub fn set_uniform(&mut self, location: UniformLocation, value: impl Into<UniformValue>) {
        self.set_uniform_at(location, 0, value);
    }

    /// Sets element `index` of an array uniform.
    pub fn set_uniform_at(
        &mut self,
        location: UniformLocation,
        index: u32,
        value: impl Into<UniformValue>,
    ) {
        let value = value.into();
        if !self.block.write(location, index, value) {
            log::warn!(
                "program '{}': rejected {:?} write at offset {} index {}",
                self.program.label(),
                value.ty(),
                location.offset(),
                index
            );
        }
    }

    /// Sets a uniform by name. Returns `false` if the program has no such uniform.
    pub fn set_named(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        match self.program.uniform_location(name) {
            Some(location) => {
                self.set_uniform(location, value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, location: UniformLocation) -> Option<UniformValue> {
        self.block.read(location, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_lit_layout_matches_wgsl_offsets() {
        let program = ShaderProgram::standard_lit();
        let layout = program.layout();
        let offset = |name: &str| layout.location(name).unwrap().offset();

        assert_eq!(offset("WorldMatrix"), 0);
        assert_eq!(offset("ViewProjMatrix"), 64);
        assert_eq!(offset("CameraPosition"), 128);
        // An i32 packs into the vec3's trailing padding.
        assert_eq!(offset("LightIndirect"), 140);
        assert_eq!(offset("Color"), 144);
        assert_eq!(offset("AmbientColor"), 160);
        assert_eq!(offset("LightCount"), 172);
        assert_eq!(offset("LightColor"), 176);
        assert_eq!(offset("LightPosition"), 240);
        assert_eq!(offset("LightDirection"), 304);
        assert_eq!(offset("LightAttenuation"), 368);
        assert_eq!(layout.size(), 432);
        assert_eq!(layout.location("LightColor").unwrap().stride(), 16);
    }

    #[test]
    fn vec2_after_scalar_is_eight_aligned() {
        let layout = UniformLayout::builder()
            .field("a", UniformType::Float)
            .field("b", UniformType::Vec2)
            .build();
        assert_eq!(layout.location("b").unwrap().offset(), 8);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn scalars_land_at_their_offsets() {
        let layout = UniformLayout::builder()
            .field("Exposure", UniformType::Float)
            .field("Count", UniformType::Int)
            .build();
        let mut block = UniformBlock::new(&layout);
        let exposure = layout.location("Exposure").unwrap();
        let count = layout.location("Count").unwrap();

        assert!(block.write(exposure, 0, UniformValue::Float(1.5)));
        assert!(block.write(count, 0, UniformValue::Int(-3)));

        assert_eq!(block.read(exposure, 0), Some(UniformValue::Float(1.5)));
        assert_eq!(block.read(count, 0), Some(UniformValue::Int(-3)));
        assert_eq!(&block.as_bytes()[..4], &1.5f32.to_le_bytes());
        assert_eq!(&block.as_bytes()[4..8], &(-3i32).to_le_bytes());
    }

    #[test]
    fn block_rejects_mismatched_writes() {
        let layout = UniformLayout::builder()
            .field("Exposure", UniformType::Float)
            .array("Colors", UniformType::Vec3, 2)
            .build();
        let mut block = UniformBlock::new(&layout);
        let exposure = layout.location("Exposure").unwrap();
        let colors = layout.location("Colors").unwrap();

        assert!(!block.write(exposure, 0, UniformValue::Int(1)));
        assert!(!block.write(colors, 2, Vec3::ONE.into()));
        assert!(block.write(colors, 1, Vec3::new(0.5, 0.25, 1.0).into()));
        assert_eq!(
            block.read(colors, 1),
            Some(UniformValue::Vec3(Vec3::new(0.5, 0.25, 1.0)))
        );
        assert_eq!(block.read(colors, 0), Some(UniformValue::Vec3(Vec3::ZERO)));
    }

    #[test]
    fn matrices_are_stored_column_major() {
        let layout = UniformLayout::builder()
            .field("M", UniformType::Mat4)
            .build();
        let mut block = UniformBlock::new(&layout);
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert!(block.write(layout.location("M").unwrap(), 0, m.into()));

        let floats: &[f32] = bytemuck::cast_slice(block.as_bytes());
        assert_eq!(&floats[12..15], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn program_ids_are_unique() {
        let a = ShaderProgram::new("a", "", UniformLayout::default());
        let b = ShaderProgram::new("b", "", UniformLayout::default());
        assert_ne!(a.id(), b.id());
    }
}
