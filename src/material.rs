//! Materials: a shader program plus the fixed-function state and uniform
//! values it is drawn with.
//!
//! ```
//! use std::rc::Rc;
//! use glam::{Vec3, Vec4};
//! use lantern::{BlendState, Material, ShaderProgram};
//!
//! let program = Rc::new(ShaderProgram::standard_lit());
//! let material = Material::new(program)
//!     .with_blend(BlendState::ALPHA)
//!     .with_uniform("Color", Vec4::ONE)
//!     .with_uniform("AmbientColor", Vec3::splat(0.25));
//! assert_eq!(material.uniforms().len(), 2);
//! ```

use std::rc::Rc;

use glam::Vec4;

use crate::program::{ActiveProgram, ShaderProgramHandle, UniformValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

impl BlendFactor {
    fn weight(self, src: Vec4, dst: Vec4) -> Vec4 {
        match self {
            BlendFactor::Zero => Vec4::ZERO,
            BlendFactor::One => Vec4::ONE,
            BlendFactor::SrcColor => src,
            BlendFactor::OneMinusSrcColor => Vec4::ONE - src,
            BlendFactor::SrcAlpha => Vec4::splat(src.w),
            BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
            BlendFactor::DstColor => dst,
            BlendFactor::OneMinusDstColor => Vec4::ONE - dst,
            BlendFactor::DstAlpha => Vec4::splat(dst.w),
            BlendFactor::OneMinusDstAlpha => Vec4::splat(1.0 - dst.w),
        }
    }
}

impl From<BlendFactor> for wgpu::BlendFactor {
    fn from(factor: BlendFactor) -> Self {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcColor => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DstColor => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }
}

/// Color blending: `equation(src * src_factor, dst * dst_factor)`.
///
/// The same factors apply to the alpha channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub equation: BlendEquation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendState {
    /// Overwrite the destination.
    pub const REPLACE: Self = Self {
        equation: BlendEquation::Add,
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    /// Classic alpha blending.
    pub const ALPHA: Self = Self {
        equation: BlendEquation::Add,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    /// Accumulate, used for extra light rounds.
    pub const ADDITIVE: Self = Self {
        equation: BlendEquation::Add,
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };

    /// Blends `src` over `dst` on the CPU.
    pub fn apply(&self, src: Vec4, dst: Vec4) -> Vec4 {
        let s = src * self.src.weight(src, dst);
        let d = dst * self.dst.weight(src, dst);
        match self.equation {
            BlendEquation::Add => s + d,
            BlendEquation::Subtract => s - d,
            BlendEquation::ReverseSubtract => d - s,
            // min/max ignore factors, as on the GPU
            BlendEquation::Min => src.min(dst),
            BlendEquation::Max => src.max(dst),
        }
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::REPLACE
    }
}

impl From<BlendState> for wgpu::BlendState {
    fn from(state: BlendState) -> Self {
        let operation = match state.equation {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
            BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendEquation::Min => wgpu::BlendOperation::Min,
            BlendEquation::Max => wgpu::BlendOperation::Max,
        };
        let (src_factor, dst_factor) = match state.equation {
            BlendEquation::Min | BlendEquation::Max => {
                (wgpu::BlendFactor::One, wgpu::BlendFactor::One)
            }
            _ => (state.src.into(), state.dst.into()),
        };
        let component = wgpu::BlendComponent {
            src_factor,
            dst_factor,
            operation,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthCompare {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    NotEqual,
    Always,
}

impl DepthCompare {
    /// Whether an `incoming` depth passes against the `stored` one.
    pub fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            DepthCompare::Never => false,
            DepthCompare::Less => incoming < stored,
            DepthCompare::LessEqual => incoming <= stored,
            DepthCompare::Equal => incoming == stored,
            DepthCompare::Greater => incoming > stored,
            DepthCompare::GreaterEqual => incoming >= stored,
            DepthCompare::NotEqual => incoming != stored,
            DepthCompare::Always => true,
        }
    }
}

impl From<DepthCompare> for wgpu::CompareFunction {
    fn from(compare: DepthCompare) -> Self {
        match compare {
            DepthCompare::Never => wgpu::CompareFunction::Never,
            DepthCompare::Less => wgpu::CompareFunction::Less,
            DepthCompare::LessEqual => wgpu::CompareFunction::LessEqual,
            DepthCompare::Equal => wgpu::CompareFunction::Equal,
            DepthCompare::Greater => wgpu::CompareFunction::Greater,
            DepthCompare::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            DepthCompare::NotEqual => wgpu::CompareFunction::NotEqual,
            DepthCompare::Always => wgpu::CompareFunction::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub compare: DepthCompare,
    pub write: bool,
}

impl DepthState {
    /// Standard opaque depth testing.
    pub const LESS: Self = Self {
        compare: DepthCompare::Less,
        write: true,
    };

    /// Test against, but never modify, existing depth.
    pub const fn read_only(compare: DepthCompare) -> Self {
        Self {
            compare,
            write: false,
        }
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self::LESS
    }
}

/// Fixed-function state for one draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: BlendState,
    pub depth: DepthState,
}

/// Which forward pass draws a material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderQueue {
    #[default]
    Opaque,
    Transparent,
}

#[derive(Debug, Clone)]
pub struct Material {
    program: ShaderProgramHandle,
    state: RenderState,
    queue: RenderQueue,
    uniforms: Vec<(String, UniformValue)>,
}

/// Shared reference to a material.
pub type MaterialHandle = Rc<Material>;

impl Material {
    pub fn new(program: ShaderProgramHandle) -> Self {
        Self {
            program,
            state: RenderState::default(),
            queue: RenderQueue::Opaque,
            uniforms: Vec::new(),
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.state.blend = blend;
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.state.depth = depth;
        self
    }

    pub fn with_queue(mut self, queue: RenderQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_uniform(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.set_uniform(name, value);
        self
    }

    /// Sets (or replaces) a named uniform value.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        match self.uniforms.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.uniforms.push((name.to_string(), value)),
        }
    }

    pub fn program(&self) -> &ShaderProgramHandle {
        &self.program
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn queue(&self) -> RenderQueue {
        self.queue
    }

    pub fn uniforms(&self) -> &[(String, UniformValue)] {
        &self.uniforms
    }

    /// Writes this material's uniform values into the active program.
    pub(crate) fn apply(&self, active: &mut ActiveProgram<'_>) {
        for (name, value) in &self.uniforms {
            if !active.set_named(name, *value) {
                log::trace!("material uniform '{name}' not in program '{}'", active.program().label());
            }
        }
    }
}
