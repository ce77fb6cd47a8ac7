//! Full-screen post effects: bloom, color grading and tone mapping.
//!
//! Each [`PostEffect`] is one full-screen pass. The per-pixel math lives here
//! as plain functions so the WGSL shaders and the software backend agree:
//!
//! | Effect           | Inputs            | Output                                   |
//! |------------------|-------------------|------------------------------------------|
//! | `BrightPass`     | scene             | `c * clamp((L - min) / (max - min), 0, 1)` |
//! | `Blur`           | previous          | 9-tap Gaussian along one axis            |
//! | `BloomComposite` | bloom, scene tap  | `scene + bloom * intensity`              |
//! | `ColorGrade`     | previous          | exposure, contrast, hue, saturation, filter |
//! | `ToneMap`        | previous          | `None`, Reinhard or ACES (Narkowicz fit) |
//!
//! [`PostProcessSettings::build_chain`] assembles the usual sequence:
//!
//! ```text
//! scene ─▶ bright ─▶ blur×k ─▶ composite ─▶ grade ─▶ tonemap ─▶ screen
//!   │                            ▲
//!   └────────── tap ─────────────┘
//! ```

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::render_graph::{PostEffectPass, Tap};

/// Rec. 709 luminance weights.
pub const LUMINANCE: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Center-out weights of the 9-tap Gaussian blur.
pub const BLUR_WEIGHTS: [f32; 5] = [0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    /// Pass values through unchanged.
    None,
    Reinhard,
    #[default]
    AcesFitted,
}

/// Color grading parameters, applied in declaration order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorGrade {
    pub exposure: f32,
    pub contrast: f32,
    /// Degrees around the grey axis.
    pub hue_shift: f32,
    pub saturation: f32,
    pub color_filter: Vec3,
}

impl ColorGrade {
    /// Parameters that leave colors untouched.
    pub const IDENTITY: Self = Self {
        exposure: 1.0,
        contrast: 1.0,
        hue_shift: 0.0,
        saturation: 1.0,
        color_filter: Vec3::ONE,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ColorGrade {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One full-screen effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PostEffect {
    /// Keeps pixels by luminance, ramping from `min` to `max`.
    BrightPass { min: f32, max: f32 },
    /// One direction of a separable Gaussian.
    Blur { horizontal: bool },
    /// Adds the blurred input onto the scene tap.
    BloomComposite { intensity: f32 },
    ColorGrade(ColorGrade),
    ToneMap(ToneMapping),
}

impl PostEffect {
    /// Number of input textures the effect samples (primary + taps).
    pub fn input_count(&self) -> usize {
        match self {
            PostEffect::BloomComposite { .. } => 2,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PostEffect::BrightPass { .. } => "bright_pass",
            PostEffect::Blur { .. } => "blur",
            PostEffect::BloomComposite { .. } => "bloom_composite",
            PostEffect::ColorGrade(_) => "color_grade",
            PostEffect::ToneMap(_) => "tone_map",
        }
    }

    /// Packs the effect's parameters into its shader uniform block.
    ///
    /// `texel` is the size of one source texel in UV units.
    pub fn uniforms(&self, texel: [f32; 2]) -> EffectUniforms {
        let mut u = EffectUniforms {
            texel,
            ..EffectUniforms::default()
        };
        match *self {
            PostEffect::BrightPass { min, max } => u.params = [min, max, 0.0, 0.0],
            PostEffect::Blur { horizontal } => {
                u.params = if horizontal {
                    [1.0, 0.0, 0.0, 0.0]
                } else {
                    [0.0, 1.0, 0.0, 0.0]
                }
            }
            PostEffect::BloomComposite { intensity } => u.params = [intensity, 0.0, 0.0, 0.0],
            PostEffect::ColorGrade(g) => {
                u.params = [g.exposure, g.contrast, g.hue_shift.to_radians(), g.saturation];
                u.filter = g.color_filter.extend(1.0).to_array();
            }
            PostEffect::ToneMap(mode) => {
                let mode = match mode {
                    ToneMapping::None => 0.0,
                    ToneMapping::Reinhard => 1.0,
                    ToneMapping::AcesFitted => 2.0,
                };
                u.params = [mode, 0.0, 0.0, 0.0];
            }
        }
        u
    }
}

/// Uniform block shared by every effect shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EffectUniforms {
    pub texel: [f32; 2],
    pub _padding: [f32; 2],
    /// Effect-specific scalars.
    pub params: [f32; 4],
    pub filter: [f32; 4],
}

pub fn luminance(c: Vec3) -> f32 {
    c.dot(LUMINANCE)
}

pub fn bright_pass(c: Vec4, min: f32, max: f32) -> Vec4 {
    let l = luminance(c.truncate());
    let gate = if max <= min {
        if l >= min { 1.0 } else { 0.0 }
    } else {
        ((l - min) / (max - min)).clamp(0.0, 1.0)
    };
    (c.truncate() * gate).extend(c.w)
}

pub fn bloom_composite(scene: Vec4, bloom: Vec4, intensity: f32) -> Vec4 {
    (scene.truncate() + bloom.truncate() * intensity).extend(scene.w)
}

/// Rotates `c` about the grey axis by `radians`.
pub fn hue_rotate(c: Vec3, radians: f32) -> Vec3 {
    let k = Vec3::ONE.normalize();
    let (sin, cos) = radians.sin_cos();
    c * cos + k.cross(c) * sin + k * k.dot(c) * (1.0 - cos)
}

pub fn color_grade(c: Vec4, grade: &ColorGrade) -> Vec4 {
    let mut rgb = c.truncate() * grade.exposure;
    rgb = ((rgb - 0.5) * grade.contrast + 0.5).max(Vec3::ZERO);
    if grade.hue_shift != 0.0 {
        rgb = hue_rotate(rgb, grade.hue_shift.to_radians());
    }
    rgb = Vec3::splat(luminance(rgb)).lerp(rgb, grade.saturation);
    (rgb * grade.color_filter).extend(c.w)
}

pub fn tone_map(c: Vec4, mode: ToneMapping) -> Vec4 {
    let rgb = c.truncate();
    let mapped = match mode {
        ToneMapping::None => rgb,
        ToneMapping::Reinhard => rgb / (Vec3::ONE + rgb),
        ToneMapping::AcesFitted => {
            let x = rgb.max(Vec3::ZERO);
            ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(Vec3::ZERO, Vec3::ONE)
        }
    };
    mapped.extend(c.w)
}

/// User-facing post-processing configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessSettings {
    pub exposure: f32,
    pub contrast: f32,
    /// Degrees.
    pub hue_shift: f32,
    pub saturation: f32,
    pub color_filter: [f32; 3],
    pub bloom_enabled: bool,
    /// Number of blur passes between bright pass and composite.
    pub blur_iterations: u32,
    /// `(min, max)` luminance ramp of the bright pass.
    pub bloom_range: [f32; 2],
    pub bloom_intensity: f32,
    pub tone_mapping: ToneMapping,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            contrast: 1.0,
            hue_shift: 0.0,
            saturation: 1.0,
            color_filter: [1.0, 1.0, 1.0],
            bloom_enabled: true,
            blur_iterations: 6,
            bloom_range: [1.0, 2.0],
            bloom_intensity: 1.0,
            tone_mapping: ToneMapping::default(),
        }
    }
}

impl PostProcessSettings {
    pub fn color_grade(&self) -> ColorGrade {
        ColorGrade {
            exposure: self.exposure,
            contrast: self.contrast,
            hue_shift: self.hue_shift,
            saturation: self.saturation,
            color_filter: Vec3::from_array(self.color_filter),
        }
    }

    /// Builds the post chain: bright pass, `blur_iterations` blur passes
    /// alternating horizontal and vertical, bloom composite (tapping the
    /// scene), color grade, tone map.
    pub fn build_chain(&self) -> Vec<PostEffectPass> {
        let mut chain = Vec::new();
        if self.bloom_enabled {
            chain.push(PostEffectPass::new(
                "bright_pass",
                PostEffect::BrightPass {
                    min: self.bloom_range[0],
                    max: self.bloom_range[1],
                },
            ));
            for i in 0..self.blur_iterations {
                chain.push(PostEffectPass::new(
                    format!("blur_{i}"),
                    PostEffect::Blur {
                        horizontal: i % 2 == 0,
                    },
                ));
            }
            chain.push(
                PostEffectPass::new(
                    "bloom_composite",
                    PostEffect::BloomComposite {
                        intensity: self.bloom_intensity,
                    },
                )
                .with_tap(Tap::Scene),
            );
        }
        chain.push(PostEffectPass::new(
            "color_grade",
            PostEffect::ColorGrade(self.color_grade()),
        ));
        chain.push(PostEffectPass::new(
            "tone_map",
            PostEffect::ToneMap(self.tone_mapping),
        ));
        chain
    }
}
