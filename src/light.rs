//! Scene lights.
//!
//! Lights are collected once per frame with
//! [`Renderer::add_light`](crate::Renderer::add_light). Before the forward pass
//! runs they are ordered nearest-first (directional lights lead, then
//! positional lights by distance to the camera), so when a program's light
//! arrays are too small the lights that get dropped are the far ones.
//!
//! Lights are packed into shaders as four parallel arrays: color (already
//! multiplied by intensity), position, direction and a `vec4` attenuation
//! `(start, end, cos_outer, cos_inner)`. A negative `start` marks a directional
//! light; `cos_outer < -1` marks a light without a cone.

use glam::{Vec2, Vec3, Vec4};

const NO_CONE: f32 = -2.0;

/// A directional, point or spot light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
    },
    Point {
        position: Vec3,
        color: Vec3,
        intensity: f32,
        /// Distance where falloff starts and where it reaches zero.
        attenuation: Vec2,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        attenuation: Vec2,
        /// Half-angle (radians) of full intensity.
        inner_angle: f32,
        /// Half-angle (radians) where intensity reaches zero.
        outer_angle: f32,
    },
}

impl Light {
    /// A white directional light shining along `direction` (normalized here).
    pub fn directional(direction: Vec3) -> Self {
        Light::Directional {
            direction: direction.normalize_or_zero(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }

    /// A white point light at `position` with attenuation `(5, 10)`.
    pub fn point(position: Vec3) -> Self {
        Light::Point {
            position,
            color: Vec3::ONE,
            intensity: 1.0,
            attenuation: Vec2::new(5.0, 10.0),
        }
    }

    /// A white spot light at `position` pointing along `direction`, with a
    /// 20 degree inner and 30 degree outer cone.
    pub fn spot(position: Vec3, direction: Vec3) -> Self {
        Light::Spot {
            position,
            direction: direction.normalize_or_zero(),
            color: Vec3::ONE,
            intensity: 1.0,
            attenuation: Vec2::new(5.0, 10.0),
            inner_angle: 20f32.to_radians(),
            outer_angle: 30f32.to_radians(),
        }
    }

    pub fn with_color(mut self, value: Vec3) -> Self {
        match &mut self {
            Light::Directional { color, .. }
            | Light::Point { color, .. }
            | Light::Spot { color, .. } => *color = value,
        }
        self
    }

    pub fn with_intensity(mut self, value: f32) -> Self {
        match &mut self {
            Light::Directional { intensity, .. }
            | Light::Point { intensity, .. }
            | Light::Spot { intensity, .. } => *intensity = value,
        }
        self
    }

    /// Sets the distance attenuation range. No effect on directional lights.
    pub fn with_attenuation(mut self, start: f32, end: f32) -> Self {
        if let Light::Point { attenuation, .. } | Light::Spot { attenuation, .. } = &mut self {
            *attenuation = Vec2::new(start, end);
        }
        self
    }

    /// Sets spot cone half-angles in degrees. No effect on other lights.
    pub fn with_angles(mut self, inner_degrees: f32, outer_degrees: f32) -> Self {
        if let Light::Spot {
            inner_angle,
            outer_angle,
            ..
        } = &mut self
        {
            *inner_angle = inner_degrees.to_radians();
            *outer_angle = outer_degrees.max(inner_degrees).to_radians();
        }
        self
    }

    /// Color scaled by intensity.
    pub fn radiance(&self) -> Vec3 {
        match *self {
            Light::Directional {
                color, intensity, ..
            }
            | Light::Point {
                color, intensity, ..
            }
            | Light::Spot {
                color, intensity, ..
            } => color * intensity,
        }
    }

    /// World position, `None` for directional lights.
    pub fn position(&self) -> Option<Vec3> {
        match *self {
            Light::Directional { .. } => None,
            Light::Point { position, .. } | Light::Spot { position, .. } => Some(position),
        }
    }

    /// Direction the light shines along; zero for point lights.
    pub fn direction(&self) -> Vec3 {
        match *self {
            Light::Directional { direction, .. } | Light::Spot { direction, .. } => direction,
            Light::Point { .. } => Vec3::ZERO,
        }
    }

    /// The packed `(start, end, cos_outer, cos_inner)` shader attenuation.
    pub fn attenuation(&self) -> Vec4 {
        match *self {
            Light::Directional { .. } => Vec4::new(-1.0, -1.0, NO_CONE, NO_CONE),
            Light::Point { attenuation, .. } => {
                Vec4::new(attenuation.x, attenuation.y, NO_CONE, NO_CONE)
            }
            Light::Spot {
                attenuation,
                inner_angle,
                outer_angle,
                ..
            } => Vec4::new(
                attenuation.x,
                attenuation.y,
                outer_angle.cos(),
                inner_angle.cos(),
            ),
        }
    }
}

/// Orders lights nearest-first relative to `eye`.
///
/// Directional lights come first in their submission order, then positional
/// lights by distance. The sort is stable, so equidistant lights keep their
/// submission order.
pub fn sort_nearest_first(lights: &mut [Light], eye: Vec3) {
    lights.sort_by(|a, b| {
        let key = |light: &Light| light.position().map(|p| p.distance_squared(eye));
        match (key(a), key(b)) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(da), Some(db)) => da.total_cmp(&db),
        }
    });
}
