use glam::{Mat4, Vec3};

/// A perspective camera for 3D scenes.
///
/// Provides position, orientation, field of view and clip planes, and derives
/// the view and projection matrices the pipeline uploads. The renderer compares
/// [`Camera::view_projection`] between frames to decide whether programs need
/// their camera uniforms re-uploaded.
///
/// # Example
///
/// ```
/// use lantern::Camera;
///
/// let camera = Camera::new()
///     .at(100.0, 100.0, 100.0)
///     .looking_at(0.0, 0.0, 0.0)
///     .with_fov(57.3)
///     .with_clip(0.1, 2000.0);
/// assert!(camera.position().length() > 170.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians, vertical
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2, // 90 degrees
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        self.look_at(Vec3::new(target_x, target_y, target_z));
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    /// Point the camera at `target`, keeping its position.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.forward = forward;
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Compute the right vector from forward and up.
    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// Right-handed perspective projection with a `[0, 1]` depth range.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Inverse of the view-projection with the translation removed.
    ///
    /// Maps clip-space positions to world-space directions, which is all a
    /// skybox needs.
    pub fn inverse_view_rotation_projection(&self) -> Mat4 {
        let rotation = Mat4::look_to_rh(Vec3::ZERO, self.forward, self.up);
        (self.projection() * rotation).inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn looking_at_target_centers_it() {
        let camera = Camera::new().at(100.0, 100.0, 100.0).looking_at(0.0, 0.0, 0.0);
        let clip = camera.view_projection() * Vec3::ZERO.extend(1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn depth_range_is_zero_to_one() {
        let camera = Camera::new().at(0.0, 0.0, 0.0).with_clip(1.0, 10.0);
        let near = camera.view_projection() * Vec3::new(0.0, 0.0, -1.0).extend(1.0);
        let far = camera.view_projection() * Vec3::new(0.0, 0.0, -10.0).extend(1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn looking_at_own_position_keeps_orientation() {
        let camera = Camera::new().at(1.0, 2.0, 3.0).looking_at(1.0, 2.0, 3.0);
        assert_eq!(camera.forward, Vec3::NEG_Z);
    }
}
