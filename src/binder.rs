//! Per-program uniform binders.
//!
//! Scene content never talks to shaders directly. Instead, whoever owns a
//! shader program registers a [`UniformBinder`] for it once at setup: a pair of
//! callbacks that the forward pass invokes while drawing.
//!
//! ```text
//!  program group (first draw)          program group (later draws)
//!  ┌───────────────────────────┐       ┌───────────────────────────┐
//!  │ transform_update(changed) │       │ transform_update(false)   │
//!  │ light_update(&mut first)  │       │ draw                      │
//!  │ draw                      │       └───────────────────────────┘
//!  └───────────────────────────┘
//! ```
//!
//! The `camera_changed` flag lets a binder skip re-uploading camera uniforms.
//! Each program remembers the camera it last received, so the flag is set
//! whenever that camera differs from the current one, even if the program sat
//! out the frames in between.

use std::collections::HashMap;

use glam::Mat4;

use crate::camera::Camera;
use crate::error::{RenderError, Result};
use crate::light::Light;
use crate::program::{ActiveProgram, ProgramId, ShaderProgram, ShaderProgramHandle, UniformBlock};

/// Updates world and camera uniforms: `(program, world, camera, camera_changed)`.
pub type TransformUpdateFn = Box<dyn Fn(&mut ActiveProgram<'_>, &Mat4, &Camera, bool)>;

/// Packs lights starting at `*first_light_index`, advances the index past the
/// packed lights, and returns whether every remaining light fit.
pub type LightUpdateFn = Box<dyn Fn(&mut ActiveProgram<'_>, &[Light], &mut usize) -> bool>;

/// The pair of callbacks bound to one shader program.
pub struct UniformBinder {
    pub transform_update: TransformUpdateFn,
    pub light_update: LightUpdateFn,
}

/// A registered program: its binder and persistent uniform state.
pub(crate) struct BinderEntry {
    program: ShaderProgramHandle,
    binder: UniformBinder,
    uniforms: UniformBlock,
    uploaded_camera: Option<Camera>,
}

impl BinderEntry {
    pub fn program(&self) -> &ShaderProgramHandle {
        &self.program
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    /// Whether this program's camera uniforms already match `camera`.
    pub fn camera_is_current(&self, camera: &Camera) -> bool {
        self.uploaded_camera.as_ref() == Some(camera)
    }

    pub fn active(&mut self) -> ActiveProgram<'_> {
        ActiveProgram::new(&self.program, &mut self.uniforms)
    }

    pub fn update_transform(&mut self, world: &Mat4, camera: &Camera, camera_changed: bool) {
        let mut active = ActiveProgram::new(&self.program, &mut self.uniforms);
        (self.binder.transform_update)(&mut active, world, camera, camera_changed);
        if camera_changed {
            self.uploaded_camera = Some(*camera);
        }
    }

    pub fn update_lights(&mut self, lights: &[Light], first_light_index: &mut usize) -> bool {
        let mut active = ActiveProgram::new(&self.program, &mut self.uniforms);
        (self.binder.light_update)(&mut active, lights, first_light_index)
    }
}

/// Program id → binder lookup.
#[derive(Default)]
pub(crate) struct BinderRegistry {
    entries: HashMap<ProgramId, BinderEntry>,
}

impl BinderRegistry {
    pub fn register(&mut self, program: ShaderProgramHandle, binder: UniformBinder) -> Result<()> {
        let id = program.id();
        if self.entries.contains_key(&id) {
            return Err(RenderError::DuplicateRegistration(id));
        }
        let uniforms = UniformBlock::new(program.layout());
        self.entries.insert(
            id,
            BinderEntry {
                program,
                binder,
                uniforms,
                uploaded_camera: None,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, id: ProgramId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: ProgramId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ProgramId) -> Result<&BinderEntry> {
        self.entries.get(&id).ok_or(RenderError::UnboundProgram(id))
    }

    pub fn get_mut(&mut self, id: ProgramId) -> Result<&mut BinderEntry> {
        self.entries.get_mut(&id).ok_or(RenderError::UnboundProgram(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The standard transform update for programs using the lit uniform names.
///
/// Camera uniforms (`ViewProjMatrix`, `CameraPosition`) are written only when
/// the camera changed; `WorldMatrix` is written on every call.
pub fn default_update_transform_function(program: &ShaderProgram) -> TransformUpdateFn {
    let world_matrix = program.uniform_location("WorldMatrix");
    let view_proj = program.uniform_location("ViewProjMatrix");
    let camera_position = program.uniform_location("CameraPosition");

    Box::new(move |active, world, camera, camera_changed| {
        if camera_changed {
            if let Some(loc) = view_proj {
                active.set_uniform(loc, camera.view_projection());
            }
            if let Some(loc) = camera_position {
                active.set_uniform(loc, camera.position());
            }
        }
        if let Some(loc) = world_matrix {
            active.set_uniform(loc, *world);
        }
    })
}

/// The standard light update: fills `LightColor`, `LightPosition`,
/// `LightDirection` and `LightAttenuation` from `first_light_index` onward.
///
/// `LightCount` receives the number packed and `LightIndirect` is set only for
/// the batch starting at light 0, so ambient light is added once. Unused slots
/// are zeroed. Capacity is the length of the `LightColor` array.
pub fn default_update_lights_function(program: &ShaderProgram) -> LightUpdateFn {
    let indirect = program.uniform_location("LightIndirect");
    let count = program.uniform_location("LightCount");
    let color = program.uniform_location("LightColor");
    let position = program.uniform_location("LightPosition");
    let direction = program.uniform_location("LightDirection");
    let attenuation = program.uniform_location("LightAttenuation");
    let capacity = color.map_or(0, |loc| loc.len() as usize);

    Box::new(move |active, lights, first_light_index| {
        let start = (*first_light_index).min(lights.len());
        let batch = &lights[start..lights.len().min(start + capacity)];

        if let Some(loc) = indirect {
            active.set_uniform(loc, start == 0);
        }
        if let Some(loc) = count {
            active.set_uniform(loc, batch.len() as i32);
        }
        for slot in 0..capacity {
            let light = batch.get(slot);
            let slot = slot as u32;
            if let Some(loc) = color {
                active.set_uniform_at(loc, slot, light.map_or(glam::Vec3::ZERO, Light::radiance));
            }
            if let Some(loc) = position {
                let p = light.and_then(Light::position).unwrap_or_default();
                active.set_uniform_at(loc, slot, p);
            }
            if let Some(loc) = direction {
                active.set_uniform_at(loc, slot, light.map_or(glam::Vec3::ZERO, Light::direction));
            }
            if let Some(loc) = attenuation {
                active.set_uniform_at(loc, slot, light.map_or(glam::Vec4::ZERO, Light::attenuation));
            }
        }

        *first_light_index = start + batch.len();
        lights.len() - start <= capacity
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{MAX_LIGHTS, UniformValue};
    use glam::Vec3;
    use std::rc::Rc;

    fn binder_for(program: &ShaderProgram) -> UniformBinder {
        UniformBinder {
            transform_update: default_update_transform_function(program),
            light_update: default_update_lights_function(program),
        }
    }

    fn lights(n: usize) -> Vec<Light> {
        (0..n)
            .map(|i| Light::point(Vec3::new(i as f32, 0.0, 0.0)))
            .collect()
    }

    #[test]
    fn duplicate_registration_keeps_existing_binder() {
        let program = Rc::new(ShaderProgram::standard_lit());
        let mut registry = BinderRegistry::default();
        registry.register(program.clone(), binder_for(&program)).unwrap();

        let replacement = UniformBinder {
            transform_update: Box::new(|_, _, _, _| panic!("replacement binder must not run")),
            light_update: Box::new(|_, _, _| panic!("replacement binder must not run")),
        };
        let err = registry.register(program.clone(), replacement).unwrap_err();
        assert!(matches!(err, RenderError::DuplicateRegistration(id) if id == program.id()));

        // The first binder is still the one that runs.
        let entry = registry.get_mut(program.id()).unwrap();
        entry.update_transform(&Mat4::IDENTITY, &Camera::default(), true);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_program_is_unbound() {
        let registry = BinderRegistry::default();
        let program = ShaderProgram::standard_lit();
        assert!(matches!(
            registry.get(program.id()),
            Err(RenderError::UnboundProgram(_))
        ));
    }

    #[test]
    fn lights_at_capacity_fit() {
        let program = ShaderProgram::standard_lit();
        let update = default_update_lights_function(&program);
        let mut block = UniformBlock::new(program.layout());
        let mut first = 0;

        let fits = update(
            &mut ActiveProgram::new(&program, &mut block),
            &lights(MAX_LIGHTS as usize),
            &mut first,
        );

        assert!(fits);
        assert_eq!(first, MAX_LIGHTS as usize);
    }

    #[test]
    fn one_light_past_capacity_overflows() {
        let program = ShaderProgram::standard_lit();
        let update = default_update_lights_function(&program);
        let mut block = UniformBlock::new(program.layout());
        let all = lights(MAX_LIGHTS as usize + 1);
        let mut first = 0;

        let fits = update(&mut ActiveProgram::new(&program, &mut block), &all, &mut first);
        assert!(!fits);
        assert_eq!(first, MAX_LIGHTS as usize);

        // The second batch holds the remaining light, without the indirect term.
        let fits = update(&mut ActiveProgram::new(&program, &mut block), &all, &mut first);
        assert!(fits);
        assert_eq!(first, all.len());
        let count = program.uniform_location("LightCount").unwrap();
        let indirect = program.uniform_location("LightIndirect").unwrap();
        assert_eq!(block.read(count, 0), Some(UniformValue::Int(1)));
        assert_eq!(block.read(indirect, 0), Some(UniformValue::Int(0)));
    }

    #[test]
    fn unused_light_slots_are_zeroed() {
        let program = ShaderProgram::standard_lit();
        let update = default_update_lights_function(&program);
        let mut block = UniformBlock::new(program.layout());
        let color = program.uniform_location("LightColor").unwrap();

        let mut first = 0;
        update(&mut ActiveProgram::new(&program, &mut block), &lights(3), &mut first);
        let mut first = 0;
        update(&mut ActiveProgram::new(&program, &mut block), &lights(1), &mut first);

        assert_eq!(block.read(color, 0), Some(UniformValue::Vec3(Vec3::ONE)));
        assert_eq!(block.read(color, 1), Some(UniformValue::Vec3(Vec3::ZERO)));
    }

    #[test]
    fn transform_update_skips_camera_when_unchanged() {
        let program = Rc::new(ShaderProgram::standard_lit());
        let mut registry = BinderRegistry::default();
        registry.register(program.clone(), binder_for(&program)).unwrap();
        let view_proj = program.uniform_location("ViewProjMatrix").unwrap();

        let first = Camera::new().at(0.0, 0.0, 10.0);
        let moved = Camera::new().at(5.0, 0.0, 10.0);
        let entry = registry.get_mut(program.id()).unwrap();
        entry.update_transform(&Mat4::IDENTITY, &first, true);
        entry.update_transform(&Mat4::IDENTITY, &moved, false);

        assert!(entry.camera_is_current(&first));
        assert!(!entry.camera_is_current(&moved));
        assert_eq!(
            entry.uniforms().read(view_proj, 0),
            Some(UniformValue::Mat4(first.view_projection()))
        );
    }
}
