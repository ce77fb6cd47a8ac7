//! Per-frame draw submissions.

use glam::Mat4;

use crate::material::{MaterialHandle, RenderQueue};
use crate::mesh::MeshHandle;
use crate::program::{ActiveProgram, ProgramId, UniformValue};

/// One draw request for the current frame.
///
/// Created by scene traversal, consumed by the forward pass(es) and discarded
/// when the frame ends.
#[derive(Debug, Clone)]
pub struct DrawSubmission {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub world: Mat4,
    /// Per-draw uniform values applied after the material's.
    pub overrides: Vec<(String, UniformValue)>,
}

impl DrawSubmission {
    pub fn new(mesh: MeshHandle, material: MaterialHandle, world: Mat4) -> Self {
        Self {
            mesh,
            material,
            world,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.overrides.push((name.to_string(), value.into()));
        self
    }

    pub fn program_id(&self) -> ProgramId {
        self.material.program().id()
    }

    pub fn queue(&self) -> RenderQueue {
        self.material.queue()
    }

    /// Writes material values, then overrides, into the active program.
    pub(crate) fn apply_uniforms(&self, active: &mut ActiveProgram<'_>) {
        self.material.apply(active);
        for (name, value) in &self.overrides {
            if !active.set_named(name, *value) {
                log::trace!("override '{name}' not in program '{}'", active.program().label());
            }
        }
    }
}

/// Submissions sharing one shader program, in submission order.
#[derive(Debug)]
pub struct ProgramGroup<'a> {
    pub program: ProgramId,
    pub submissions: Vec<&'a DrawSubmission>,
}

/// This frame's submissions.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    draw_queue: Vec<DrawSubmission>,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, submission: DrawSubmission) {
        self.draw_queue.push(submission);
    }

    pub fn clear_queue(&mut self) {
        self.draw_queue.clear();
    }

    pub fn len(&self) -> usize {
        self.draw_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draw_queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawSubmission> {
        self.draw_queue.iter()
    }

    /// Distinct programs in first-appearance order.
    pub fn program_ids(&self) -> Vec<ProgramId> {
        let mut ids: Vec<ProgramId> = Vec::new();
        for submission in &self.draw_queue {
            let id = submission.program_id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Groups the submissions accepted by `filter` by program.
    ///
    /// Groups appear in the order their program was first submitted; inside a
    /// group, submissions keep their submission order.
    pub fn groups(&self, mut filter: impl FnMut(&DrawSubmission) -> bool) -> Vec<ProgramGroup<'_>> {
        let mut groups: Vec<ProgramGroup<'_>> = Vec::new();
        for submission in self.draw_queue.iter().filter(|&s| filter(s)) {
            let id = submission.program_id();
            match groups.iter_mut().find(|g| g.program == id) {
                Some(group) => group.submissions.push(submission),
                None => groups.push(ProgramGroup {
                    program: id,
                    submissions: vec![submission],
                }),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::mesh::Mesh;
    use crate::program::ShaderProgram;
    use std::rc::Rc;

    #[test]
    fn groups_follow_first_appearance_order() {
        let lit = Rc::new(ShaderProgram::standard_lit());
        let other = Rc::new(ShaderProgram::standard_lit());
        let a = Rc::new(Material::new(lit.clone()));
        let b = Rc::new(Material::new(other.clone()));
        let glass = Rc::new(Material::new(lit.clone()).with_queue(RenderQueue::Transparent));
        let mesh = Rc::new(Mesh::cube());

        let mut queue = SubmissionQueue::new();
        for (i, material) in [&b, &a, &b, &glass, &a].into_iter().enumerate() {
            queue.push(DrawSubmission::new(
                mesh.clone(),
                material.clone(),
                Mat4::from_translation(glam::Vec3::X * i as f32),
            ));
        }

        let opaque = queue.groups(|s| s.queue() == RenderQueue::Opaque);
        assert_eq!(opaque.len(), 2);
        assert_eq!(opaque[0].program, other.id());
        assert_eq!(opaque[1].program, lit.id());
        assert_eq!(opaque[0].submissions.len(), 2);
        assert_eq!(opaque[1].submissions[0].world.w_axis.x, 1.0);
        assert_eq!(opaque[1].submissions[1].world.w_axis.x, 4.0);

        assert_eq!(queue.program_ids(), vec![other.id(), lit.id()]);

        queue.clear_queue();
        assert!(queue.is_empty());
    }
}
