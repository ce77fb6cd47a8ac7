//! The closed set of passes a [`Renderer`](crate::Renderer) runs each frame.

use std::collections::HashSet;

use crate::binder::BinderRegistry;
use crate::camera::Camera;
use crate::config::LightOverflowPolicy;
use crate::device::RenderDevice;
use crate::light::Light;
use crate::material::RenderQueue;
use crate::program::ProgramId;
use crate::render_graph::{DrawSubmission, ForwardPass, FrameStats, PostEffectPass, SkyboxPass, SubmissionQueue};
use crate::texture::CubemapHandle;

/// Per-frame lifecycle of a pass: `Idle → TargetBound → Executing → Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PassState {
    #[default]
    Idle,
    /// The pass's attachments are resolved and bound.
    TargetBound,
    /// Draw commands are being issued.
    Executing,
}

#[derive(Debug, Clone)]
pub enum PassKind {
    Skybox(SkyboxPass),
    Forward(ForwardPass),
    PostEffect(PostEffectPass),
}

/// One stage of the frame pipeline.
///
/// Scene passes (skybox, forward) draw into the scene target; post-effect
/// passes read earlier outputs and write a new one. Scene passes must all
/// precede the first post effect.
#[derive(Debug, Clone)]
pub struct RenderPass {
    kind: PassKind,
    state: PassState,
}

impl RenderPass {
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            state: PassState::Idle,
        }
    }

    /// Environment cubemap drawn behind the scene.
    pub fn skybox(cubemap: CubemapHandle) -> Self {
        Self::new(PassKind::Skybox(SkyboxPass::new(cubemap)))
    }

    /// Forward pass over opaque submissions.
    pub fn forward() -> Self {
        Self::new(PassKind::Forward(ForwardPass::new(RenderQueue::Opaque)))
    }

    /// Forward pass over transparent submissions.
    pub fn forward_transparent() -> Self {
        Self::new(PassKind::Forward(ForwardPass::new(RenderQueue::Transparent)))
    }

    pub fn post_effect(pass: PostEffectPass) -> Self {
        Self::new(PassKind::PostEffect(pass))
    }

    pub fn kind(&self) -> &PassKind {
        &self.kind
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PassState) {
        self.state = state;
    }

    pub fn label(&self) -> &str {
        match &self.kind {
            PassKind::Skybox(_) => "skybox",
            PassKind::Forward(pass) => pass.label(),
            PassKind::PostEffect(pass) => pass.label(),
        }
    }

    pub fn is_post_effect(&self) -> bool {
        matches!(self.kind, PassKind::PostEffect(_))
    }

    /// Whether this pass draws `submission`.
    pub fn consumes(&self, submission: &DrawSubmission) -> bool {
        match &self.kind {
            PassKind::Forward(pass) => pass.queue() == submission.queue(),
            PassKind::Skybox(_) | PassKind::PostEffect(_) => false,
        }
    }
}

/// Everything a scene pass can reach while executing.
pub(crate) struct SceneContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub binders: &'a mut BinderRegistry,
    pub submissions: &'a SubmissionQueue,
    pub lights: &'a [Light],
    pub camera: &'a Camera,
    pub light_overflow: LightOverflowPolicy,
    /// Programs that already had a transform update this frame.
    pub transformed: HashSet<ProgramId>,
    /// Set once a forward pass drew anything.
    pub opaque_drawn: bool,
    pub stats: &'a mut FrameStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::mesh::Mesh;
    use crate::post_process::PostEffect;
    use crate::program::ShaderProgram;
    use crate::texture::Cubemap;
    use glam::{Mat4, Vec4};
    use std::rc::Rc;

    #[test]
    fn only_forward_passes_consume_submissions() {
        let program = Rc::new(ShaderProgram::standard_lit());
        let opaque = DrawSubmission::new(
            Rc::new(Mesh::cube()),
            Rc::new(Material::new(program.clone())),
            Mat4::IDENTITY,
        );
        let glass = DrawSubmission::new(
            Rc::new(Mesh::cube()),
            Rc::new(Material::new(program).with_queue(RenderQueue::Transparent)),
            Mat4::IDENTITY,
        );

        let skybox = RenderPass::skybox(Rc::new(Cubemap::solid(Vec4::ONE)));
        let forward = RenderPass::forward();
        let transparent = RenderPass::forward_transparent();
        let post = RenderPass::post_effect(PostEffectPass::new(
            "grade",
            PostEffect::ToneMap(Default::default()),
        ));

        assert!(!skybox.consumes(&opaque));
        assert!(forward.consumes(&opaque) && !forward.consumes(&glass));
        assert!(transparent.consumes(&glass) && !transparent.consumes(&opaque));
        assert!(!post.consumes(&opaque));
        assert_eq!(forward.state(), PassState::Idle);
    }
}
