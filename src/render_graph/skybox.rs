use crate::error::Result;
use crate::material::{DepthCompare, DepthState};
use crate::render_graph::render_pass::SceneContext;
use crate::texture::CubemapHandle;

/// Draws an environment cubemap at the far plane.
#[derive(Debug, Clone)]
pub struct SkyboxPass {
    cubemap: CubemapHandle,
}

impl SkyboxPass {
    pub fn new(cubemap: CubemapHandle) -> Self {
        Self { cubemap }
    }

    pub fn cubemap(&self) -> &CubemapHandle {
        &self.cubemap
    }

    /// Depth state for the sky. It never writes depth: after opaque geometry
    /// it only fills pixels still at the far plane, before it everything
    /// passes and later geometry draws over it.
    pub fn depth_state(opaque_drawn: bool) -> DepthState {
        if opaque_drawn {
            DepthState::read_only(DepthCompare::LessEqual)
        } else {
            DepthState::read_only(DepthCompare::Always)
        }
    }

    pub(crate) fn execute(&self, ctx: &mut SceneContext<'_>) -> Result<()> {
        let depth = Self::depth_state(ctx.opaque_drawn);
        ctx.device.draw_skybox(&self.cubemap, ctx.camera, depth)?;
        ctx.stats.draw_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_never_writes_depth() {
        assert!(!SkyboxPass::depth_state(true).write);
        assert!(!SkyboxPass::depth_state(false).write);
        assert_eq!(SkyboxPass::depth_state(true).compare, DepthCompare::LessEqual);
        assert_eq!(SkyboxPass::depth_state(false).compare, DepthCompare::Always);
    }
}
