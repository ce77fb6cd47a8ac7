//! Forward rendering of program-grouped submissions.
//!
//! For every program group the pass runs:
//!
//! ```text
//! transform_update(sub[0], camera_changed) ─▶ light_update ─▶ draw(sub[0])
//! transform_update(sub[1], false)                          ─▶ draw(sub[1])
//! ...
//! ```
//!
//! `camera_changed` is true for a program at most once per frame, and only when
//! the camera differs from the one that program last received. With the
//! multi-pass light policy, lights that did not fit are drawn in extra rounds
//! blended additively on top, depth-tested `Equal` against the first round.

use crate::config::LightOverflowPolicy;
use crate::device::MeshDraw;
use crate::error::Result;
use crate::material::{BlendState, DepthCompare, DepthState, RenderQueue, RenderState};
use crate::render_graph::ProgramGroup;
use crate::render_graph::render_pass::SceneContext;

#[derive(Debug, Clone)]
pub struct ForwardPass {
    queue: RenderQueue,
}

impl ForwardPass {
    pub fn new(queue: RenderQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> RenderQueue {
        self.queue
    }

    pub fn label(&self) -> &str {
        match self.queue {
            RenderQueue::Opaque => "forward",
            RenderQueue::Transparent => "forward_transparent",
        }
    }

    pub(crate) fn execute(&self, ctx: &mut SceneContext<'_>) -> Result<()> {
        let submissions = ctx.submissions;
        let groups = submissions.groups(|s| s.queue() == self.queue);
        for group in &groups {
            self.draw_group(ctx, group)?;
        }
        if self.queue == RenderQueue::Opaque && groups.iter().any(|g| !g.submissions.is_empty()) {
            ctx.opaque_drawn = true;
        }
        Ok(())
    }

    fn draw_group(&self, ctx: &mut SceneContext<'_>, group: &ProgramGroup<'_>) -> Result<()> {
        let entry = ctx.binders.get_mut(group.program)?;
        ctx.stats.programs_activated += 1;

        let mut next_light = 0;
        let mut all_fit = true;
        for (i, submission) in group.submissions.iter().enumerate() {
            let camera_changed = i == 0
                && ctx.transformed.insert(group.program)
                && !entry.camera_is_current(ctx.camera);
            entry.update_transform(&submission.world, ctx.camera, camera_changed);
            if i == 0 {
                all_fit = entry.update_lights(ctx.lights, &mut next_light);
                ctx.stats.light_updates += 1;
            }
            submission.apply_uniforms(&mut entry.active());
            ctx.device.draw_mesh(&MeshDraw {
                program: entry.program(),
                uniforms: entry.uniforms(),
                mesh: &submission.mesh,
                state: submission.material.state(),
            })?;
            ctx.stats.draw_calls += 1;
        }

        if all_fit {
            return Ok(());
        }
        match ctx.light_overflow {
            LightOverflowPolicy::Truncate => {
                log::warn!(
                    "program '{}' holds {} of {} lights; the rest are dropped",
                    entry.program().label(),
                    next_light,
                    ctx.lights.len()
                );
                ctx.stats.light_overflow = true;
            }
            LightOverflowPolicy::MultiPass => {
                let extra_round = RenderState {
                    blend: BlendState::ADDITIVE,
                    depth: DepthState::read_only(DepthCompare::Equal),
                };
                while next_light < ctx.lights.len() {
                    let batch_start = next_light;
                    for (i, submission) in group.submissions.iter().enumerate() {
                        entry.update_transform(&submission.world, ctx.camera, false);
                        if i == 0 {
                            entry.update_lights(ctx.lights, &mut next_light);
                            ctx.stats.light_updates += 1;
                            if next_light == batch_start {
                                break;
                            }
                        }
                        submission.apply_uniforms(&mut entry.active());
                        ctx.device.draw_mesh(&MeshDraw {
                            program: entry.program(),
                            uniforms: entry.uniforms(),
                            mesh: &submission.mesh,
                            state: extra_round,
                        })?;
                        ctx.stats.draw_calls += 1;
                    }
                    if next_light == batch_start {
                        log::warn!(
                            "program '{}' cannot pack any light; {} lights dropped",
                            entry.program().label(),
                            ctx.lights.len() - next_light
                        );
                        ctx.stats.light_overflow = true;
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
