//! Post-effect passes and the executor that chains them through pooled targets.

use std::collections::HashMap;

use crate::device::{Attachment, PassTarget, RenderDevice, TextureId};
use crate::error::{RenderError, Result};
use crate::post_process::PostEffect;
use crate::render_graph::{
    ColorFormat, FrameStats, PassKind, PassState, RenderPass, RenderTargetChain, TargetFormat,
    TargetHandle,
};

/// An extra input read by a post effect, beyond the previous pass's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tap {
    /// The forward + skybox composite.
    Scene,
    /// The output of an earlier post pass with this label.
    Pass(String),
}

/// A full-screen effect pass.
///
/// Its primary source is the previous post pass's output (the scene for the
/// first one). It writes a fresh pooled target, or the screen when it is the
/// last pass.
#[derive(Debug, Clone)]
pub struct PostEffectPass {
    label: String,
    effect: PostEffect,
    taps: Vec<Tap>,
}

impl PostEffectPass {
    pub fn new(label: impl Into<String>, effect: PostEffect) -> Self {
        Self {
            label: label.into(),
            effect,
            taps: Vec::new(),
        }
    }

    pub fn with_tap(mut self, tap: Tap) -> Self {
        self.taps.push(tap);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn effect(&self) -> &PostEffect {
        &self.effect
    }

    pub fn taps(&self) -> &[Tap] {
        &self.taps
    }

    /// Checks the pass against the post passes already in the pipeline.
    pub(crate) fn validate(&self, earlier: &[&PostEffectPass]) -> Result<()> {
        for tap in &self.taps {
            if let Tap::Pass(label) = tap {
                if !earlier.iter().any(|p| p.label() == label) {
                    return Err(RenderError::UnknownTap {
                        pass: self.label.clone(),
                        tap: label.clone(),
                    });
                }
            }
        }
        let inputs = 1 + self.taps.len();
        if inputs != self.effect.input_count() {
            return Err(RenderError::InvalidPassOrder(format!(
                "post effect '{}' ({}) reads {} inputs but was given {}",
                self.label,
                self.effect.name(),
                self.effect.input_count(),
                inputs
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Source {
    Scene,
    Pass(usize),
}

/// Runs every post-effect pass in `passes`, reading `scene` first.
///
/// Each output stays acquired until its last reader has run; `scene` is
/// released the same way. The final pass writes to the screen.
pub(crate) fn run_post_effects(
    passes: &mut [RenderPass],
    device: &mut dyn RenderDevice,
    chain: &mut RenderTargetChain,
    scene: TargetHandle,
    format: ColorFormat,
    stats: &mut FrameStats,
) -> Result<()> {
    let post: Vec<usize> = passes
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_post_effect())
        .map(|(i, _)| i)
        .collect();

    // Resolve every pass's inputs up front so last uses are known.
    let mut reads: Vec<Vec<Source>> = Vec::with_capacity(post.len());
    for (n, &index) in post.iter().enumerate() {
        let taps: &[Tap] = match passes[index].kind() {
            PassKind::PostEffect(pass) => pass.taps(),
            _ => &[],
        };
        let mut sources = vec![if n == 0 { Source::Scene } else { Source::Pass(n - 1) }];
        for tap in taps {
            let source = match tap {
                Tap::Scene => Source::Scene,
                Tap::Pass(label) => post[..n]
                    .iter()
                    .rposition(|&i| passes[i].label() == label)
                    .map(Source::Pass)
                    .ok_or_else(|| RenderError::UnknownTap {
                        pass: passes[index].label().to_string(),
                        tap: label.clone(),
                    })?,
            };
            sources.push(source);
        }
        reads.push(sources);
    }

    let mut last_use: HashMap<Source, usize> = HashMap::new();
    for (n, sources) in reads.iter().enumerate() {
        for source in sources {
            last_use.insert(*source, n);
        }
    }

    let (width, height) = chain.extent();
    let target_format = TargetFormat {
        color: format,
        depth: false,
    };
    let mut outputs: Vec<Option<TargetHandle>> = vec![None; post.len()];
    let handle_of = |source: Source, outputs: &[Option<TargetHandle>]| match source {
        Source::Scene => Some(scene),
        Source::Pass(n) => outputs[n],
    };

    for (n, &index) in post.iter().enumerate() {
        let is_last = n + 1 == post.len();

        chain.unbind_all();
        let mut inputs: Vec<TextureId> = Vec::with_capacity(reads[n].len());
        for &source in &reads[n] {
            let handle = handle_of(source, &outputs)
                .ok_or_else(|| RenderError::InvalidPassOrder(format!("pass {n} reads a released output")))?;
            chain.bind_source(handle)?;
            inputs.push(chain.get(handle)?.color());
        }

        let target = if is_last {
            PassTarget {
                color: Attachment::Screen,
                depth: None,
                clear: None,
            }
        } else {
            let handle = chain.acquire(device, width, height, target_format)?;
            chain.bind_destination(handle)?;
            outputs[n] = Some(handle);
            PassTarget {
                depth: None,
                ..chain.get(handle)?.pass_target()
            }
        };

        let pass = &mut passes[index];
        pass.set_state(PassState::TargetBound);
        device.begin_pass(pass.label(), &target)?;
        pass.set_state(PassState::Executing);
        if let PassKind::PostEffect(effect_pass) = pass.kind() {
            device.draw_fullscreen(effect_pass.effect(), &inputs)?;
        }
        device.end_pass()?;
        pass.set_state(PassState::Idle);
        stats.passes_executed += 1;
        stats.draw_calls += 1;
        chain.unbind_all();

        // Release everything whose last reader was this pass, and outputs
        // nobody reads.
        let mut released: Vec<Source> = Vec::new();
        for &source in &reads[n] {
            if last_use.get(&source) == Some(&n) && !released.contains(&source) {
                released.push(source);
                if let Some(handle) = handle_of(source, &outputs) {
                    chain.release(device, handle)?;
                }
                if let Source::Pass(m) = source {
                    outputs[m] = None;
                }
            }
        }
        if !last_use.contains_key(&Source::Pass(n)) {
            if let Some(handle) = outputs[n].take() {
                chain.release(device, handle)?;
            }
        }
    }

    Ok(())
}
