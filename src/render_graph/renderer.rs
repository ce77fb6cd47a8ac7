//! The frame driver: owns passes, binders, lights and the submission queue.

use std::collections::HashSet;

use crate::binder::{self, BinderRegistry, LightUpdateFn, TransformUpdateFn, UniformBinder};
use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::device::{Clear, PassTarget, RenderDevice};
use crate::error::{RenderError, Result};
use crate::light::{self, Light};
use crate::post_process::PostProcessSettings;
use crate::program::{ShaderProgram, ShaderProgramHandle};
use crate::render_graph::post_effect::run_post_effects;
use crate::render_graph::render_pass::SceneContext;
use crate::render_graph::{
    DrawSubmission, PassKind, PassState, PostEffectPass, RenderPass, RenderTargetChain,
    SubmissionQueue, TargetFormat,
};

/// Counters for one rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub passes_executed: u32,
    /// Program groups drawn (a program used by two passes counts twice).
    pub programs_activated: u32,
    pub light_updates: u32,
    /// Some program could not receive every light this frame.
    pub light_overflow: bool,
}

/// Runs the render-pass pipeline.
///
/// Each frame: [`submit`](Self::submit) draws and [`add_light`](Self::add_light)
/// lights, then call [`render`](Self::render) once. Submissions and lights
/// never outlive the frame they were added in, even when rendering fails.
pub struct Renderer {
    config: RendererConfig,
    passes: Vec<RenderPass>,
    binders: BinderRegistry,
    submissions: SubmissionQueue,
    lights: Vec<Light>,
    camera: Camera,
    targets: RenderTargetChain,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            passes: Vec::new(),
            binders: BinderRegistry::default(),
            submissions: SubmissionQueue::new(),
            lights: Vec::new(),
            camera: Camera::default(),
            targets: RenderTargetChain::new(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Binds update callbacks to a shader program.
    ///
    /// Fails with [`RenderError::DuplicateRegistration`] if the program
    /// already has a binder; the existing binder stays in place.
    pub fn register_shader_program(
        &mut self,
        program: ShaderProgramHandle,
        transform_update: TransformUpdateFn,
        light_update: LightUpdateFn,
    ) -> Result<()> {
        let (id, label) = (program.id(), program.label().to_string());
        self.binders.register(
            program,
            UniformBinder {
                transform_update,
                light_update,
            },
        )?;
        log::debug!("registered shader program {id} '{label}'");
        Ok(())
    }

    /// Removes a program's binder and uniform state. Returns whether it was registered.
    pub fn unregister_shader_program(&mut self, program: &ShaderProgram) -> bool {
        let removed = self.binders.unregister(program.id());
        if removed {
            log::debug!("unregistered shader program {} '{}'", program.id(), program.label());
        }
        removed
    }

    /// The standard light packing for `program`; see
    /// [`default_update_lights_function`](crate::default_update_lights_function).
    pub fn default_update_lights_function(&self, program: &ShaderProgram) -> LightUpdateFn {
        binder::default_update_lights_function(program)
    }

    /// Queues a draw for the current frame.
    pub fn submit(&mut self, submission: DrawSubmission) {
        self.submissions.push(submission);
    }

    /// Number of draws queued for the current frame.
    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    /// Adds a light for the current frame.
    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Appends a pass to the pipeline.
    ///
    /// Scene passes must all come before the first post effect, and a post
    /// effect may only tap labels of earlier post effects.
    pub fn add_render_pass(&mut self, pass: RenderPass) -> Result<()> {
        match pass.kind() {
            PassKind::PostEffect(post) => {
                let earlier: Vec<&PostEffectPass> = self
                    .passes
                    .iter()
                    .filter_map(|p| match p.kind() {
                        PassKind::PostEffect(e) => Some(e),
                        _ => None,
                    })
                    .collect();
                post.validate(&earlier)?;
            }
            PassKind::Skybox(_) | PassKind::Forward(_) => {
                if let Some(post) = self.passes.iter().find(|p| p.is_post_effect()) {
                    return Err(RenderError::InvalidPassOrder(format!(
                        "scene pass '{}' added after post effect '{}'",
                        pass.label(),
                        post.label()
                    )));
                }
            }
        }
        log::debug!("added render pass '{}' at position {}", pass.label(), self.passes.len());
        self.passes.push(pass);
        Ok(())
    }

    /// Appends the post chain described by `settings`.
    pub fn add_post_effects(&mut self, settings: &PostProcessSettings) -> Result<()> {
        for pass in settings.build_chain() {
            self.add_render_pass(RenderPass::post_effect(pass))?;
        }
        Ok(())
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    /// State of the first pass labelled `label`.
    pub fn pass_state(&self, label: &str) -> Option<PassState> {
        self.passes
            .iter()
            .find(|p| p.label() == label)
            .map(RenderPass::state)
    }

    pub fn targets(&self) -> &RenderTargetChain {
        &self.targets
    }

    /// Destroys every pooled render target.
    pub fn release_targets(&mut self, device: &mut dyn RenderDevice) {
        self.targets.release_all(device);
    }

    /// Renders one frame.
    ///
    /// The submission queue and the frame's lights are cleared afterwards,
    /// whether or not rendering succeeded.
    pub fn render(&mut self, device: &mut dyn RenderDevice) -> Result<FrameStats> {
        let result = self.render_frame(device);
        self.submissions.clear_queue();
        self.lights.clear();
        if let Err(err) = &result {
            log::debug!("frame failed: {err}");
            for pass in &mut self.passes {
                pass.set_state(PassState::Idle);
            }
            device.abort_frame();
            self.targets.release_all(device);
        }
        result
    }

    fn render_frame(&mut self, device: &mut dyn RenderDevice) -> Result<FrameStats> {
        let (width, height) = device.viewport();
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidTarget(format!(
                "viewport is {width}x{height}"
            )));
        }
        for id in self.submissions.program_ids() {
            if !self.binders.contains(id) {
                return Err(RenderError::UnboundProgram(id));
            }
        }

        light::sort_nearest_first(&mut self.lights, self.camera.position());

        let mut stats = FrameStats::default();
        device.begin_frame()?;

        let has_post = self.passes.iter().any(RenderPass::is_post_effect);
        let scene_handle = if has_post {
            let format = TargetFormat {
                color: self.config.scene_format,
                depth: true,
            };
            Some(self.targets.acquire(device, width, height, format)?)
        } else {
            None
        };
        let scene_target = match scene_handle {
            Some(handle) => self.targets.get(handle)?.pass_target(),
            None => PassTarget::screen(),
        };
        let mut clear = Some(Clear {
            color: self.config.clear_color,
            depth: 1.0,
        });

        let mut ctx = SceneContext {
            device: &mut *device,
            binders: &mut self.binders,
            submissions: &self.submissions,
            lights: &self.lights,
            camera: &self.camera,
            light_overflow: self.config.light_overflow,
            transformed: HashSet::new(),
            opaque_drawn: false,
            stats: &mut stats,
        };
        for pass in self.passes.iter_mut().filter(|p| !p.is_post_effect()) {
            pass.set_state(PassState::TargetBound);
            ctx.device
                .begin_pass(pass.label(), &scene_target.with_clear(clear.take()))?;
            pass.set_state(PassState::Executing);
            match pass.kind() {
                PassKind::Skybox(skybox) => skybox.execute(&mut ctx)?,
                PassKind::Forward(forward) => forward.execute(&mut ctx)?,
                PassKind::PostEffect(_) => {}
            }
            ctx.device.end_pass()?;
            pass.set_state(PassState::Idle);
            ctx.stats.passes_executed += 1;
        }
        if clear.is_some() {
            device.begin_pass("clear", &scene_target.with_clear(clear))?;
            device.end_pass()?;
        }

        if let Some(scene) = scene_handle {
            run_post_effects(
                &mut self.passes,
                device,
                &mut self.targets,
                scene,
                self.config.scene_format,
                &mut stats,
            )?;
        }

        device.end_frame()?;
        log::trace!("frame stats: {stats:?}");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{default_update_lights_function, default_update_transform_function};
    use crate::config::LightOverflowPolicy;
    use crate::device::{MeshDraw, TextureDesc, TextureId};
    use crate::material::{DepthState, Material};
    use crate::mesh::{Mesh, Transform};
    use crate::post_process::{ColorGrade, PostEffect, ToneMapping};
    use crate::program::{MAX_LIGHTS, UniformValue};
    use crate::render_graph::{ColorFormat, Tap};
    use crate::software::{DeviceEvent, SoftwareDevice};
    use crate::texture::Cubemap;
    use glam::{Mat4, Vec3, Vec4};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every device command into a shared log.
    struct RecordingDevice {
        log: Log,
        viewport: (u32, u32),
        next_texture: u64,
    }

    impl RecordingDevice {
        fn new(log: Log) -> Self {
            Self {
                log,
                viewport: (64, 64),
                next_texture: 0,
            }
        }

        fn push(&self, entry: &str) {
            self.log.borrow_mut().push(entry.to_string());
        }
    }

    impl RenderDevice for RecordingDevice {
        fn viewport(&self) -> (u32, u32) {
            self.viewport
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.viewport = (width, height);
        }

        fn create_texture(&mut self, _desc: &TextureDesc) -> Result<TextureId> {
            self.next_texture += 1;
            Ok(TextureId(self.next_texture))
        }

        fn destroy_texture(&mut self, _id: TextureId) {}

        fn begin_frame(&mut self) -> Result<()> {
            self.push("begin_frame");
            Ok(())
        }

        fn begin_pass(&mut self, label: &str, _target: &PassTarget) -> Result<()> {
            self.push(&format!("pass:{label}"));
            Ok(())
        }

        fn draw_mesh(&mut self, _draw: &MeshDraw<'_>) -> Result<()> {
            self.push("draw");
            Ok(())
        }

        fn draw_skybox(&mut self, _cubemap: &Cubemap, _camera: &Camera, _depth: DepthState) -> Result<()> {
            self.push("skybox");
            Ok(())
        }

        fn draw_fullscreen(&mut self, effect: &PostEffect, _inputs: &[TextureId]) -> Result<()> {
            self.push(&format!("fullscreen:{}", effect.name()));
            Ok(())
        }

        fn end_pass(&mut self) -> Result<()> {
            Ok(())
        }

        fn end_frame(&mut self) -> Result<()> {
            self.push("end_frame");
            Ok(())
        }
    }

    fn logging_binder(program: &ShaderProgram, log: &Log) -> (TransformUpdateFn, LightUpdateFn) {
        let transform = default_update_transform_function(program);
        let lights = default_update_lights_function(program);
        let (t_log, l_log) = (log.clone(), log.clone());
        (
            Box::new(move |active, world, camera, changed| {
                t_log.borrow_mut().push(format!("transform:{changed}"));
                transform(active, world, camera, changed);
            }),
            Box::new(move |active, all, first| {
                l_log.borrow_mut().push("light".to_string());
                lights(active, all, first)
            }),
        )
    }

    fn lit_setup(log: &Log) -> (Renderer, Rc<Material>) {
        let program = Rc::new(ShaderProgram::standard_lit());
        let mut renderer = Renderer::default();
        let (transform, lights) = logging_binder(&program, log);
        renderer
            .register_shader_program(program.clone(), transform, lights)
            .unwrap();
        renderer.add_render_pass(RenderPass::forward()).unwrap();
        (renderer, Rc::new(Material::new(program)))
    }

    fn submit_cubes(renderer: &mut Renderer, material: &Rc<Material>, n: usize) {
        let mesh = Rc::new(Mesh::cube());
        for i in 0..n {
            renderer.submit(DrawSubmission::new(
                mesh.clone(),
                material.clone(),
                Transform::new().position(Vec3::X * i as f32).matrix(),
            ));
        }
    }

    fn flat_material(program: &Rc<ShaderProgram>, color: Vec4) -> Rc<Material> {
        Rc::new(Material::new(program.clone()).with_uniform("Color", color))
    }

    #[test]
    fn transform_then_light_then_draw() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log.clone());

        submit_cubes(&mut renderer, &material, 2);
        renderer.render(&mut device).unwrap();

        let entries = log.borrow();
        let start = entries.iter().position(|e| e == "pass:forward").unwrap();
        assert_eq!(
            &entries[start + 1..],
            &["transform:true", "light", "draw", "transform:false", "draw", "end_frame"]
        );
    }

    #[test]
    fn one_draw_one_light_runs_in_order() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log.clone());

        renderer.add_light(Light::point(Vec3::new(0.0, 2.0, 0.0)));
        submit_cubes(&mut renderer, &material, 1);
        let stats = renderer.render(&mut device).unwrap();

        let entries = log.borrow();
        let start = entries.iter().position(|e| e == "pass:forward").unwrap();
        assert_eq!(
            &entries[start + 1..],
            &["transform:true", "light", "draw", "end_frame"]
        );
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.light_updates, 1);
        assert!(!stats.light_overflow);
    }

    #[test]
    fn program_skipping_a_camera_move_gets_the_new_camera() {
        let log: Log = Rc::default();
        let first = Rc::new(ShaderProgram::standard_lit());
        let second = Rc::new(ShaderProgram::standard_lit());
        let mut renderer = Renderer::default();
        let (transform, lights) = logging_binder(&first, &log);
        renderer
            .register_shader_program(first.clone(), transform, lights)
            .unwrap();
        renderer
            .register_shader_program(
                second.clone(),
                default_update_transform_function(&second),
                default_update_lights_function(&second),
            )
            .unwrap();
        renderer.add_render_pass(RenderPass::forward()).unwrap();
        let first_material = Rc::new(Material::new(first.clone()));
        let second_material = Rc::new(Material::new(second.clone()));
        let mut device = RecordingDevice::new(log.clone());

        let near = Camera::new().at(0.0, 0.0, 10.0);
        let moved = Camera::new().at(-7.0, -3.0, 10.0);

        renderer.set_camera(near);
        submit_cubes(&mut renderer, &first_material, 1);
        renderer.render(&mut device).unwrap();

        // Only the second program sees the camera move.
        renderer.set_camera(moved);
        submit_cubes(&mut renderer, &second_material, 1);
        renderer.render(&mut device).unwrap();

        log.borrow_mut().clear();
        submit_cubes(&mut renderer, &first_material, 1);
        renderer.render(&mut device).unwrap();

        assert!(log.borrow().iter().any(|e| e == "transform:true"));
        let view_proj = first.uniform_location("ViewProjMatrix").unwrap();
        let uploaded = renderer.binders.get(first.id()).unwrap().uniforms().read(view_proj, 0);
        assert_eq!(uploaded, Some(UniformValue::Mat4(moved.view_projection())));
    }

    #[test]
    fn unchanged_camera_never_reports_changed() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log.clone());
        let flags = |log: &Log| -> Vec<String> {
            log.borrow()
                .iter()
                .filter(|e| e.starts_with("transform"))
                .cloned()
                .collect()
        };

        submit_cubes(&mut renderer, &material, 3);
        renderer.render(&mut device).unwrap();
        assert_eq!(flags(&log), ["transform:true", "transform:false", "transform:false"]);

        for _ in 0..3 {
            log.borrow_mut().clear();
            submit_cubes(&mut renderer, &material, 3);
            renderer.render(&mut device).unwrap();
            assert!(flags(&log).iter().all(|f| f == "transform:false"));
        }

        log.borrow_mut().clear();
        renderer.set_camera(Camera::new().at(3.0, 1.0, 8.0));
        submit_cubes(&mut renderer, &material, 3);
        renderer.render(&mut device).unwrap();
        assert_eq!(flags(&log), ["transform:true", "transform:false", "transform:false"]);
    }

    #[test]
    fn program_in_two_passes_gets_camera_once() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        renderer.add_render_pass(RenderPass::forward_transparent()).unwrap();
        let glass = Rc::new(
            Material::new(material.program().clone())
                .with_queue(crate::material::RenderQueue::Transparent),
        );
        let mut device = RecordingDevice::new(log.clone());

        submit_cubes(&mut renderer, &material, 1);
        submit_cubes(&mut renderer, &glass, 1);
        let stats = renderer.render(&mut device).unwrap();

        let changed = log.borrow().iter().filter(|e| *e == "transform:true").count();
        assert_eq!(changed, 1);
        assert_eq!(stats.programs_activated, 2);
    }

    #[test]
    fn unregistered_program_fails_before_gpu_work() {
        let log: Log = Rc::default();
        let (mut renderer, _) = lit_setup(&log);
        let stray = Rc::new(Material::new(Rc::new(ShaderProgram::standard_lit())));
        let mut device = RecordingDevice::new(log.clone());

        submit_cubes(&mut renderer, &stray, 1);
        let err = renderer.render(&mut device).unwrap_err();

        assert!(matches!(err, RenderError::UnboundProgram(id) if id == stray.program().id()));
        assert!(log.borrow().is_empty());
        assert_eq!(renderer.submission_count(), 0);
        assert_eq!(renderer.pass_state("forward"), Some(PassState::Idle));

        // The failed frame's submissions are gone.
        assert_eq!(renderer.render(&mut device).unwrap().draw_calls, 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let program = material.program().clone();
        let err = renderer
            .register_shader_program(
                program.clone(),
                default_update_transform_function(&program),
                default_update_lights_function(&program),
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::DuplicateRegistration(_)));

        // The first (logging) binder is still bound.
        let mut device = RecordingDevice::new(log.clone());
        submit_cubes(&mut renderer, &material, 1);
        renderer.render(&mut device).unwrap();
        assert!(log.borrow().iter().any(|e| e == "light"));
    }

    #[test]
    fn unregistering_unbinds_the_program() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        assert!(renderer.unregister_shader_program(material.program()));
        assert!(!renderer.unregister_shader_program(material.program()));

        let mut device = RecordingDevice::new(log);
        submit_cubes(&mut renderer, &material, 1);
        assert!(matches!(
            renderer.render(&mut device),
            Err(RenderError::UnboundProgram(_))
        ));
    }

    #[test]
    fn zero_viewport_is_an_invalid_target() {
        let log: Log = Rc::default();
        let (mut renderer, _) = lit_setup(&log);
        let mut device = RecordingDevice::new(log);
        device.resize(0, 0);
        assert!(matches!(
            renderer.render(&mut device),
            Err(RenderError::InvalidTarget(_))
        ));
    }

    #[test]
    fn scene_pass_after_post_effect_is_rejected() {
        let mut renderer = Renderer::default();
        renderer
            .add_render_pass(RenderPass::post_effect(PostEffectPass::new(
                "tone_map",
                PostEffect::ToneMap(ToneMapping::Reinhard),
            )))
            .unwrap();
        assert!(matches!(
            renderer.add_render_pass(RenderPass::forward()),
            Err(RenderError::InvalidPassOrder(_))
        ));
    }

    #[test]
    fn taps_must_name_earlier_passes() {
        let mut renderer = Renderer::default();
        let err = renderer
            .add_render_pass(RenderPass::post_effect(
                PostEffectPass::new("composite", PostEffect::BloomComposite { intensity: 1.0 })
                    .with_tap(Tap::Pass("bright".into())),
            ))
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownTap { ref tap, .. } if tap == "bright"));

        // A composite without its scene tap is missing an input.
        assert!(matches!(
            renderer.add_render_pass(RenderPass::post_effect(PostEffectPass::new(
                "composite",
                PostEffect::BloomComposite { intensity: 1.0 },
            ))),
            Err(RenderError::InvalidPassOrder(_))
        ));
    }

    #[test]
    fn light_overflow_truncates_by_default() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log);

        for i in 0..=MAX_LIGHTS {
            renderer.add_light(Light::point(Vec3::new(i as f32, 0.0, 0.0)));
        }
        submit_cubes(&mut renderer, &material, 1);
        let stats = renderer.render(&mut device).unwrap();

        assert!(stats.light_overflow);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.light_updates, 1);
    }

    #[test]
    fn light_count_at_capacity_does_not_overflow() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log);

        for i in 0..MAX_LIGHTS {
            renderer.add_light(Light::point(Vec3::new(i as f32, 0.0, 0.0)));
        }
        submit_cubes(&mut renderer, &material, 1);
        assert!(!renderer.render(&mut device).unwrap().light_overflow);
    }

    #[test]
    fn multi_pass_policy_draws_extra_light_rounds() {
        let log: Log = Rc::default();
        let program = Rc::new(ShaderProgram::standard_lit());
        let mut renderer = Renderer::new(RendererConfig {
            light_overflow: LightOverflowPolicy::MultiPass,
            ..Default::default()
        });
        let (transform, lights) = logging_binder(&program, &log);
        renderer.register_shader_program(program.clone(), transform, lights).unwrap();
        renderer.add_render_pass(RenderPass::forward()).unwrap();
        let material = Rc::new(Material::new(program));
        let mut device = RecordingDevice::new(log);

        for i in 0..(MAX_LIGHTS * 2 + 1) {
            renderer.add_light(Light::point(Vec3::new(i as f32, 0.0, 0.0)));
        }
        submit_cubes(&mut renderer, &material, 2);
        let stats = renderer.render(&mut device).unwrap();

        assert!(!stats.light_overflow);
        assert_eq!(stats.light_updates, 3);
        assert_eq!(stats.draw_calls, 6);
    }

    #[test]
    fn queue_and_lights_are_cleared_each_frame() {
        let log: Log = Rc::default();
        let (mut renderer, material) = lit_setup(&log);
        let mut device = RecordingDevice::new(log);
        renderer.add_light(Light::directional(Vec3::NEG_Y));
        submit_cubes(&mut renderer, &material, 2);
        assert_eq!(renderer.render(&mut device).unwrap().draw_calls, 2);
        assert_eq!(renderer.submission_count(), 0);
        assert_eq!(renderer.render(&mut device).unwrap().draw_calls, 0);
    }

    #[test]
    fn exactly_k_blur_passes_run() {
        let mut renderer = Renderer::default();
        let settings = PostProcessSettings {
            blur_iterations: 5,
            ..Default::default()
        };
        renderer.add_render_pass(RenderPass::forward()).unwrap();
        renderer.add_post_effects(&settings).unwrap();
        let mut device = SoftwareDevice::new(16, 16);

        let stats = renderer.render(&mut device).unwrap();

        let effects: Vec<&str> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Fullscreen { effect, .. } => Some(effect.name()),
                _ => None,
            })
            .collect();
        let blur = effects.iter().filter(|e| **e == "blur").count();
        assert_eq!(blur, 5);
        assert_eq!(effects.first(), Some(&"bright_pass"));
        assert_eq!(effects.last(), Some(&"tone_map"));
        assert_eq!(stats.passes_executed, 1 + 1 + 5 + 1 + 1 + 1);
        // Every pooled target went back to the pool.
        assert_eq!(renderer.targets().acquired_count(), 0);
    }

    fn neutral_bloom() -> PostProcessSettings {
        PostProcessSettings {
            blur_iterations: 4,
            bloom_range: [1.0, 2.0],
            bloom_intensity: 1.0,
            tone_mapping: ToneMapping::None,
            ..Default::default()
        }
    }

    #[test]
    fn without_bright_pixels_bloom_is_a_no_op() {
        let mut renderer = Renderer::new(RendererConfig {
            clear_color: [0.5, 0.25, 0.75, 1.0],
            ..Default::default()
        });
        renderer.add_post_effects(&neutral_bloom()).unwrap();
        let mut device = SoftwareDevice::new(8, 8);

        renderer.render(&mut device).unwrap();

        for pixel in device.screen_pixels() {
            assert!((*pixel - Vec4::new(0.5, 0.25, 0.75, 1.0)).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn single_bright_pixel_spreads() {
        const SIZE: usize = 33;
        let mut device = SoftwareDevice::new(SIZE as u32, SIZE as u32);
        let mut targets = RenderTargetChain::new();
        let scene_format = TargetFormat {
            color: ColorFormat::Rgba16Float,
            depth: false,
        };
        let scene = targets
            .acquire(&mut device, SIZE as u32, SIZE as u32, scene_format)
            .unwrap();
        let mut pixels = vec![Vec4::new(0.0, 0.0, 0.0, 1.0); SIZE * SIZE];
        pixels[16 * SIZE + 16] = Vec4::new(8.0, 8.0, 8.0, 1.0);
        // Below the bloom range: must come through untouched and spread nothing.
        pixels[2 * SIZE + 2] = Vec4::new(0.9, 0.9, 0.9, 1.0);
        pixels[30 * SIZE + 30] = Vec4::new(0.5, 0.25, 0.75, 1.0);
        device.write_texture(targets.get(scene).unwrap().color(), &pixels);

        let mut passes: Vec<RenderPass> = neutral_bloom()
            .build_chain()
            .into_iter()
            .map(RenderPass::post_effect)
            .collect();
        let mut stats = FrameStats::default();
        device.begin_frame().unwrap();
        run_post_effects(
            &mut passes,
            &mut device,
            &mut targets,
            scene,
            ColorFormat::Rgba16Float,
            &mut stats,
        )
        .unwrap();
        device.end_frame().unwrap();

        let screen = device.screen_pixels();
        let at = |x: usize, y: usize| screen[y * SIZE + x];
        assert!(at(16, 16).x > 8.0, "bloom adds onto the source pixel");
        assert!(at(18, 16).x > 0.0 && at(16, 18).x > 0.0 && at(18, 18).x > 0.0);
        // Four 9-tap passes reach at most 8 texels along each axis.
        assert_eq!(at(0, 0).x, 0.0);
        assert_eq!(at(16, 0).x, 0.0);
        // Outside the gated band the image is the pre-bloom scene.
        for (x, y) in [(2, 2), (3, 2), (2, 3), (30, 30), (29, 30), (0, 32)] {
            let before = pixels[y * SIZE + x];
            assert!(
                (at(x, y) - before).abs().max_element() < 1e-6,
                "pixel ({x}, {y}) changed: {:?} -> {:?}",
                before,
                at(x, y)
            );
        }
        assert_eq!(targets.acquired_count(), 0);
        assert!(passes.iter().all(|p| p.state() == PassState::Idle));
    }

    #[test]
    fn color_grade_identity_passes_scene_through() {
        let mut renderer = Renderer::new(RendererConfig {
            clear_color: [0.2, 0.4, 0.6, 1.0],
            ..Default::default()
        });
        renderer
            .add_render_pass(RenderPass::post_effect(PostEffectPass::new(
                "grade",
                PostEffect::ColorGrade(ColorGrade::IDENTITY),
            )))
            .unwrap();
        let mut device = SoftwareDevice::new(4, 4);
        renderer.render(&mut device).unwrap();
        assert!(
            (device.screen_pixels()[5] - Vec4::new(0.2, 0.4, 0.6, 1.0))
                .abs()
                .max_element()
                < 1e-5
        );
    }

    #[test]
    fn resize_reallocates_scene_targets() {
        let mut renderer = Renderer::default();
        renderer.add_render_pass(RenderPass::forward()).unwrap();
        renderer.add_post_effects(&neutral_bloom()).unwrap();
        let mut device = SoftwareDevice::new(512, 512);

        renderer.render(&mut device).unwrap();
        assert_eq!(renderer.targets().extent(), (512, 512));
        let before = renderer.targets().allocations();

        device.resize(1024, 1024);
        renderer.render(&mut device).unwrap();

        assert_eq!(renderer.targets().extent(), (1024, 1024));
        assert!(renderer.targets().allocations() > before);
        assert_eq!(device.screen_size(), (1024, 1024));
        // Only the 1024 generation of targets is still alive.
        assert!(device.live_texture_sizes().iter().all(|s| *s == (1024, 1024)));
    }

    #[test]
    fn skybox_never_occludes_geometry() {
        let program = Rc::new(ShaderProgram::standard_lit());
        let red = flat_material(&program, Vec4::new(1.0, 0.0, 0.0, 1.0));
        let sky = Rc::new(Cubemap::solid(Vec4::new(0.0, 0.0, 1.0, 1.0)));
        let camera = Camera::new().at(0.0, 0.0, 3.0).looking_at(0.0, 0.0, 0.0);

        for sky_first in [true, false] {
            let mut renderer = Renderer::default();
            renderer
                .register_shader_program(
                    program.clone(),
                    default_update_transform_function(&program),
                    default_update_lights_function(&program),
                )
                .unwrap();
            if sky_first {
                renderer.add_render_pass(RenderPass::skybox(sky.clone())).unwrap();
                renderer.add_render_pass(RenderPass::forward()).unwrap();
            } else {
                renderer.add_render_pass(RenderPass::forward()).unwrap();
                renderer.add_render_pass(RenderPass::skybox(sky.clone())).unwrap();
            }
            renderer.set_camera(camera);
            renderer.submit(DrawSubmission::new(
                Rc::new(Mesh::cube()),
                red.clone(),
                Mat4::IDENTITY,
            ));
            let mut device = SoftwareDevice::new(32, 32);
            renderer.render(&mut device).unwrap();

            let screen = device.screen_pixels();
            assert_eq!(screen[16 * 32 + 16], Vec4::new(1.0, 0.0, 0.0, 1.0), "sky_first={sky_first}");
            assert_eq!(screen[0], Vec4::new(0.0, 0.0, 1.0, 1.0), "sky_first={sky_first}");
        }
    }
}
