use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use lantern::{
    BlendState, Camera, Config, Cubemap, DrawSubmission, GpuContext, Light, Material,
    MaterialHandle, Mesh, MeshHandle, RenderDevice, RenderError, RenderPass, Renderer,
    RendererConfig, ShaderProgram, SoftwareDevice, Transform, Vec3, Vec4, WgpuDevice,
    default_update_lights_function, default_update_transform_function,
};

const HEADLESS_FRAMES: u32 = 8;

/// Orbits a ring of lit cubes through the skybox, forward and bloom passes.
#[derive(Parser)]
#[command(name = "lantern-viewer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Renderer settings as TOML; missing keys keep their defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Render on the CPU without a window and write the last frame as PNG
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "lantern.png"
    )]
    headless: Option<PathBuf>,
}

/// The demo scene: a ring of lit cubes under three lights, orbited by the camera.
struct Scene {
    renderer: Renderer,
    cube: MeshHandle,
    ground: MeshHandle,
    material: MaterialHandle,
    ground_material: MaterialHandle,
}

impl Scene {
    fn new(config: RendererConfig) -> lantern::Result<Self> {
        let post = config.post_process.clone();
        let program = Rc::new(ShaderProgram::standard_lit());

        let mut renderer = Renderer::new(config);
        renderer.register_shader_program(
            program.clone(),
            default_update_transform_function(&program),
            default_update_lights_function(&program),
        )?;
        renderer.add_render_pass(RenderPass::skybox(Rc::new(Cubemap::gradient(
            Vec3::new(0.15, 0.3, 0.8),
            Vec3::new(0.7, 0.75, 0.8),
            Vec3::new(0.1, 0.1, 0.12),
            32,
        ))))?;
        renderer.add_render_pass(RenderPass::forward())?;
        renderer.add_render_pass(RenderPass::forward_transparent())?;
        renderer.add_post_effects(&post)?;

        let material = Rc::new(
            Material::new(program.clone())
                .with_uniform("Color", Vec4::new(1.0, 0.86, 0.53, 1.0))
                .with_uniform("AmbientColor", Vec3::splat(0.25))
                .with_blend(BlendState::ALPHA),
        );
        let ground_material = Rc::new(
            Material::new(program)
                .with_uniform("Color", Vec4::new(0.4, 0.5, 0.6, 0.8))
                .with_uniform("AmbientColor", Vec3::splat(0.25))
                .with_blend(BlendState::ALPHA)
                .with_queue(lantern::RenderQueue::Transparent),
        );

        Ok(Self {
            renderer,
            cube: Rc::new(Mesh::cube()),
            ground: Rc::new(Mesh::plane(200.0)),
            material,
            ground_material,
        })
    }

    fn render(&mut self, device: &mut dyn RenderDevice, time: f32) -> lantern::Result<()> {
        let (width, height) = device.viewport();
        let angle = time * 0.3;
        let eye = Vec3::new(angle.cos() * 141.0, 100.0, angle.sin() * 141.0);
        self.renderer.set_camera(
            Camera::new()
                .at(eye.x, eye.y, eye.z)
                .looking_at(0.0, 0.0, 0.0)
                .with_fov(60.0)
                .with_aspect(width as f32 / height.max(1) as f32),
        );

        self.renderer.add_light(Light::directional(Vec3::new(-0.3, -1.0, -0.3)));
        self.renderer.add_light(
            Light::point(Vec3::new(29.8, -4.7, -23.1))
                .with_attenuation(5.0, 10.0)
                .with_intensity(20.0)
                .with_color(Vec3::new(1.0, 0.86275, 0.53333)),
        );
        self.renderer
            .add_light(Light::spot(Vec3::ZERO, Vec3::new(0.0, -1.0, 0.0)));

        for i in 0..8 {
            let theta = i as f32 / 8.0 * std::f32::consts::TAU;
            let world = Transform::new()
                .position(Vec3::new(theta.cos() * 40.0, 10.0, theta.sin() * 40.0))
                .uniform_scale(12.0)
                .matrix();
            self.renderer
                .submit(DrawSubmission::new(self.cube.clone(), self.material.clone(), world));
        }
        self.renderer.submit(DrawSubmission::new(
            self.ground.clone(),
            self.ground_material.clone(),
            Transform::new().matrix(),
        ));

        let stats = self.renderer.render(device)?;
        log::debug!("{stats:?}");
        Ok(())
    }
}

#[derive(Default)]
struct Viewer {
    config: RendererConfig,
    window: Option<Arc<Window>>,
    device: Option<WgpuDevice>,
    scene: Option<Scene>,
    start_time: Option<Instant>,
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("Lantern");
        let setup = event_loop
            .create_window(attributes)
            .map_err(|e| -> Box<dyn Error> { e.into() })
            .and_then(|window| {
                let window = Arc::new(window);
                let device = WgpuDevice::new(GpuContext::new(window.clone())?);
                let scene = Scene::new(self.config.clone())?;
                Ok((window, device, scene))
            });
        match setup {
            Ok((window, device, scene)) => {
                window.request_redraw();
                self.window = Some(window);
                self.device = Some(device);
                self.scene = Some(scene);
                self.start_time = Some(Instant::now());
            }
            Err(e) => {
                log::error!("failed to start viewer: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(device) = &mut self.device {
                    device.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(device), Some(scene)) = (&mut self.device, &mut self.scene) {
                    let time = self.start_time.map_or(0.0, |t| t.elapsed().as_secs_f32());
                    match scene.render(device, time) {
                        Ok(()) => {}
                        // Minimized: nothing to draw into until the next resize.
                        Err(RenderError::InvalidTarget(reason)) => log::trace!("frame skipped: {reason}"),
                        Err(e) => log::warn!("frame skipped: {e}"),
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => (),
        }
    }
}

/// Renders a few frames on the CPU, resizing halfway, and writes the last one.
fn run_headless(config: RendererConfig, output: PathBuf) -> Result<(), Box<dyn Error>> {
    let mut scene = Scene::new(config)?;
    let mut device = SoftwareDevice::new(320, 240);
    for frame in 0..HEADLESS_FRAMES {
        if frame == HEADLESS_FRAMES / 2 {
            device.resize(400, 300);
        }
        scene.render(&mut device, frame as f32 * 0.5)?;
    }
    device.save_png(&output)?;
    log::info!("wrote {}", output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => RendererConfig::load_from_file(path)?,
        None => RendererConfig::default(),
    };

    if let Some(output) = cli.headless {
        return run_headless(config, output);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut viewer = Viewer {
        config,
        ..Default::default()
    };
    event_loop.run_app(&mut viewer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_path_is_optional() {
        let cli = Cli::try_parse_from(["lantern-viewer", "--headless"]).unwrap();
        assert_eq!(cli.headless, Some(PathBuf::from("lantern.png")));

        let cli = Cli::try_parse_from(["lantern-viewer", "--headless", "out.png", "--config", "a.toml"])
            .unwrap();
        assert_eq!(cli.headless, Some(PathBuf::from("out.png")));
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));

        let cli = Cli::try_parse_from(["lantern-viewer"]).unwrap();
        assert!(cli.headless.is_none() && cli.config.is_none());
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["lantern-viewer", "--fullscreen"]).is_err());
    }
}
