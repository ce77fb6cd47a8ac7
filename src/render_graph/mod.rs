//! The render-pass pipeline.
//!
//! A [`Renderer`] owns an ordered list of [`RenderPass`]es and runs them once
//! per frame against a [`RenderDevice`](crate::RenderDevice). Scene passes draw
//! into one scene target; post effects then chain through pooled targets with
//! ping-pong discipline until the last one writes the screen:
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Skybox    │    │ PostEffect  │    │ PostEffect  │    │ PostEffect  │
//! │  + Forward  │───▶│   (bright)  │───▶│   (blur)    │───▶│  (tonemap)  │──▶ Screen
//! │   (scene)   │    └─────────────┘    └─────────────┘    └─────────────┘
//! └─────────────┘          │                  │
//!       │                  ▼                  ▼
//!   Scene target       Target A ◀────────▶ Target B        (ping-pong)
//! ```
//!
//! Without post effects the scene passes draw straight to the screen.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use lantern::*;
//!
//! let program = Rc::new(ShaderProgram::standard_lit());
//! let mut renderer = Renderer::new(RendererConfig::default());
//! renderer
//!     .register_shader_program(
//!         program.clone(),
//!         default_update_transform_function(&program),
//!         default_update_lights_function(&program),
//!     )
//!     .unwrap();
//! renderer.add_render_pass(RenderPass::forward()).unwrap();
//!
//! let material = Rc::new(Material::new(program));
//! let mut device = SoftwareDevice::new(64, 64);
//! renderer.submit(DrawSubmission::new(Rc::new(Mesh::cube()), material, glam::Mat4::IDENTITY));
//! let stats = renderer.render(&mut device).unwrap();
//! assert_eq!(stats.draw_calls, 1);
//! ```

mod forward;
mod post_effect;
mod render_pass;
mod render_target;
mod renderer;
mod skybox;
mod submission;

pub use forward::ForwardPass;
pub use post_effect::{PostEffectPass, Tap};
pub use render_pass::{PassKind, PassState, RenderPass};
pub use render_target::{ColorFormat, RenderTarget, RenderTargetChain, TargetFormat, TargetHandle};
pub use renderer::{FrameStats, Renderer};
pub use skybox::SkyboxPass;
pub use submission::{DrawSubmission, ProgramGroup, SubmissionQueue};
