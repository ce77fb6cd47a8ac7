//! Error types for the render pipeline.
//!
//! Every fallible operation returns [`RenderError`]. None of these are
//! retryable: they point at a setup mistake (a program registered twice, a
//! zero-sized window, a pass added in the wrong place) or a backend failure,
//! and the caller has to fix the cause before rendering again.
//!
//! Running out of light slots in a shader is deliberately *not* an error. The
//! light update callback reports it through its boolean return value and the
//! renderer surfaces it as [`FrameStats::light_overflow`](crate::FrameStats).

use thiserror::Error;

use crate::config::ConfigError;
use crate::program::ProgramId;
use crate::render_graph::TargetHandle;

/// Broad class of a [`RenderError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Setup bug: registration, pass ordering, target sizing, config files.
    Configuration,
    /// A draw referenced state that was never set up.
    Draw,
    /// The GPU backend itself failed.
    Device,
}

/// Errors produced while configuring or running the render pipeline.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The shader program already has a uniform binder.
    #[error("shader program {0} is already registered")]
    DuplicateRegistration(ProgramId),

    /// A submission used a program that was never registered.
    #[error("shader program {0} was used by a draw before being registered")]
    UnboundProgram(ProgramId),

    /// A render target could not be created or acquired.
    #[error("invalid render target: {0}")]
    InvalidTarget(String),

    /// A target handle outlived its allocation.
    #[error("render target {0:?} was released or reallocated")]
    StaleTarget(TargetHandle),

    /// A pass tried to read and write the same target.
    #[error("render target {0:?} cannot be both source and destination of a pass")]
    TargetAliasing(TargetHandle),

    /// Scene passes must precede every post-effect pass.
    #[error("invalid pass order: {0}")]
    InvalidPassOrder(String),

    /// A post effect taps a label that no earlier pass produces.
    #[error("post effect '{pass}' taps unknown output '{tap}'")]
    UnknownTap { pass: String, tap: String },

    /// Configuration file problems.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend failure (adapter, device or surface).
    #[error("device error: {0}")]
    Device(String),
}

impl RenderError {
    /// Maps the error onto the pipeline's error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RenderError::UnboundProgram(_) => ErrorCategory::Draw,
            RenderError::Device(_) => ErrorCategory::Device,
            RenderError::DuplicateRegistration(_)
            | RenderError::InvalidTarget(_)
            | RenderError::StaleTarget(_)
            | RenderError::TargetAliasing(_)
            | RenderError::InvalidPassOrder(_)
            | RenderError::UnknownTap { .. }
            | RenderError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let id = ProgramId::from_raw(7);
        assert_eq!(
            RenderError::DuplicateRegistration(id).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(RenderError::UnboundProgram(id).category(), ErrorCategory::Draw);
        assert_eq!(
            RenderError::InvalidTarget("0x0".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            RenderError::Device("lost".into()).category(),
            ErrorCategory::Device
        );
    }

    #[test]
    fn messages_name_the_program() {
        let id = ProgramId::from_raw(3);
        let message = RenderError::UnboundProgram(id).to_string();
        assert!(message.contains("#3"), "{message}");
    }
}
