//! Error types for the motion engine
//!
//! Every variant is raised synchronously while building an animation
//! primitive. Nothing here surfaces mid-animation: a sequence step that fails
//! at run time becomes [`StepStatus::Failed`](crate::sequence::StepStatus)
//! and cascades cancellation instead of returning an error, and oversized
//! frame deltas are absorbed by the scheduler's clamp.

use thiserror::Error;

/// Errors from building channels, composites, and sequences
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// Invalid physics configuration, rejected before any channel exists
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A step name was declared twice in one sequence
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    /// A step depends on a name that was never declared
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The declared dependencies contain a cycle
    #[error("dependency cycle involving step '{0}'")]
    CycleDetected(String),

    /// A step was addressed by a name the sequence does not contain
    #[error("unknown step '{0}'")]
    UnknownStep(String),

    /// A composite was addressed with a channel name it does not contain
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// A channel name was declared twice in one composite
    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),
}

impl MotionError {
    /// True for the configuration family (physics parameters)
    pub fn is_config(&self) -> bool {
        matches!(self, MotionError::Config(_))
    }

    /// True for the graph family (names and dependencies)
    pub fn is_graph(&self) -> bool {
        !self.is_config()
    }
}

pub type Result<T> = std::result::Result<T, MotionError>;
