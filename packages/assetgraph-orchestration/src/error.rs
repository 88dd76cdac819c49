use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to resolve '{specifier}'{}", .from.as_ref().map(|p| format!(" from {}", p.display())).unwrap_or_default())]
    DependencyNotFound {
        specifier: String,
        from: Option<PathBuf>,
    },

    #[error("transform failed for {}", path.display())]
    TransformFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("build aborted")]
    BuildAborted,

    #[error("unexpected {kind} node reached the task dispatcher")]
    UnexpectedNode { kind: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    /// Abort is an expected outcome of a cancelled build, not a real failure.
    /// Callers re-invoke `build()` instead of surfacing it.
    pub fn is_abort(&self) -> bool {
        matches!(self, BuildError::BuildAborted)
    }
}
