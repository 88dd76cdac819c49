use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::{BuildError, Result};
use crate::types::Dependency;

/// Failure modes of a resolver. Not-found must stay distinguishable from
/// other failures: an optional dependency swallows the former, never the
/// latter.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("module '{specifier}' not found")]
    NotFound { specifier: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The module-resolution collaborator. The algorithm itself is out of scope;
/// this is its interface boundary.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, dependency: &Dependency) -> std::result::Result<PathBuf, ResolveError>;
}

/// Wraps the resolver collaborator with the build's error policy:
/// optional-miss recovers silently as `None`, hard miss becomes a fatal
/// build error, anything else propagates unchanged.
#[derive(Clone)]
pub struct ResolverClient {
    resolver: Arc<dyn Resolver>,
}

impl ResolverClient {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    pub async fn resolve(&self, dependency: &Dependency) -> Result<Option<PathBuf>> {
        match self.resolver.resolve(dependency).await {
            Ok(path) => Ok(Some(path)),
            Err(ResolveError::NotFound { specifier }) if dependency.is_optional => {
                debug!(%specifier, "optional dependency not found, skipping");
                Ok(None)
            }
            Err(ResolveError::NotFound { specifier }) => Err(BuildError::DependencyNotFound {
                specifier,
                from: dependency.source_path.clone(),
            }),
            Err(ResolveError::Other(e)) => Err(BuildError::Other(e)),
        }
    }
}

/// Filesystem resolver for relative specifiers: resolves against the
/// importing file (or the project root for entries) and probes the bare
/// path, `.js`, and `index.js` variants.
pub struct FsResolver {
    project_root: PathBuf,
}

impl FsResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    fn base_dir(&self, dependency: &Dependency) -> PathBuf {
        dependency
            .source_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project_root.clone())
    }

    fn probe(candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        let with_ext = candidate.with_extension("js");
        if with_ext.is_file() {
            return Some(with_ext);
        }
        let index = candidate.join("index.js");
        if index.is_file() {
            return Some(index);
        }
        None
    }
}

#[async_trait]
impl Resolver for FsResolver {
    async fn resolve(&self, dependency: &Dependency) -> std::result::Result<PathBuf, ResolveError> {
        let candidate = self.base_dir(dependency).join(&dependency.specifier);
        match Self::probe(&candidate) {
            Some(path) => Ok(path),
            None => Err(ResolveError::NotFound {
                specifier: dependency.specifier.clone(),
            }),
        }
    }
}
