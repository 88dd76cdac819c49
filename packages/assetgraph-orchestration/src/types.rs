use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Execution context a target compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentContext {
    Browser,
    Node,
    ElectronMain,
}

impl EnvironmentContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentContext::Browser => "browser",
            EnvironmentContext::Node => "node",
            EnvironmentContext::ElectronMain => "electron-main",
        }
    }
}

impl fmt::Display for EnvironmentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolution/compilation environment. Part of node identity: the same file
/// transformed for two environments is two distinct transform requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    pub context: EnvironmentContext,
}

impl Environment {
    pub fn new(context: EnvironmentContext) -> Self {
        Self { context }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            context: EnvironmentContext::Browser,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context)
    }
}

/// Output configuration attached to one or more entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub env: Environment,
    pub dist_dir: PathBuf,
}

impl Target {
    pub fn new(name: impl Into<String>, env: Environment, dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            env,
            dist_dir: dist_dir.into(),
        }
    }
}

/// A single import reference discovered inside an asset (or seeded from an
/// entry), not yet necessarily resolved to a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub specifier: String,
    pub env: Environment,
    pub is_optional: bool,
    /// Id of the asset that declared this import, if any.
    pub source_asset: Option<AssetId>,
    /// File the import was written in; resolvers use it for relative lookup.
    pub source_path: Option<PathBuf>,
}

impl Dependency {
    pub fn new(specifier: impl Into<String>, env: Environment) -> Self {
        Self {
            specifier: specifier.into(),
            env,
            is_optional: false,
            source_asset: None,
            source_path: None,
        }
    }

    pub fn entry(specifier: impl Into<String>, env: Environment) -> Self {
        Self::new(specifier, env)
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn from_asset(mut self, asset: AssetId, path: impl Into<PathBuf>) -> Self {
        self.source_asset = Some(asset);
        self.source_path = Some(path.into());
        self
    }
}

/// A concrete (file, environment) pair queued for transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformRequest {
    pub file_path: PathBuf,
    pub env: Environment,
}

impl TransformRequest {
    pub fn new(file_path: impl Into<PathBuf>, env: Environment) -> Self {
        Self {
            file_path: file_path.into(),
            env,
        }
    }
}

/// Stable asset identifier assigned by the transform worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-asset measurements recorded during transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetStats {
    pub size: u64,
    /// Wall-clock duration of the transform dispatch that produced this asset.
    pub time_ms: u64,
}

/// One unit of compiled output produced from a transform request, carrying
/// the further dependencies it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub file_path: PathBuf,
    pub asset_type: String,
    pub dependencies: Vec<Dependency>,
    pub stats: AssetStats,
}

impl Asset {
    pub fn new(id: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let asset_type = file_path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: AssetId::new(id),
            file_path,
            asset_type,
            dependencies: Vec::new(),
            stats: AssetStats::default(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Stable node identity derived from semantic content, so re-resolving the
/// same logical unit reuses the same node instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn root() -> Self {
        Self("root".to_string())
    }

    pub fn entry(path: &std::path::Path) -> Self {
        Self(format!("entry:{}", path.display()))
    }

    pub fn target(target: &Target) -> Self {
        Self(format!("target:{}:{}", target.name, target.env))
    }

    pub fn dependency(dep: &Dependency) -> Self {
        let origin = dep
            .source_asset
            .as_ref()
            .map(|id| id.0.as_str())
            .unwrap_or("@entry");
        Self(format!("dep:{}:{}:{}", dep.specifier, dep.env, origin))
    }

    pub fn transform_request(request: &TransformRequest) -> Self {
        Self(format!("req:{}:{}", request.file_path.display(), request.env))
    }

    pub fn asset(id: &AssetId) -> Self {
        Self(format!("asset:{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
