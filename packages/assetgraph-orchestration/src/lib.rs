/*
 * Assetgraph Orchestration - Incremental Asset Graph Builder
 *
 * Concurrent build-graph orchestration for a source bundler.
 *
 * Architecture:
 * - Build Graph (petgraph, key-deduplicated typed nodes)
 * - Resolver / Transform Worker collaborators (injected, async traits)
 * - Fixed-point work queue with cooperative cancellation
 * - Shallow + completing build phases for cheap re-convergence
 * - Observability (tracing)
 */

// Public modules
pub mod builder;
pub mod error;
pub mod graph;
pub mod queue;
pub mod resolver;
pub mod types;
pub mod worker;

// Re-exports
pub use builder::{AssetGraphBuilder, BuildOptions, BuildResult};
pub use error::{BuildError, Result};
pub use graph::{AssetGraph, AssetGraphEdge, AssetGraphNode, ResolvedRequestResult};
pub use queue::{task, Task, WorkQueue};
pub use resolver::{FsResolver, ResolveError, Resolver, ResolverClient};
pub use types::{
    Asset, AssetId, AssetStats, Dependency, Environment, EnvironmentContext, NodeKey, Target,
    TransformRequest,
};
pub use worker::{TransformDispatcher, TransformOutput, TransformWorker};
