use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BuildError, Result};
use crate::graph::{AssetGraph, AssetGraphNode};
use crate::queue::{task, Task, WorkQueue};
use crate::resolver::{Resolver, ResolverClient};
use crate::types::{Asset, AssetId, Dependency, NodeKey, Target, TransformRequest};
use crate::worker::{TransformDispatcher, TransformWorker};

/// Configuration for one build session.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub entries: Vec<PathBuf>,
    pub targets: Vec<Target>,
    /// Single-file build mode: a pre-resolved request seeded directly,
    /// bypassing the dependency stage.
    pub seed_request: Option<TransformRequest>,
    pub project_root: PathBuf,
}

impl BuildOptions {
    pub fn new(entries: Vec<PathBuf>, targets: Vec<Target>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            targets,
            seed_request: None,
            project_root: project_root.into(),
        }
    }

    pub fn with_seed_request(mut self, request: TransformRequest) -> Self {
        self.seed_request = Some(request);
        self
    }
}

/// Assets freshly produced during one `build()` call, keyed by asset id
/// (last write wins when two requests produce the same id).
#[derive(Debug, Default)]
pub struct BuildResult {
    pub changed_assets: HashMap<AssetId, Asset>,
}

/// What one processing task reports back to the driver. Tasks never touch
/// the graph themselves; the driver applies every mutation between
/// completions.
enum TaskOutcome {
    Resolved {
        dependency: Dependency,
        /// `None` is an optional dependency whose resolution found nothing.
        resolved: Option<PathBuf>,
    },
    Transformed {
        request: TransformRequest,
        assets: Vec<Asset>,
    },
}

type BuildTask = Task<Result<TaskOutcome>>;

/// Owns the build graph and drives resolution and transformation to a fixed
/// point, re-converging efficiently after files change on disk.
///
/// `build()` first reprocesses every invalid node shallowly to refresh stale
/// parts of the graph, then processes every incomplete node fully, following
/// newly discovered dependencies until no task produces further work. A
/// file-system event observed mid-build cancels the in-flight call; the
/// caller re-invokes `build()` and the mutated graph keeps the partial
/// progress.
pub struct AssetGraphBuilder {
    graph: Mutex<AssetGraph>,
    resolver: ResolverClient,
    dispatcher: TransformDispatcher,
    abort: Mutex<CancellationToken>,
}

impl AssetGraphBuilder {
    pub fn new(
        options: BuildOptions,
        resolver: Arc<dyn Resolver>,
        worker: Arc<dyn TransformWorker>,
    ) -> Self {
        Self::with_dispatcher(options, resolver, TransformDispatcher::new(worker))
    }

    /// Create with a custom dispatcher (e.g. a different concurrency bound).
    pub fn with_dispatcher(
        options: BuildOptions,
        resolver: Arc<dyn Resolver>,
        dispatcher: TransformDispatcher,
    ) -> Self {
        let mut graph = AssetGraph::new();
        graph.initialize(
            &options.entries,
            &options.targets,
            options.seed_request.as_ref(),
        );

        info!(
            project_root = %options.project_root.display(),
            entries = options.entries.len(),
            targets = options.targets.len(),
            "build session created"
        );

        Self {
            graph: Mutex::new(graph),
            resolver: ResolverClient::new(resolver),
            dispatcher,
            abort: Mutex::new(CancellationToken::new()),
        }
    }

    /// Drive the graph to convergence. Fails with [`BuildError::BuildAborted`]
    /// when a file-system event arrives mid-build; call again to pick up the
    /// enlarged invalid set.
    pub async fn build(&self) -> Result<BuildResult> {
        let build_id = Uuid::new_v4();
        let start = Instant::now();

        // Fresh signal per invocation; whatever cancelled the previous run
        // has already been folded into the invalid set.
        let abort = {
            let mut guard = self.abort.lock();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let mut changed: HashMap<AssetId, Asset> = HashMap::new();
        let mut scheduled: HashSet<NodeKey> = HashSet::new();

        // Requests that lost their last importer since being marked are
        // dropped, not reprocessed; retransforming them would fail forever
        // once the file is gone.
        let invalid = {
            let mut graph = self.graph.lock();
            graph.drop_unreachable_invalid();
            graph.invalid_snapshot()
        };
        if !invalid.is_empty() {
            info!(%build_id, nodes = invalid.len(), "shallow phase: refreshing invalid nodes");
        }
        self.run_phase(invalid, true, &abort, &mut changed, &mut scheduled)
            .await?;

        let incomplete = self.graph.lock().incomplete_snapshot();
        if !incomplete.is_empty() {
            info!(%build_id, nodes = incomplete.len(), "completing phase: processing incomplete nodes");
        }
        self.run_phase(incomplete, false, &abort, &mut changed, &mut scheduled)
            .await?;

        info!(
            %build_id,
            changed_assets = changed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "build converged"
        );
        Ok(BuildResult {
            changed_assets: changed,
        })
    }

    /// File-system watcher entry point. Returns false for files that need no
    /// rebuild: paths outside the graph, and paths whose only requests are
    /// unreachable leftovers (those get dropped here). For relevant files
    /// the affected request nodes are marked invalid and any in-flight
    /// build is cancelled.
    pub fn respond_to_fs_change(&self, path: &Path) -> bool {
        let mut graph = self.graph.lock();
        if !graph.has_node(path) {
            return false;
        }
        let marked = graph.invalidate_file(path);
        drop(graph);
        if marked == 0 {
            return false;
        }

        self.abort.lock().cancel();
        info!(path = %path.display(), "file change invalidated the graph");
        true
    }

    /// True iff some node awaits reprocessing; the caller uses this to
    /// decide whether a rebuild is worth triggering at all.
    pub fn is_invalid(&self) -> bool {
        self.graph.lock().is_invalid()
    }

    /// Read access to the session-owned graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&AssetGraph) -> R) -> R {
        f(&self.graph.lock())
    }

    async fn run_phase(
        &self,
        nodes: Vec<AssetGraphNode>,
        shallow: bool,
        abort: &CancellationToken,
        changed: &mut HashMap<AssetId, Asset>,
        scheduled: &mut HashSet<NodeKey>,
    ) -> Result<()> {
        let mut queue = WorkQueue::new();
        for node in nodes {
            if let Some(build_task) = self.task_for_node(node, scheduled)? {
                queue.push(build_task);
            }
        }

        queue
            .drain(|outcome| self.on_task_complete(outcome?, shallow, abort, changed, scheduled))
            .await
    }

    /// Dispatch one node to its processing step. Only dependency and
    /// transform-request nodes ever need processing; anything else reaching
    /// the dispatcher is a graph-construction bug.
    fn task_for_node(
        &self,
        node: AssetGraphNode,
        scheduled: &mut HashSet<NodeKey>,
    ) -> Result<Option<BuildTask>> {
        if !scheduled.insert(node.key()) {
            // Already in flight or already processed this build.
            return Ok(None);
        }

        match node {
            AssetGraphNode::Dependency(dependency) => {
                let resolver = self.resolver.clone();
                Ok(Some(task(async move {
                    let resolved = resolver.resolve(&dependency).await?;
                    Ok(TaskOutcome::Resolved {
                        dependency,
                        resolved,
                    })
                })))
            }
            AssetGraphNode::TransformRequest(request) => {
                let dispatcher = self.dispatcher.clone();
                Ok(Some(task(async move {
                    let output = dispatcher.run(&request).await?;
                    Ok(TaskOutcome::Transformed {
                        request,
                        assets: output.assets,
                    })
                })))
            }
            other => Err(BuildError::UnexpectedNode { kind: other.kind() }),
        }
    }

    /// Apply a completed task's result to the graph and decide follow-on
    /// work. Runs on the driver task only; the abort signal is checked after
    /// the awaited collaborator call and before any mutation.
    fn on_task_complete(
        &self,
        outcome: TaskOutcome,
        shallow: bool,
        abort: &CancellationToken,
        changed: &mut HashMap<AssetId, Asset>,
        scheduled: &mut HashSet<NodeKey>,
    ) -> Result<Vec<BuildTask>> {
        match outcome {
            TaskOutcome::Resolved {
                dependency,
                resolved: None,
            } => {
                if abort.is_cancelled() {
                    return Err(BuildError::BuildAborted);
                }
                self.graph.lock().exclude_dependency(&dependency);
                Ok(vec![])
            }
            TaskOutcome::Resolved {
                dependency,
                resolved: Some(file_path),
            } => {
                if abort.is_cancelled() {
                    return Err(BuildError::BuildAborted);
                }
                let request = TransformRequest::new(file_path, dependency.env);
                let is_new_request = self.graph.lock().resolve_dependency(&dependency, &request);
                debug!(
                    specifier = %dependency.specifier,
                    path = %request.file_path.display(),
                    is_new_request,
                    "dependency resolved"
                );

                if is_new_request {
                    // A request that did not exist has never been
                    // transformed, so resolving enqueues its transform even
                    // during the shallow phase.
                    let mut follow_on = Vec::new();
                    if let Some(build_task) =
                        self.task_for_node(AssetGraphNode::TransformRequest(request), scheduled)?
                    {
                        follow_on.push(build_task);
                    }
                    Ok(follow_on)
                } else {
                    Ok(vec![])
                }
            }
            TaskOutcome::Transformed { request, assets } => {
                for asset in &assets {
                    changed.insert(asset.id.clone(), asset.clone());
                }
                if abort.is_cancelled() {
                    return Err(BuildError::BuildAborted);
                }
                let result = self
                    .graph
                    .lock()
                    .resolve_transformer_request(&request, &assets);
                debug!(
                    path = %request.file_path.display(),
                    assets = assets.len(),
                    new_deps = result.new_deps.len(),
                    "transform applied to graph"
                );

                if shallow {
                    // Shallow mode refreshes stale results without growing
                    // the graph; new dependencies stay incomplete for the
                    // completing phase.
                    return Ok(vec![]);
                }
                let mut follow_on = Vec::new();
                for dependency in result.new_deps {
                    if let Some(build_task) =
                        self.task_for_node(AssetGraphNode::Dependency(dependency), scheduled)?
                    {
                        follow_on.push(build_task);
                    }
                }
                Ok(follow_on)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;
    use crate::types::{Environment, EnvironmentContext};
    use crate::worker::TransformOutput;
    use async_trait::async_trait;

    fn browser() -> Environment {
        Environment::new(EnvironmentContext::Browser)
    }

    struct EchoResolver;

    #[async_trait]
    impl Resolver for EchoResolver {
        async fn resolve(
            &self,
            dep: &Dependency,
        ) -> std::result::Result<PathBuf, ResolveError> {
            Ok(PathBuf::from(&dep.specifier))
        }
    }

    struct LeafWorker;

    #[async_trait]
    impl TransformWorker for LeafWorker {
        async fn run_transform(&self, req: &TransformRequest) -> anyhow::Result<TransformOutput> {
            let id = req.file_path.display().to_string();
            Ok(TransformOutput {
                assets: vec![Asset::new(id, req.file_path.clone())],
            })
        }
    }

    fn builder_for(entries: &[&str]) -> AssetGraphBuilder {
        let options = BuildOptions::new(
            entries.iter().map(PathBuf::from).collect(),
            vec![Target::new("default", browser(), "dist")],
            ".",
        );
        AssetGraphBuilder::new(options, Arc::new(EchoResolver), Arc::new(LeafWorker))
    }

    #[tokio::test]
    async fn test_build_converges_on_leaf_entries() {
        let builder = builder_for(&["a.js", "b.js"]);

        let result = builder.build().await.unwrap();
        assert_eq!(result.changed_assets.len(), 2);
        assert!(!builder.is_invalid());
    }

    #[tokio::test]
    async fn test_fs_change_for_unknown_file_is_ignored() {
        let builder = builder_for(&["a.js"]);
        builder.build().await.unwrap();

        assert!(!builder.respond_to_fs_change(Path::new("not/in/graph.js")));
        assert!(!builder.is_invalid());
    }

    #[tokio::test]
    async fn test_fs_change_marks_graph_invalid() {
        let builder = builder_for(&["a.js"]);
        builder.build().await.unwrap();

        assert!(builder.respond_to_fs_change(Path::new("a.js")));
        assert!(builder.is_invalid());

        builder.build().await.unwrap();
        assert!(!builder.is_invalid());
    }

    #[test]
    fn test_only_dependency_and_request_nodes_are_dispatchable() {
        let builder = builder_for(&["a.js"]);
        let mut scheduled = HashSet::new();

        let err = builder
            .task_for_node(AssetGraphNode::Root, &mut scheduled)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, BuildError::UnexpectedNode { kind: "root" }));
    }

    #[tokio::test]
    async fn test_seed_request_builds_without_resolution() {
        let options = BuildOptions::new(vec![], vec![], ".")
            .with_seed_request(TransformRequest::new("only.js", browser()));
        let builder = AssetGraphBuilder::new(options, Arc::new(EchoResolver), Arc::new(LeafWorker));

        let result = builder.build().await.unwrap();
        assert_eq!(result.changed_assets.len(), 1);
    }
}
