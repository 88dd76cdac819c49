//! Integration tests for invalidation and abort-and-restart
//!
//! Covers re-convergence after file changes: shallow reprocessing of exactly
//! the invalidated nodes, dependency-set changes repointing the graph, and
//! cancellation of an in-flight build by a file-system event.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assetgraph_orchestration::{
    Asset, AssetGraphBuilder, AssetId, BuildOptions, Dependency, Environment, EnvironmentContext,
    ResolveError, Resolver, Target, TransformOutput, TransformRequest, TransformWorker,
};
use async_trait::async_trait;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn browser() -> Environment {
    Environment::new(EnvironmentContext::Browser)
}

fn dep(specifier: &str, from_id: &str, from_path: &str) -> Dependency {
    Dependency::new(specifier, browser()).from_asset(AssetId::new(from_id), from_path)
}

/// Mutable specifier→path table shared with the test body.
struct SharedResolver {
    routes: Mutex<HashMap<String, PathBuf>>,
    calls: AtomicUsize,
}

impl SharedResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn route(&self, specifier: &str, path: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(specifier.to_string(), PathBuf::from(path));
    }
}

#[async_trait]
impl Resolver for SharedResolver {
    async fn resolve(&self, dependency: &Dependency) -> Result<PathBuf, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.routes
            .lock()
            .unwrap()
            .get(&dependency.specifier)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                specifier: dependency.specifier.clone(),
            })
    }
}

/// Mutable module table; optionally blocks one path's transform until the
/// test releases it, to exercise mid-build cancellation.
struct SharedWorker {
    modules: Mutex<HashMap<PathBuf, Vec<Dependency>>>,
    dispatches: Mutex<HashMap<PathBuf, usize>>,
    gate_armed: AtomicBool,
    gate_path: PathBuf,
    started: Notify,
    release: Notify,
}

impl SharedWorker {
    fn new(gate_path: &str) -> Arc<Self> {
        Arc::new(Self {
            modules: Mutex::new(HashMap::new()),
            dispatches: Mutex::new(HashMap::new()),
            gate_armed: AtomicBool::new(false),
            gate_path: PathBuf::from(gate_path),
            started: Notify::new(),
            release: Notify::new(),
        })
    }

    fn module(&self, path: &str, deps: Vec<Dependency>) {
        self.modules
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), deps);
    }

    fn dispatches_for(&self, path: &str) -> usize {
        self.dispatches
            .lock()
            .unwrap()
            .get(&PathBuf::from(path))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl TransformWorker for SharedWorker {
    async fn run_transform(&self, req: &TransformRequest) -> anyhow::Result<TransformOutput> {
        *self
            .dispatches
            .lock()
            .unwrap()
            .entry(req.file_path.clone())
            .or_insert(0) += 1;

        if self.gate_armed.load(Ordering::SeqCst) && req.file_path == self.gate_path {
            self.started.notify_one();
            self.release.notified().await;
        }

        let deps = self
            .modules
            .lock()
            .unwrap()
            .get(&req.file_path)
            .cloned()
            .unwrap_or_default();
        let id = req.file_path.display().to_string();
        Ok(TransformOutput {
            assets: vec![Asset::new(id, req.file_path.clone()).with_dependencies(deps)],
        })
    }
}

fn builder(
    entries: &[&str],
    resolver: Arc<SharedResolver>,
    worker: Arc<SharedWorker>,
) -> AssetGraphBuilder {
    init_tracing();
    let options = BuildOptions::new(
        entries.iter().map(PathBuf::from).collect(),
        vec![Target::new("default", browser(), "dist")],
        ".",
    );
    AssetGraphBuilder::new(options, resolver, worker)
}

#[tokio::test]
async fn test_invalidation_reprocesses_exactly_the_stale_node() {
    let resolver = SharedResolver::new();
    resolver.route("app.js", "app.js");
    resolver.route("./util", "util.js");
    let worker = SharedWorker::new("unused");
    worker.module("app.js", vec![dep("./util", "app.js", "app.js")]);
    worker.module("util.js", vec![]);

    let builder = builder(&["app.js"], resolver.clone(), worker.clone());
    builder.build().await.unwrap();

    assert!(builder.respond_to_fs_change(Path::new("util.js")));
    assert!(builder.is_invalid());

    let resolves_before = resolver.calls.load(Ordering::SeqCst);
    let result = builder.build().await.unwrap();

    // Only util.js is retransformed; nothing is re-resolved.
    assert_eq!(result.changed_assets.len(), 1);
    assert!(result.changed_assets.contains_key(&AssetId::new("util.js")));
    assert_eq!(worker.dispatches_for("util.js"), 2);
    assert_eq!(worker.dispatches_for("app.js"), 1);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), resolves_before);
    assert!(!builder.is_invalid());
}

#[tokio::test]
async fn test_invalidation_with_changed_dependency_set() {
    let resolver = SharedResolver::new();
    resolver.route("app.js", "app.js");
    resolver.route("./old", "old.js");
    let worker = SharedWorker::new("unused");
    worker.module("app.js", vec![dep("./old", "app.js", "app.js")]);
    worker.module("old.js", vec![]);

    let builder = builder(&["app.js"], resolver.clone(), worker.clone());
    builder.build().await.unwrap();

    // The edited app.js now imports ./new instead of ./old.
    resolver.route("./new", "new.js");
    worker.module("app.js", vec![dep("./new", "app.js", "app.js")]);
    worker.module("new.js", vec![]);
    assert!(builder.respond_to_fs_change(Path::new("app.js")));

    let result = builder.build().await.unwrap();

    // Shallow phase refreshes app.js; the completing phase resolves exactly
    // the newly added dependency.
    assert_eq!(result.changed_assets.len(), 2);
    assert!(result.changed_assets.contains_key(&AssetId::new("app.js")));
    assert!(result.changed_assets.contains_key(&AssetId::new("new.js")));
    assert_eq!(worker.dispatches_for("old.js"), 1);
    assert_eq!(worker.dispatches_for("new.js"), 1);

    // The dropped dependency's former request is no longer resolved through
    // any edge.
    builder.with_graph(|graph| {
        let old_request = TransformRequest::new("old.js", browser());
        assert!(!graph.request_is_referenced(&old_request));
    });
}

#[tokio::test]
async fn test_deleting_a_dropped_module_does_not_wedge_rebuilds() {
    let resolver = SharedResolver::new();
    resolver.route("app.js", "app.js");
    resolver.route("./old", "old.js");
    let worker = SharedWorker::new("unused");
    worker.module("app.js", vec![dep("./old", "app.js", "app.js")]);
    worker.module("old.js", vec![]);

    let builder = builder(&["app.js"], resolver.clone(), worker.clone());
    builder.build().await.unwrap();

    // app.js no longer imports ./old.
    worker.module("app.js", vec![]);
    assert!(builder.respond_to_fs_change(Path::new("app.js")));
    builder.build().await.unwrap();

    // old.js then gets deleted on disk. Its only request is unreachable,
    // so the event needs no rebuild and no later sweep retransforms it.
    assert!(!builder.respond_to_fs_change(Path::new("old.js")));
    assert!(!builder.is_invalid());

    let result = builder.build().await.unwrap();
    assert!(result.changed_assets.is_empty());
    assert_eq!(worker.dispatches_for("old.js"), 1);
    builder.with_graph(|graph| {
        assert!(!graph.has_request(&TransformRequest::new("old.js", browser())));
    });
}

#[tokio::test]
async fn test_fs_event_mid_build_aborts_and_restart_converges() {
    let resolver = SharedResolver::new();
    resolver.route("app.js", "app.js");
    resolver.route("./util", "util.js");
    let worker = SharedWorker::new("app.js");
    worker.module("app.js", vec![dep("./util", "app.js", "app.js")]);
    worker.module("util.js", vec![]);
    worker.gate_armed.store(true, Ordering::SeqCst);

    let builder = Arc::new(builder(&["app.js"], resolver.clone(), worker.clone()));

    let build = {
        let builder = builder.clone();
        tokio::spawn(async move { builder.build().await })
    };

    // Wait for app.js to enter its transform, then edit it.
    worker.started.notified().await;
    assert!(builder.respond_to_fs_change(Path::new("app.js")));
    worker.gate_armed.store(false, Ordering::SeqCst);
    worker.release.notify_one();

    let err = build.await.unwrap().unwrap_err();
    assert!(err.is_abort());
    assert!(builder.is_invalid());

    // Restart picks up the invalid set and converges to what a single
    // uninterrupted build would have produced.
    let result = builder.build().await.unwrap();
    let changed: HashSet<_> = result.changed_assets.keys().cloned().collect();
    let expected: HashSet<_> = [AssetId::new("app.js"), AssetId::new("util.js")]
        .into_iter()
        .collect();
    assert_eq!(changed, expected);
    assert!(!builder.is_invalid());
}
