use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, warn};

use crate::types::{Asset, AssetId, Dependency, NodeKey, Target, TransformRequest};

/// Node of the build graph. Closed sum type so task dispatch is checked for
/// exhaustiveness at compile time.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum AssetGraphNode {
    Root,
    Entry(PathBuf),
    Target(Target),
    Dependency(Dependency),
    TransformRequest(TransformRequest),
    Asset(Asset),
}

impl AssetGraphNode {
    pub fn kind(&self) -> &'static str {
        match self {
            AssetGraphNode::Root => "root",
            AssetGraphNode::Entry(_) => "entry",
            AssetGraphNode::Target(_) => "target",
            AssetGraphNode::Dependency(_) => "dependency",
            AssetGraphNode::TransformRequest(_) => "transform_request",
            AssetGraphNode::Asset(_) => "asset",
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            AssetGraphNode::Root => NodeKey::root(),
            AssetGraphNode::Entry(path) => NodeKey::entry(path),
            AssetGraphNode::Target(target) => NodeKey::target(target),
            AssetGraphNode::Dependency(dep) => NodeKey::dependency(dep),
            AssetGraphNode::TransformRequest(req) => NodeKey::transform_request(req),
            AssetGraphNode::Asset(asset) => NodeKey::asset(&asset.id),
        }
    }
}

/// Edge kinds: "X requires Y to exist before X's effect is final".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetGraphEdge {
    /// Root→Entry, Root→Target, Entry→Dependency, Asset→Dependency.
    Requires,
    /// Dependency→TransformRequest, set (or repointed) by resolution.
    Resolved,
    /// TransformRequest→Asset, one-to-many.
    Produces,
}

/// Outcome of registering produced assets for a transform request.
#[derive(Debug, Default)]
pub struct ResolvedRequestResult {
    /// Dependencies declared by the new assets that do not already have a
    /// resolved, non-invalid transform request. Only these need resolve work.
    pub new_deps: Vec<Dependency>,
}

/// The mutable build graph: typed nodes deduplicated by semantic key, plus
/// the two derived sets driving incremental rebuilds.
///
/// Created once per build session and mutated in place across `build()`
/// calls. All mutation happens on the orchestrator's driver task, so no
/// interior locking is needed here.
pub struct AssetGraph {
    graph: StableDiGraph<AssetGraphNode, AssetGraphEdge>,
    nodes: HashMap<NodeKey, NodeIndex>,
    root: NodeIndex,
    /// Nodes whose prior result is known stale (file-system invalidation).
    invalid: HashMap<NodeKey, NodeIndex>,
    /// Nodes added to the graph but never yet successfully processed.
    incomplete: HashMap<NodeKey, NodeIndex>,
    /// TransformRequest keys per file path, for FS-event relevance checks.
    requests_by_path: HashMap<PathBuf, HashSet<NodeKey>>,
}

impl AssetGraph {
    pub fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(AssetGraphNode::Root);
        let mut nodes = HashMap::new();
        nodes.insert(NodeKey::root(), root);
        Self {
            graph,
            nodes,
            root,
            invalid: HashMap::new(),
            incomplete: HashMap::new(),
            requests_by_path: HashMap::new(),
        }
    }

    /// Populate Root, Entry and Target nodes, seeding one synthetic
    /// dependency per entry × target so entries flow through the same
    /// resolve→transform machinery as discovered imports.
    ///
    /// In single-file build mode a pre-resolved request is seeded directly,
    /// bypassing the dependency stage.
    pub fn initialize(
        &mut self,
        entries: &[PathBuf],
        targets: &[Target],
        seed_request: Option<&TransformRequest>,
    ) {
        for target in targets {
            let idx = self.insert_node(AssetGraphNode::Target(target.clone()));
            self.connect(self.root, idx, AssetGraphEdge::Requires);
        }

        for entry in entries {
            let entry_idx = self.insert_node(AssetGraphNode::Entry(entry.clone()));
            self.connect(self.root, entry_idx, AssetGraphEdge::Requires);

            for target in targets {
                let dep = Dependency::entry(entry.display().to_string(), target.env);
                let key = NodeKey::dependency(&dep);
                let dep_idx = self.insert_node(AssetGraphNode::Dependency(dep));
                self.incomplete.insert(key, dep_idx);
                self.connect(entry_idx, dep_idx, AssetGraphEdge::Requires);
            }
        }

        if let Some(request) = seed_request {
            let key = NodeKey::transform_request(request);
            let idx = self.insert_node(AssetGraphNode::TransformRequest(request.clone()));
            self.index_request_path(request, &key);
            self.incomplete.insert(key, idx);
            self.connect(self.root, idx, AssetGraphEdge::Requires);
        }

        debug!(
            entries = entries.len(),
            targets = targets.len(),
            seeded = seed_request.is_some(),
            "asset graph initialized"
        );
    }

    /// Record that `dependency` resolved to `request`. Returns true when a
    /// transform request with that identity did not exist before; only then
    /// does the caller owe a transform dispatch. An existing request, even an
    /// invalid one, is "not new": the invalid-node sweep reprocesses it.
    pub fn resolve_dependency(
        &mut self,
        dependency: &Dependency,
        request: &TransformRequest,
    ) -> bool {
        let dep_key = NodeKey::dependency(dependency);
        let dep_idx = match self.nodes.get(&dep_key) {
            Some(&idx) => idx,
            None => self.insert_node(AssetGraphNode::Dependency(dependency.clone())),
        };

        let req_key = NodeKey::transform_request(request);
        let (req_idx, is_new_request) = match self.nodes.get(&req_key) {
            Some(&idx) => (idx, false),
            None => {
                let idx = self.insert_node(AssetGraphNode::TransformRequest(request.clone()));
                self.index_request_path(request, &req_key);
                self.incomplete.insert(req_key.clone(), idx);
                (idx, true)
            }
        };

        // Re-resolution after invalidation may repoint the edge.
        let stale: Vec<_> = self
            .graph
            .edges_directed(dep_idx, Direction::Outgoing)
            .filter(|e| *e.weight() == AssetGraphEdge::Resolved && e.target() != req_idx)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        self.connect(dep_idx, req_idx, AssetGraphEdge::Resolved);

        // The dependency's own processing step is complete.
        self.incomplete.remove(&dep_key);
        self.invalid.remove(&dep_key);

        is_new_request
    }

    /// An optional dependency whose resolution found nothing: the node is
    /// left unresolved but its processing step completed successfully.
    pub fn exclude_dependency(&mut self, dependency: &Dependency) {
        let key = NodeKey::dependency(dependency);
        self.incomplete.remove(&key);
        self.invalid.remove(&key);
        debug!(specifier = %dependency.specifier, "optional dependency left unconnected");
    }

    /// Replace any previous asset children of `request` with the freshly
    /// produced ones and register the dependencies they declare. Clears the
    /// request from both derived sets.
    pub fn resolve_transformer_request(
        &mut self,
        request: &TransformRequest,
        assets: &[Asset],
    ) -> ResolvedRequestResult {
        let req_key = NodeKey::transform_request(request);
        let req_idx = match self.nodes.get(&req_key) {
            Some(&idx) => idx,
            None => {
                warn!(key = %req_key, "transform result for a request not in the graph");
                return ResolvedRequestResult::default();
            }
        };

        // Dependencies the fresh assets still declare keep their nodes (and
        // resolved edges); everything else the old assets required is pruned.
        let redeclared: HashSet<NodeKey> = assets
            .iter()
            .flat_map(|asset| asset.dependencies.iter().map(NodeKey::dependency))
            .collect();

        let previous: Vec<_> = self
            .graph
            .edges_directed(req_idx, Direction::Outgoing)
            .filter(|e| *e.weight() == AssetGraphEdge::Produces)
            .map(|e| e.target())
            .collect();
        for asset_idx in previous {
            let former_deps: Vec<_> = self
                .graph
                .edges_directed(asset_idx, Direction::Outgoing)
                .filter(|e| *e.weight() == AssetGraphEdge::Requires)
                .map(|e| e.target())
                .collect();

            self.remove_node_entry(asset_idx);

            for dep_idx in former_deps {
                let Some(dep_key) = self.graph.node_weight(dep_idx).map(AssetGraphNode::key)
                else {
                    continue;
                };
                if self.is_orphaned(dep_idx) && !redeclared.contains(&dep_key) {
                    // Removing the node also drops its resolved edge, so the
                    // former transform request becomes unreachable.
                    self.remove_node_entry(dep_idx);
                }
            }
        }

        let mut result = ResolvedRequestResult::default();
        let mut seen = HashSet::new();
        for asset in assets {
            let asset_key = NodeKey::asset(&asset.id);
            let asset_idx = match self.nodes.get(&asset_key) {
                Some(&idx) => {
                    // Same id produced again (e.g. via a second request):
                    // refresh the payload, keep the node.
                    self.graph[idx] = AssetGraphNode::Asset(asset.clone());
                    idx
                }
                None => self.insert_node(AssetGraphNode::Asset(asset.clone())),
            };
            self.connect(req_idx, asset_idx, AssetGraphEdge::Produces);

            for dep in &asset.dependencies {
                let dep_key = NodeKey::dependency(dep);
                let dep_idx = match self.nodes.get(&dep_key) {
                    Some(&idx) => idx,
                    None => {
                        let idx = self.insert_node(AssetGraphNode::Dependency(dep.clone()));
                        self.incomplete.insert(dep_key.clone(), idx);
                        idx
                    }
                };
                self.connect(asset_idx, dep_idx, AssetGraphEdge::Requires);

                if self.dependency_needs_resolution(dep_idx) && seen.insert(dep_key) {
                    result.new_deps.push(dep.clone());
                }
            }
        }

        self.incomplete.remove(&req_key);
        self.invalid.remove(&req_key);
        result
    }

    /// Mark the transform request node(s) for a changed file as invalid,
    /// returning how many were marked. A request nothing resolves to any
    /// more is dropped instead of marked: reprocessing it would resurrect
    /// work the graph already let go of. Deliberately does not cascade to
    /// dependents: cascading is a rebuild-time side effect, which keeps
    /// unrelated edits cheap.
    pub fn invalidate_file(&mut self, path: &Path) -> usize {
        let keys: Vec<NodeKey> = match self.requests_by_path.get(path) {
            Some(keys) => keys.iter().cloned().collect(),
            None => return 0,
        };
        let mut marked = 0;
        for key in keys {
            let Some(&idx) = self.nodes.get(&key) else {
                continue;
            };
            if self.is_orphaned(idx) {
                self.drop_unreachable_subtree(idx);
                continue;
            }
            self.invalid.insert(key, idx);
            marked += 1;
        }
        if marked > 0 {
            debug!(path = %path.display(), requests = marked, "file invalidated");
        }
        marked
    }

    /// Drop invalid requests whose last incoming edge disappeared after they
    /// were marked (their importer was reprocessed without the import).
    /// Returns how many were dropped. Called at the start of every build so
    /// the shallow sweep never retransforms an unreachable request.
    pub fn drop_unreachable_invalid(&mut self) -> usize {
        let orphaned: Vec<NodeIndex> = self
            .invalid
            .values()
            .copied()
            .filter(|&idx| self.is_orphaned(idx))
            .collect();
        let dropped = orphaned.len();
        for idx in orphaned {
            if self.graph.node_weight(idx).is_some() {
                self.drop_unreachable_subtree(idx);
            }
        }
        if dropped > 0 {
            debug!(requests = dropped, "dropped unreachable invalid requests");
        }
        dropped
    }

    /// Whether a file-system event for this path is relevant to the graph.
    pub fn has_node(&self, path: &Path) -> bool {
        self.requests_by_path.contains_key(path) || self.nodes.contains_key(&NodeKey::entry(path))
    }

    /// True iff at least one node awaits reprocessing.
    pub fn is_invalid(&self) -> bool {
        !self.invalid.is_empty()
    }

    pub fn invalid_snapshot(&self) -> Vec<AssetGraphNode> {
        self.invalid
            .values()
            .filter_map(|&idx| self.graph.node_weight(idx).cloned())
            .collect()
    }

    pub fn incomplete_snapshot(&self) -> Vec<AssetGraphNode> {
        self.incomplete
            .values()
            .filter_map(|&idx| self.graph.node_weight(idx).cloned())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn asset(&self, id: &AssetId) -> Option<&Asset> {
        match self.nodes.get(&NodeKey::asset(id)) {
            Some(&idx) => match &self.graph[idx] {
                AssetGraphNode::Asset(asset) => Some(asset),
                _ => None,
            },
            None => None,
        }
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.graph.node_weights().filter_map(|node| match node {
            AssetGraphNode::Asset(asset) => Some(asset),
            _ => None,
        })
    }

    pub fn has_request(&self, request: &TransformRequest) -> bool {
        self.nodes.contains_key(&NodeKey::transform_request(request))
    }

    /// The transform request a dependency currently resolves to, if any.
    pub fn resolved_request_for(&self, dependency: &Dependency) -> Option<TransformRequest> {
        let &dep_idx = self.nodes.get(&NodeKey::dependency(dependency))?;
        self.graph
            .edges_directed(dep_idx, Direction::Outgoing)
            .find(|e| *e.weight() == AssetGraphEdge::Resolved)
            .and_then(|e| match &self.graph[e.target()] {
                AssetGraphNode::TransformRequest(req) => Some(req.clone()),
                _ => None,
            })
    }

    /// Whether any dependency edge still resolves to this request. A request
    /// no longer referenced is unreachable and will not be reprocessed.
    pub fn request_is_referenced(&self, request: &TransformRequest) -> bool {
        let Some(&idx) = self.nodes.get(&NodeKey::transform_request(request)) else {
            return false;
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .any(|e| *e.weight() == AssetGraphEdge::Resolved)
    }

    fn dependency_needs_resolution(&self, dep_idx: NodeIndex) -> bool {
        let resolved = self
            .graph
            .edges_directed(dep_idx, Direction::Outgoing)
            .find(|e| *e.weight() == AssetGraphEdge::Resolved);
        match resolved {
            Some(edge) => {
                let target_key = self.graph[edge.target()].key();
                self.invalid.contains_key(&target_key)
            }
            None => true,
        }
    }

    fn is_orphaned(&self, idx: NodeIndex) -> bool {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .next()
            .is_none()
    }

    /// Remove an unreachable node and everything only it kept alive. A
    /// child that keeps another incoming edge (a diamond-shared request, a
    /// dependency redeclared elsewhere) survives the cascade.
    fn drop_unreachable_subtree(&mut self, root_idx: NodeIndex) {
        let mut stack = vec![root_idx];
        while let Some(idx) = stack.pop() {
            let children: Vec<NodeIndex> = self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| e.target())
                .collect();
            self.remove_node_entry(idx);
            for child in children {
                if self.graph.node_weight(child).is_some() && self.is_orphaned(child) {
                    stack.push(child);
                }
            }
        }
    }

    fn remove_node_entry(&mut self, idx: NodeIndex) {
        let Some(node) = self.graph.remove_node(idx) else {
            return;
        };
        let key = node.key();
        self.nodes.remove(&key);
        self.invalid.remove(&key);
        self.incomplete.remove(&key);
        if let AssetGraphNode::TransformRequest(req) = node {
            if let Some(keys) = self.requests_by_path.get_mut(&req.file_path) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.requests_by_path.remove(&req.file_path);
                }
            }
        }
    }

    fn insert_node(&mut self, node: AssetGraphNode) -> NodeIndex {
        let key = node.key();
        if let Some(&idx) = self.nodes.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(node);
        self.nodes.insert(key, idx);
        idx
    }

    fn connect(&mut self, from: NodeIndex, to: NodeIndex, edge: AssetGraphEdge) {
        // At most one edge kind ever connects a given pair of node types.
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, edge);
        }
    }

    fn index_request_path(&mut self, request: &TransformRequest, key: &NodeKey) {
        self.requests_by_path
            .entry(request.file_path.clone())
            .or_default()
            .insert(key.clone());
    }
}

impl Default for AssetGraph {
    fn default() -> Self {
        Self::new()
    }
}
