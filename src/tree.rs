//! Route registry and the per-method segment trees.
//!
//! Registration compiles every route into a method-indexed trie of
//! [`SegmentTree`] nodes. Each node records the routes that terminate at
//! its depth (split literal/wildcard, sorted by descending version, with
//! index-aligned hash arrays for scan speed) and the subtrees for routes
//! that continue deeper. The tree is immutable after construction and
//! shared read-only across the server's lifetime.
//!
//! ```text
//! GET /users/{id}      ┐
//! GET /users/me        ├──▶  users ──▶ { literal "me", wildcard {id} }
//! GET /users/{id}/fav  ┘              └─▶ wildcard ──▶ { literal "fav" }
//! ```
//!
//! Matching walks one URL segment at a time, preferring a literal child
//! over the wildcard child at every depth and, within a node, the first
//! version-compatible endpoint (descending sort makes that the newest
//! eligible one). Captured segments are appended after recursion
//! unwinds, so the collected parameter list is in reverse depth order;
//! the binder rebinds them to original segment order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::arg::hash_name;
use crate::http::Method;
use crate::plugin::Plugin;
use crate::route::{Route, RouteBuilder, RouteSummary, RouterError};

/// One node of a per-method route trie.
#[derive(Default)]
pub struct SegmentTree {
    /// Hashes of the final literal segment, index-aligned with
    /// `local_literals`.
    local_literal_hashes: Vec<u64>,
    /// Routes terminating here with a literal final segment, descending
    /// by version.
    local_literals: Vec<Arc<Route>>,
    /// Routes terminating here with a captured final segment, descending
    /// by version.
    local_wildcards: Vec<Arc<Route>>,
    /// Next-segment hashes, index-aligned with `children`.
    child_hashes: Vec<u64>,
    /// Next-segment literal names, for the equal-hash confirmation.
    child_names: Vec<String>,
    children: Vec<SegmentTree>,
    /// Aggregated subtree for routes continuing with a capture here.
    wildcard_child: Option<Box<SegmentTree>>,
}

impl SegmentTree {
    /// Compile `routes` (all of one method) into a trie rooted at `depth`.
    pub fn build(routes: Vec<Arc<Route>>, depth: usize) -> SegmentTree {
        let mut node = SegmentTree::default();

        let mut literal_groups: Vec<(String, u64, Vec<Arc<Route>>)> = Vec::new();
        let mut wildcard_continuations: Vec<Arc<Route>> = Vec::new();

        for route in routes {
            let segment = &route.segments[depth];
            if route.segments.len() == depth + 1 {
                // Endpoint at this depth.
                if segment.is_capture() {
                    node.local_wildcards.push(route);
                } else {
                    node.local_literal_hashes.push(segment.hash);
                    node.local_literals.push(route);
                }
            } else if segment.is_capture() {
                wildcard_continuations.push(route);
            } else {
                match literal_groups.iter_mut().find(|(name, _, _)| name == &segment.name) {
                    Some((_, _, group)) => group.push(route),
                    None => literal_groups.push((
                        segment.name.clone(),
                        segment.hash,
                        vec![route],
                    )),
                }
            }
        }

        // Descending version sort; the matcher takes the first compatible
        // hit, which must be the newest. Stable, so registration order
        // breaks exact-version ties.
        sort_descending_by_version(&mut node.local_literals, &mut node.local_literal_hashes);
        node.local_wildcards
            .sort_by(|a, b| b.version.cmp(&a.version));

        for (name, hash, group) in literal_groups {
            node.child_hashes.push(hash);
            node.child_names.push(name);
            node.children.push(SegmentTree::build(group, depth + 1));
        }
        if !wildcard_continuations.is_empty() {
            node.wildcard_child = Some(Box::new(SegmentTree::build(
                wildcard_continuations,
                depth + 1,
            )));
        }

        node
    }

    /// Resolve one URL against this subtree.
    ///
    /// `start` indexes into `path`; a leading `/` is skipped. Captured
    /// segments are pushed onto `params` verbatim (still
    /// percent-encoded), deepest first.
    pub fn find<'a>(
        &'a self,
        version: u32,
        path: &str,
        start: usize,
        params: &mut Vec<String>,
    ) -> Option<&'a Arc<Route>> {
        let bytes = path.as_bytes();
        let mut seg_start = start;
        if seg_start < bytes.len() && bytes[seg_start] == b'/' {
            seg_start += 1;
        }

        let mut seg_end = seg_start;
        while seg_end < bytes.len() && bytes[seg_end] != b'/' && bytes[seg_end] != b'?' {
            seg_end += 1;
        }
        let segment = &path[seg_start..seg_end];
        let hash = hash_name(segment);
        let terminal = seg_end == bytes.len() || bytes[seg_end] == b'?';

        if terminal {
            for (i, route) in self.local_literals.iter().enumerate() {
                if self.local_literal_hashes[i] == hash
                    && route.version <= version
                    && final_segment_name(route) == segment
                {
                    return Some(route);
                }
            }
            for route in &self.local_wildcards {
                if route.version <= version {
                    params.push(segment.to_string());
                    return Some(route);
                }
            }
            return None;
        }

        for (i, child) in self.children.iter().enumerate() {
            if self.child_hashes[i] == hash && self.child_names[i] == segment {
                if let Some(route) = child.find(version, path, seg_end, params) {
                    return Some(route);
                }
            }
        }
        if let Some(wildcard) = &self.wildcard_child {
            if let Some(route) = wildcard.find(version, path, seg_end, params) {
                params.push(segment.to_string());
                return Some(route);
            }
        }
        None
    }
}

fn final_segment_name(route: &Route) -> &str {
    route
        .segments
        .last()
        .map(|s| s.name.as_str())
        .unwrap_or_default()
}

/// Sort two index-aligned arrays by descending route version.
fn sort_descending_by_version(routes: &mut Vec<Arc<Route>>, hashes: &mut Vec<u64>) {
    let mut order: Vec<usize> = (0..routes.len()).collect();
    order.sort_by(|&a, &b| routes[b].version.cmp(&routes[a].version));
    *routes = order.iter().map(|&i| routes[i].clone()).collect();
    *hashes = order.iter().map(|&i| hashes[i]).collect();
}

/// The compiled route registry: per-method trees, the plugin list, and
/// lookup surfaces for dispatch and generated code.
pub struct Router {
    routes: Vec<Arc<Route>>,
    trees: HashMap<Method, SegmentTree>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Resolve a request line to a route, collecting path captures into
    /// `params` in reverse depth order.
    pub fn find(
        &self,
        method: Method,
        version: u32,
        uri: &str,
        params: &mut Vec<String>,
    ) -> Option<&Arc<Route>> {
        // Offset 1 skips the mandatory leading '/'.
        self.trees.get(&method)?.find(version, uri, 1, params)
    }

    /// Lookup a plugin by its declared name.
    pub fn plugin(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Serializable description of every registered route.
    pub fn summaries(&self) -> Vec<RouteSummary> {
        self.routes.iter().map(|r| RouteSummary::of(r)).collect()
    }
}

/// Accumulates plugins and route declarations, then freezes them into a
/// [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    plugins: Vec<Arc<dyn Plugin>>,
    routes: Vec<Arc<Route>>,
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("plugins", &self.plugins.len())
            .field("routes", &self.routes)
            .finish()
    }
}

impl RouterBuilder {
    pub fn new() -> Self {
        RouterBuilder::default()
    }

    /// Attach a plugin. Plugins must be attached before the routes they
    /// should see; they apply in attachment order.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Register a route declaration.
    pub fn route(mut self, decl: RouteBuilder) -> Result<Self, RouterError> {
        let method = decl.method();
        let pattern = decl.pattern().to_string();
        let version = decl.route_version();
        if self.routes.iter().any(|r| {
            r.method == method && r.version == version && r.name == format!("{} {}", method, pattern)
        }) {
            return Err(RouterError::DuplicateRoute(method, pattern, version));
        }

        let route = Arc::new(decl.build(&self.plugins)?);
        debug!(route = %route.name, version = route.version, "registered route");
        self.routes.push(route);
        Ok(self)
    }

    /// Freeze: build one segment tree per method.
    pub fn finish(self) -> Router {
        let mut by_method: HashMap<Method, Vec<Arc<Route>>> = HashMap::new();
        for route in &self.routes {
            by_method
                .entry(route.method)
                .or_default()
                .push(route.clone());
        }
        let trees = by_method
            .into_iter()
            .map(|(method, routes)| (method, SegmentTree::build(routes, 0)))
            .collect();
        Router {
            routes: self.routes,
            trees,
            plugins: self.plugins,
        }
    }
}
