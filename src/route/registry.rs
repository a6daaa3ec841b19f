//! The route registry: a segment tree with lock-free lookups.
//!
//! The tree root is published through an [`ArcSwap`]: lookups load a
//! snapshot and walk it without ever blocking, while mutations serialise on
//! a write lock, rebuild the affected path with shared subtrees, and swap
//! the new root in. Readers observe either the old or the new tree, never a
//! partial one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::protocol::{HttpError, PathParam, PathParams, RequestTarget, TargetSegment};
use crate::route::segment::parse_pattern;
use crate::route::{Route, RouteError, Segment};

/// The result of a successful lookup: the route and its bound parameters.
#[derive(Debug)]
pub struct RouteMatch {
    route: Arc<Route>,
    params: PathParams,
}

impl RouteMatch {
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn into_parts(self) -> (Arc<Route>, PathParams) {
        (self.route, self.params)
    }
}

#[derive(Default)]
struct Node {
    statics: HashMap<String, Arc<Node>>,
    param: Option<Arc<Node>>,
    catch_all: Option<Arc<Node>>,
    route: Option<Arc<Route>>,
}

impl Node {
    fn shallow_clone(&self) -> Node {
        Node {
            statics: self.statics.clone(),
            param: self.param.clone(),
            catch_all: self.catch_all.clone(),
            route: self.route.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.param.is_none() && self.catch_all.is_none() && self.route.is_none()
    }

    /// Any route pattern in this subtree, for collision diagnostics.
    fn first_pattern(&self) -> Option<String> {
        if let Some(route) = &self.route {
            return Some(route.pattern().to_string());
        }
        self.statics
            .values()
            .chain(self.param.iter())
            .chain(self.catch_all.iter())
            .find_map(|child| child.first_pattern())
    }
}

/// Registry of routes, shared by every exchange of a server.
pub struct RouteRegistry {
    root: ArcSwap<Node>,
    write_lock: Mutex<()>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self { root: ArcSwap::from_pointee(Node::default()), write_lock: Mutex::new(()) }
    }

    /// Registers a route. Fails when its positional shape (parameter names
    /// erased) is already taken, or when a catch-all would gain siblings.
    pub fn add(&self, route: Arc<Route>) -> Result<(), RouteError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let root = self.root.load_full();
        let new_root = insert(&root, route.segments(), &route)?;
        self.root.store(Arc::new(new_root));
        Ok(())
    }

    /// Removes whatever route occupies the pattern's position. The pattern
    /// is normalised the same way insertion normalises it.
    pub fn remove(&self, pattern: &str) -> Result<Option<Arc<Route>>, RouteError> {
        let segments = parse_pattern(pattern)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let root = self.root.load_full();
        let (new_root, removed) = remove(&root, &segments, None);
        if removed.is_some() {
            self.root.store(Arc::new(new_root));
        }
        Ok(removed)
    }

    /// Removes the route only if the occupant of its position is this very
    /// route value. Returns whether anything was removed.
    pub fn remove_route(&self, route: &Arc<Route>) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let root = self.root.load_full();
        let (new_root, removed) = remove(&root, route.segments(), Some(route));
        let hit = removed.is_some();
        if hit {
            self.root.store(Arc::new(new_root));
        }
        hit
    }

    /// Looks a normalised target up. Never blocks.
    ///
    /// At every level a static child wins over the parameter child; a
    /// catch-all consumes the remainder. The catch-all value keeps the raw
    /// segments joined by `/`, preserving the client's encoding.
    pub fn lookup(&self, target: &RequestTarget) -> Result<RouteMatch, HttpError> {
        let root = self.root.load_full();
        let segments = target.segments();

        let mut node: &Node = &root;
        for segment in segments {
            if let Some(child) = node.statics.get(segment.decoded()) {
                node = child;
                continue;
            }
            if let Some(child) = &node.param {
                node = child;
                continue;
            }
            if let Some(child) = &node.catch_all {
                return match &child.route {
                    Some(route) => Ok(RouteMatch {
                        route: route.clone(),
                        params: extract_params(route, segments),
                    }),
                    None => Err(HttpError::no_route_found(target.path())),
                };
            }
            return Err(HttpError::no_route_found(target.path()));
        }

        match &node.route {
            Some(route) => Ok(RouteMatch { route: route.clone(), params: extract_params(route, segments) }),
            None => Err(HttpError::no_route_found(target.path())),
        }
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_params(route: &Arc<Route>, segments: &[TargetSegment]) -> PathParams {
    let mut params = Vec::new();
    for (position, segment) in route.segments().iter().enumerate() {
        match segment {
            Segment::Static(_) => {}
            Segment::Param(name) => {
                let bound = &segments[position];
                params.push(PathParam::new(name.clone(), bound.raw().to_string(), bound.decoded().to_string()));
            }
            Segment::CatchAll(name) => {
                let raw = join(segments[position..].iter().map(TargetSegment::raw));
                let decoded = join(segments[position..].iter().map(TargetSegment::decoded));
                params.push(PathParam::new(name.clone(), raw, decoded));
            }
        }
    }
    PathParams::new(params)
}

fn join<'a>(pieces: impl Iterator<Item = &'a str>) -> String {
    pieces.collect::<Vec<_>>().join("/")
}

fn insert(node: &Node, remaining: &[Segment], route: &Arc<Route>) -> Result<Node, RouteError> {
    let mut copy = node.shallow_clone();

    let segment = match remaining.first() {
        None => {
            if let Some(existing) = &node.route {
                return Err(RouteError::Collision {
                    pattern: route.pattern().to_string(),
                    existing: existing.pattern().to_string(),
                });
            }
            copy.route = Some(route.clone());
            return Ok(copy);
        }
        Some(segment) => segment,
    };

    // a catch-all tolerates no siblings at its position
    if !segment.is_catch_all() {
        if let Some(catch_all) = &node.catch_all {
            return Err(RouteError::Collision {
                pattern: route.pattern().to_string(),
                existing: catch_all.first_pattern().unwrap_or_default(),
            });
        }
    }

    let empty = Node::default();
    match segment {
        Segment::Static(literal) => {
            let child = node.statics.get(literal).map(|child| &**child).unwrap_or(&empty);
            copy.statics.insert(literal.clone(), Arc::new(insert(child, &remaining[1..], route)?));
        }
        Segment::Param(_) => {
            let child = node.param.as_deref().unwrap_or(&empty);
            copy.param = Some(Arc::new(insert(child, &remaining[1..], route)?));
        }
        Segment::CatchAll(_) => {
            if !node.statics.is_empty() || node.param.is_some() {
                return Err(RouteError::Collision {
                    pattern: route.pattern().to_string(),
                    existing: node.first_pattern().unwrap_or_default(),
                });
            }
            let child = node.catch_all.as_deref().unwrap_or(&empty);
            copy.catch_all = Some(Arc::new(insert(child, &remaining[1..], route)?));
        }
    }
    Ok(copy)
}

fn remove(node: &Node, remaining: &[Segment], identity: Option<&Arc<Route>>) -> (Node, Option<Arc<Route>>) {
    let mut copy = node.shallow_clone();

    let segment = match remaining.first() {
        None => {
            let matches = match (&node.route, identity) {
                (Some(_), None) => true,
                (Some(occupant), Some(wanted)) => Arc::ptr_eq(occupant, wanted),
                (None, _) => false,
            };
            if matches {
                return (Node { route: None, ..copy }, node.route.clone());
            }
            return (copy, None);
        }
        Some(segment) => segment,
    };

    let removed = match segment {
        Segment::Static(literal) => match node.statics.get(literal) {
            Some(child) => {
                let (new_child, removed) = remove(child, &remaining[1..], identity);
                if new_child.is_empty() {
                    copy.statics.remove(literal);
                } else {
                    copy.statics.insert(literal.clone(), Arc::new(new_child));
                }
                removed
            }
            None => None,
        },
        Segment::Param(_) => match &node.param {
            Some(child) => {
                let (new_child, removed) = remove(child, &remaining[1..], identity);
                copy.param = (!new_child.is_empty()).then(|| Arc::new(new_child));
                removed
            }
            None => None,
        },
        Segment::CatchAll(_) => match &node.catch_all {
            Some(child) => {
                let (new_child, removed) = remove(child, &remaining[1..], identity);
                copy.catch_all = (!new_child.is_empty()).then(|| Arc::new(new_child));
                removed
            }
            None => None,
        },
    };

    (copy, removed)
}
