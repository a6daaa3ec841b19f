//! Routes: a pattern of segments plus the handlers representing the
//! resource.

mod registry;
mod segment;

pub use registry::{RouteMatch, RouteRegistry};
pub use segment::Segment;

use std::collections::HashSet;
use std::sync::Arc;

use http::Method;
use mime::Mime;
use thiserror::Error;

use crate::media::AcceptEntry;
use crate::protocol::HttpError;
use crate::RequestHandler;

/// Route construction and registration failures.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("invalid pattern {pattern:?}: catch-all segment must be last")]
    CatchAllNotLast { pattern: String },

    #[error("invalid pattern {pattern:?}: empty parameter name")]
    EmptyParamName { pattern: String },

    #[error("invalid pattern {pattern:?}: duplicate parameter name {name:?}")]
    DuplicateParamName { pattern: String, name: String },

    #[error("route {pattern:?} has no handlers")]
    MissingHandler { pattern: String },

    #[error("route {pattern:?} registers two handlers under the same (method, accepts, produces) key")]
    HandlerCollision { pattern: String },

    #[error("route {pattern:?} collides with registered route {existing:?}")]
    Collision { pattern: String, existing: String },
}

/// A target resource: an ordered segment pattern and one or more handlers.
///
/// Patterns use `/`-delimited segments; a leading `:` names a positional
/// parameter, a leading `*` a trailing catch-all, e.g.
/// `/users/:id/items/*rest`.
#[derive(Debug)]
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    handlers: Vec<RequestHandler>,
}

impl Route {
    pub fn builder(pattern: impl Into<String>) -> RouteBuilder {
        RouteBuilder { pattern: pattern.into(), handlers: Vec::new() }
    }

    /// The canonical pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn handlers(&self) -> &[RequestHandler] {
        &self.handlers
    }

    /// Selects the most specific handler for a request.
    ///
    /// Handlers are filtered by method equality, then by whether their
    /// accepts predicate covers the request content type; the survivors are
    /// ranked against the accept list by specificity, ties broken by the
    /// client's q-values.
    pub fn select(
        &self,
        method: &Method,
        content_type: Option<&Mime>,
        accept: &[AcceptEntry],
    ) -> Result<&RequestHandler, HttpError> {
        let candidates: Vec<&RequestHandler> = self
            .handlers
            .iter()
            .filter(|handler| handler.method() == method)
            .filter(|handler| accepts_content_type(handler, content_type))
            .collect();

        let mut best_key = None;
        let mut best: Vec<&RequestHandler> = Vec::new();
        for handler in candidates {
            let key = match accept_rank(handler, accept) {
                Some(key) => key,
                // nothing the handler produces is acceptable to the client
                None => continue,
            };
            match best_key {
                None => {
                    best_key = Some(key);
                    best.push(handler);
                }
                Some(current) if key > current => {
                    best_key = Some(key);
                    best.clear();
                    best.push(handler);
                }
                Some(current) if key == current => best.push(handler),
                Some(_) => {}
            }
        }

        match best.len() {
            0 => Err(HttpError::no_handler_found(format!(
                "{method} {} (content-type: {})",
                self.pattern,
                content_type.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string())
            ))),
            1 => Ok(best[0]),
            n => Err(HttpError::ambiguous_handler(format!("{n} handlers qualify equally for {method} {}", self.pattern))),
        }
    }
}

fn accepts_content_type(handler: &RequestHandler, content_type: Option<&Mime>) -> bool {
    match (handler.accepts(), content_type) {
        // no constraint accepts anything, a body being present or not
        (None, _) => true,
        (Some(range), Some(mime)) => range.covers(mime),
        (Some(_), None) => false,
    }
}

/// The best `(specificity, quality)` pairing of the handler's produces set
/// against the accept list, `None` when nothing is acceptable.
fn accept_rank(handler: &RequestHandler, accept: &[AcceptEntry]) -> Option<(u8, u16)> {
    let mut best: Option<(u8, u16)> = None;
    for produce in handler.produces() {
        for entry in accept {
            if entry.range().compatible(produce) {
                let key = (entry.range().specificity(), entry.quality());
                if best.map(|current| key > current).unwrap_or(true) {
                    best = Some(key);
                }
            }
        }
    }
    best
}

pub struct RouteBuilder {
    pattern: String,
    handlers: Vec<RequestHandler>,
}

impl RouteBuilder {
    pub fn handler(mut self, handler: RequestHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Validates the pattern and the handler set.
    pub fn build(self) -> Result<Arc<Route>, RouteError> {
        let segments = segment::parse_pattern(&self.pattern)?;
        let pattern = segment::pattern_text(&segments);

        if self.handlers.is_empty() {
            return Err(RouteError::MissingHandler { pattern });
        }

        let mut keys = HashSet::new();
        for handler in &self.handlers {
            if !keys.insert(handler.collision_key()) {
                return Err(RouteError::HandlerCollision { pattern });
            }
        }

        Ok(Arc::new(Route { pattern, segments, handlers: self.handlers }))
    }
}
