//! Route registry: the trie behind `/api-doc` plus the endpoints that get
//! bound onto the HTTP front end.
//!
//! Paths are split on `/` into segments. Every registered path ends in a leaf
//! and every prefix of it is a branch. Collisions are rejected, so a path can
//! never silently replace another one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::auth::Access;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("endpoint path is empty")]
    EmptyPath,
    #[error("invalid path segment {segment:?} in {path}")]
    InvalidSegment { path: String, segment: String },
    #[error("endpoint {0} is already registered")]
    Duplicate(String),
    #[error("endpoint {path} conflicts with {existing}")]
    Conflict { path: String, existing: String },
}

/// Error returned by a dynamically registered handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Failed(String),
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

/// What a handler sees of the incoming request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

pub type HandlerResult = Result<serde_json::Value, HandlerError>;

pub trait ApiHandler: Send + Sync + 'static {
    fn call(&self, request: &ApiRequest) -> HandlerResult;

    /// Served verbatim under `<path>.doc`.
    fn doc(&self) -> &str {
        ""
    }
}

struct FnHandler<F> {
    doc: String,
    f: F,
}

impl<F> ApiHandler for FnHandler<F>
where
    F: Fn(&ApiRequest) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, request: &ApiRequest) -> HandlerResult {
        (self.f)(request)
    }

    fn doc(&self) -> &str {
        &self.doc
    }
}

/// Wraps a closure and its doc text into a handler.
pub fn handler<F>(doc: impl Into<String>, f: F) -> Arc<dyn ApiHandler>
where
    F: Fn(&ApiRequest) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        doc: doc.into(),
        f,
    })
}

#[derive(Clone)]
pub struct Endpoint {
    pub path: String,
    pub handler: Arc<dyn ApiHandler>,
    pub access: Access,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("access", &self.access)
            .finish()
    }
}

/// Nested mapping of path segments to handlers, for bulk registration.
#[derive(Clone)]
pub enum EndpointTree {
    Branch(BTreeMap<String, EndpointTree>),
    Handler(Arc<dyn ApiHandler>),
}

impl EndpointTree {
    pub fn branch() -> Self {
        EndpointTree::Branch(BTreeMap::new())
    }

    /// Adds `child` under `key`. No-op on a handler node.
    pub fn with(mut self, key: impl Into<String>, child: impl Into<EndpointTree>) -> Self {
        if let EndpointTree::Branch(children) = &mut self {
            children.insert(key.into(), child.into());
        }
        self
    }
}

impl From<Arc<dyn ApiHandler>> for EndpointTree {
    fn from(handler: Arc<dyn ApiHandler>) -> Self {
        EndpointTree::Handler(handler)
    }
}

#[derive(Debug, Clone, Serialize)]
struct LeafDoc {
    path: String,
    doc: String,
    gated: bool,
    // registered endpoints also answer on `{path}.doc`
    #[serde(skip)]
    doc_route: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Node {
    Branch(BTreeMap<String, Node>),
    Leaf(LeafDoc),
}

#[derive(Debug, Default)]
pub struct Registry {
    root: BTreeMap<String, Node>,
    paths: Vec<String>,
    endpoints: Vec<Endpoint>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a path served by the front end itself (no [`ApiHandler`]).
    pub fn add_builtin(
        &mut self,
        path: &str,
        doc: &str,
        access: Access,
    ) -> Result<(), RegistryError> {
        let segments = segments(path)?;
        self.insert(&segments, doc, access, false)?;
        Ok(())
    }

    pub fn register(
        &mut self,
        path: &str,
        handler: Arc<dyn ApiHandler>,
        access: Access,
    ) -> Result<(), RegistryError> {
        let segments = segments(path)?;
        let path = self.insert(&segments, handler.doc(), access, true)?;
        tracing::debug!(path = %path, ?access, "registered endpoint");
        self.endpoints.push(Endpoint {
            path,
            handler,
            access,
        });
        Ok(())
    }

    /// Registers every handler leaf of `tree` under the slash-join of its keys.
    /// Returns how many endpoints were added; stops at the first collision.
    pub fn register_tree(
        &mut self,
        tree: &EndpointTree,
        access: Access,
    ) -> Result<usize, RegistryError> {
        self.register_subtree(tree, "", access)
    }

    fn register_subtree(
        &mut self,
        tree: &EndpointTree,
        prefix: &str,
        access: Access,
    ) -> Result<usize, RegistryError> {
        match tree {
            EndpointTree::Handler(handler) => {
                self.register(prefix, handler.clone(), access)?;
                Ok(1)
            }
            EndpointTree::Branch(children) => {
                let mut added = 0;
                for (key, child) in children {
                    let path = format!("{prefix}/{key}");
                    added += self.register_subtree(child, &path, access)?;
                }
                Ok(added)
            }
        }
    }

    /// Every registered path, in registration order, each starting with `/`.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The documentation tree rendered by `/api-doc`.
    pub fn doc_tree(&self) -> serde_json::Value {
        serde_json::to_value(&self.root).unwrap_or_default()
    }

    fn insert(
        &mut self,
        segments: &[String],
        doc: &str,
        access: Access,
        doc_route: bool,
    ) -> Result<String, RegistryError> {
        let path = join(segments);
        self.check_free(segments, &path, doc_route)?;

        let (last, parents) = segments.split_last().ok_or(RegistryError::EmptyPath)?;
        let mut level = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let node = level
                .entry(segment.clone())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
            level = match node {
                Node::Branch(children) => children,
                Node::Leaf(_) => {
                    return Err(RegistryError::Conflict {
                        path,
                        existing: join(&segments[..=depth]),
                    })
                }
            };
        }
        level.insert(
            last.clone(),
            Node::Leaf(LeafDoc {
                path: path.clone(),
                doc: doc.to_string(),
                gated: access == Access::Gated,
                doc_route,
            }),
        );
        self.paths.push(path.clone());
        Ok(path)
    }

    // Validates the whole path before anything is inserted, so a rejected
    // registration leaves the trie untouched.
    fn check_free(
        &self,
        segments: &[String],
        path: &str,
        doc_route: bool,
    ) -> Result<(), RegistryError> {
        let conflict = |existing: String| RegistryError::Conflict {
            path: path.to_string(),
            existing,
        };
        let (last, parents) = segments.split_last().ok_or(RegistryError::EmptyPath)?;
        let mut level = &self.root;
        for segment in parents {
            match level.get(segment) {
                None => return Ok(()),
                Some(Node::Leaf(leaf)) => return Err(conflict(leaf.path.clone())),
                Some(Node::Branch(children)) => level = children,
            }
        }
        match level.get(last) {
            Some(Node::Leaf(_)) => return Err(RegistryError::Duplicate(path.to_string())),
            Some(Node::Branch(_)) => return Err(conflict(format!("{path}/..."))),
            None => {}
        }

        // `x.doc` is already taken by the doc route of a registered `x`
        if let Some(Node::Leaf(stem)) = last.strip_suffix(".doc").and_then(|s| level.get(s)) {
            if stem.doc_route {
                return Err(conflict(stem.path.clone()));
            }
        }
        if doc_route {
            if let Some(Node::Leaf(taken)) = level.get(&format!("{last}.doc")) {
                return Err(conflict(taken.path.clone()));
            }
        }
        Ok(())
    }
}

fn segments(path: &str) -> Result<Vec<String>, RegistryError> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        return Err(RegistryError::EmptyPath);
    }
    // `{`/`}` would turn into actix path parameters; dot segments never
    // survive URL normalisation in clients.
    if let Some(bad) = segments
        .iter()
        .find(|s| *s == "." || *s == ".." || s.contains(['{', '}']))
    {
        return Err(RegistryError::InvalidSegment {
            path: path.to_string(),
            segment: bad.clone(),
        });
    }
    Ok(segments)
}

fn join(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}
