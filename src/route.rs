//! Route declarations.
//!
//! A [`Route`] pairs a path pattern like `/users/{id}/posts` with the
//! typed arguments it binds, a handler returning a [`Task`], and a
//! [`BodyWriter`] that serializes the handler's result. Declarations are
//! assembled by [`RouteBuilder`] and frozen behind `Arc` before they
//! enter the segment trees; nothing about a route mutates after
//! registration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::arg::{hash_name, Arg, ArgValue};
use crate::dispatch::RouteContext;
use crate::error::HttpError;
use crate::http::Method;
use crate::plugin::{Plugin, PluginRouteState, RouteModifier};
use crate::task::Task;

/// One element of a route's path structure.
///
/// A literal segment matches its name exactly; a capture segment
/// (`arg_index` set) matches any literal and binds the raw text to the
/// argument at that index.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub hash: u64,
    pub arg_index: Option<usize>,
}

impl Segment {
    pub fn is_capture(&self) -> bool {
        self.arg_index.is_some()
    }
}

/// What a handler resolves its task with.
///
/// `Raw` bytes are sent verbatim; `Json` goes through the route's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Raw(Vec<u8>),
    Json(JsonValue),
}

impl ResponseBody {
    /// Convenience for handlers returning a bound argument unchanged.
    pub fn from_value(value: &ArgValue) -> ResponseBody {
        ResponseBody::Json(value.to_json())
    }
}

/// The `Writer` contract: serialize a handler result for the wire.
pub trait BodyWriter: Send + Sync {
    fn write(&self, value: &JsonValue) -> Result<Vec<u8>, HttpError>;
}

/// Default writer; emits compact JSON.
pub struct JsonWriter;

impl BodyWriter for JsonWriter {
    fn write(&self, value: &JsonValue) -> Result<Vec<u8>, HttpError> {
        serde_json::to_vec(value).map_err(HttpError::from)
    }
}

/// Handler invoked once per matched request. Shared across concurrent
/// calls, so it must be safe to invoke from any thread.
pub type Handler = Arc<dyn Fn(&mut RouteContext) -> Task<ResponseBody> + Send + Sync>;

/// A compiled route declaration.
pub struct Route {
    /// `"GET /users/{id}"`, used in logs and client-facing messages.
    pub name: String,
    pub method: Method,
    /// Higher is newer; a client asking for version `v` gets the newest
    /// route with `version <= v`.
    pub version: u32,
    pub segments: Vec<Segment>,
    pub args: Vec<Arg>,
    /// Positions (into `segments`) of capture segments, in path order.
    pub capture_indexes: Vec<usize>,
    /// Index of the single argument that receives the raw body, if any.
    pub body_arg: Option<usize>,
    pub handler: Handler,
    pub writer: Arc<dyn BodyWriter>,
    /// Per-plugin registration state, index-aligned with the router's
    /// plugin list.
    pub plugin_state: Vec<Option<PluginRouteState>>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("segments", &self.segments.len())
            .field("args", &self.args.len())
            .finish()
    }
}

impl Route {
    /// The capture segment at reverse-capture position `i`, i.e. element
    /// `i` of a parameter list collected deepest-first.
    pub fn capture_from_end(&self, i: usize) -> Option<&Segment> {
        let pos = self.capture_indexes.len().checked_sub(1 + i)?;
        self.segments.get(self.capture_indexes[pos])
    }
}

/// Errors raised while registering routes.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route pattern must start with '/': '{0}'")]
    BadPattern(String),

    #[error("path parameter {{{0}}} does not match any declared argument")]
    UnknownPathArg(String),

    #[error("duplicate argument name '{0}'")]
    DuplicateArg(String),

    #[error("path argument '{0}' cannot be body-typed")]
    BodyArgInPath(String),

    #[error("route declares more than one body argument")]
    MultipleBodyArgs,

    #[error("route has no handler: '{0}'")]
    MissingHandler(String),

    #[error("duplicate route: {0} {1} v{2}")]
    DuplicateRoute(Method, String, u32),
}

/// Builder for a single route declaration.
///
/// ```ignore
/// RouteBuilder::new(Method::Get, "/users/{id}")
///     .version(2)
///     .arg(Arg::required("id", ArgType::Int64))
///     .handler(|ctx| Task::finished(ResponseBody::Json(json!({"id": 42}))))
/// ```
pub struct RouteBuilder {
    method: Method,
    pattern: String,
    version: u32,
    args: Vec<Arg>,
    handler: Option<Handler>,
    writer: Arc<dyn BodyWriter>,
    properties: HashMap<String, String>,
}

impl RouteBuilder {
    pub fn new(method: Method, pattern: &str) -> Self {
        RouteBuilder {
            method,
            pattern: pattern.to_string(),
            version: 0,
            args: Vec::new(),
            handler: None,
            writer: Arc::new(JsonWriter),
            properties: HashMap::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RouteContext) -> Task<ResponseBody> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }

    pub fn writer(mut self, writer: Arc<dyn BodyWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Free-form properties consumed by plugins at registration.
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn route_version(&self) -> u32 {
        self.version
    }

    /// Compile the declaration: parse the pattern against the declared
    /// arguments, then let each plugin rewrite the argument list.
    pub(crate) fn build(self, plugins: &[Arc<dyn Plugin>]) -> Result<Route, RouterError> {
        let RouteBuilder {
            method,
            pattern,
            version,
            mut args,
            handler,
            writer,
            properties,
        } = self;

        let handler = handler.ok_or_else(|| RouterError::MissingHandler(pattern.clone()))?;

        let mut seen = HashSet::new();
        for arg in &args {
            if !seen.insert(arg.name.clone()) {
                return Err(RouterError::DuplicateArg(arg.name.clone()));
            }
        }

        let rest = pattern
            .strip_prefix('/')
            .ok_or_else(|| RouterError::BadPattern(pattern.clone()))?;

        let mut segments = Vec::new();
        let mut capture_indexes = Vec::new();
        for part in rest.split('/') {
            if let Some(arg_name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                let arg_index = args
                    .iter()
                    .position(|a| a.name == arg_name)
                    .ok_or_else(|| RouterError::UnknownPathArg(arg_name.to_string()))?;
                if args[arg_index].ty.is_body() {
                    return Err(RouterError::BodyArgInPath(arg_name.to_string()));
                }
                args[arg_index].is_path = true;
                capture_indexes.push(segments.len());
                segments.push(Segment {
                    name: arg_name.to_string(),
                    hash: hash_name(arg_name),
                    arg_index: Some(arg_index),
                });
            } else {
                segments.push(Segment {
                    name: part.to_string(),
                    hash: hash_name(part),
                    arg_index: None,
                });
            }
        }

        let mut body_arg = None;
        for (i, arg) in args.iter().enumerate() {
            if arg.ty.is_body() {
                if body_arg.is_some() {
                    return Err(RouterError::MultipleBodyArgs);
                }
                body_arg = Some(i);
            }
        }

        // Plugins run in registration order; injected args land after the
        // declared ones, at indexes the modifier reports back.
        let mut plugin_state = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let mut modifier = RouteModifier::new(&mut args);
            plugin_state.push(plugin.modify_route(&mut modifier, &properties));
        }

        Ok(Route {
            name: format!("{} {}", method, pattern),
            method,
            version,
            segments,
            args,
            capture_indexes,
            body_arg,
            handler,
            writer,
            plugin_state,
        })
    }
}

/// Serializable route description, for diagnostics and generated-code
/// manifests.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub method: String,
    pub name: String,
    pub version: u32,
    pub args: Vec<ArgSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub optional: bool,
    pub internal: bool,
}

impl RouteSummary {
    pub fn of(route: &Route) -> RouteSummary {
        RouteSummary {
            method: route.method.to_string(),
            name: route.name.clone(),
            version: route.version,
            args: route
                .args
                .iter()
                .map(|a| ArgSummary {
                    name: a.name.clone(),
                    ty: a.ty.to_string(),
                    optional: a.optional,
                    internal: a.visibility == crate::arg::Visibility::Internal,
                })
                .collect(),
        }
    }
}
