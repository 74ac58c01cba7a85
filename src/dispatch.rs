//! Dispatch controller.
//!
//! Drives a buffered request through the core:
//!
//! ```text
//! Transport → Dispatcher → Matcher → Binder (← Plugins) → Handler
//!                                                            │
//! Transport ◀── Response ◀── Listener ◀──── Task ◀───────────┘
//! ```
//!
//! Control flows linearly until the handler, which returns a [`Task`];
//! when that task reaches a terminal state the completion handler
//! notifies the listener and writes exactly one response. Any error
//! raised before the handler runs (bad binding, plugin rejection) goes
//! through the same fail path, so the listener observes exactly one
//! terminal event per started call.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::arg::ArgValue;
use crate::binder::{bind_args, check_args};
use crate::error::HttpError;
use crate::http::{requested_version, HeaderMap, Method, Request, Responder, Response};
use crate::route::{ResponseBody, Route};
use crate::task::Task;
use crate::tree::Router;

/// Correlation id for one dispatched call, issued by the listener at
/// `on_start` and echoed on the terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> CallId {
        CallId(Uuid::new_v4().to_string())
    }
}

impl Default for CallId {
    fn default() -> Self {
        CallId::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The per-call bundle handed to plugins and the handler.
///
/// Owned by one request at a time; the argument array may be taken by
/// the handler and retained until its task completes. Response headers
/// accumulate until the handler returns; the dispatcher folds them into
/// the response when the task finishes.
pub struct RouteContext {
    pub route: Arc<Route>,
    pub args: Vec<Option<ArgValue>>,
    pub call_id: CallId,
    /// Raw path plus query, for plugins that read wire state themselves.
    pub uri: String,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
}

impl RouteContext {
    /// Borrow a bound argument by index.
    pub fn arg(&self, index: usize) -> Option<&ArgValue> {
        self.args.get(index).and_then(|slot| slot.as_ref())
    }

    /// Move a bound argument out of its slot.
    pub fn take_arg(&mut self, index: usize) -> Option<ArgValue> {
        self.args.get_mut(index).and_then(|slot| slot.take())
    }

    /// Borrow a bound argument by name.
    pub fn arg_named(&self, name: &str) -> Option<&ArgValue> {
        let index = self.route.args.iter().position(|a| a.name == name)?;
        self.arg(index)
    }

    pub fn set_response_header(&mut self, name: &str, value: &str) {
        self.response_headers.set(name, value);
    }
}

/// Lifecycle observer: one `on_start` per matched call, followed by
/// exactly one of `on_succeed`/`on_fail`, which happens before the
/// response reaches the transport.
pub trait DispatchListener: Send + Sync {
    fn on_start(&self, route: &Route) -> CallId;
    fn on_succeed(&self, route: &Route, call_id: &CallId);
    fn on_fail(&self, route: &Route, call_id: &CallId, error: &HttpError);
}

/// Listener that does nothing beyond issuing call ids.
pub struct NoopListener;

impl DispatchListener for NoopListener {
    fn on_start(&self, _route: &Route) -> CallId {
        CallId::new()
    }

    fn on_succeed(&self, _route: &Route, _call_id: &CallId) {}

    fn on_fail(&self, _route: &Route, _call_id: &CallId, _error: &HttpError) {}
}

/// Listener that traces the call lifecycle.
pub struct LogListener;

impl DispatchListener for LogListener {
    fn on_start(&self, route: &Route) -> CallId {
        let call_id = CallId::new();
        debug!(route = %route.name, call_id = %call_id, "call started");
        call_id
    }

    fn on_succeed(&self, route: &Route, call_id: &CallId) {
        debug!(route = %route.name, call_id = %call_id, "call succeeded");
    }

    fn on_fail(&self, route: &Route, call_id: &CallId, error: &HttpError) {
        warn!(route = %route.name, call_id = %call_id, error = %error, "call failed");
    }
}

/// Fallback for requests no route claims: unknown methods and unmatched
/// paths. By contract it emits the 404/405 family.
pub type DefaultHandler = Arc<dyn Fn(&Request, Responder) + Send + Sync>;

fn not_found_handler() -> DefaultHandler {
    Arc::new(|request: &Request, respond: Responder| {
        let error = HttpError::NotFound(format!("no route for {} {}", request.method, request.uri));
        respond(error_response(&error));
    })
}

fn error_response(error: &HttpError) -> Response {
    let mut headers = HeaderMap::new();
    headers.set("content-type", "text/plain");
    Response {
        status: error.status(),
        headers,
        body: error.public_message().into_bytes(),
    }
}

/// The dispatch controller. Cheap to share; all state is immutable after
/// construction.
pub struct Dispatcher {
    router: Arc<Router>,
    listener: Arc<dyn DispatchListener>,
    default_handler: DefaultHandler,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, listener: Arc<dyn DispatchListener>) -> Dispatcher {
        Dispatcher {
            router,
            listener,
            default_handler: not_found_handler(),
        }
    }

    /// Replace the fallback for unroutable requests.
    pub fn with_default_handler(mut self, handler: DefaultHandler) -> Dispatcher {
        self.default_handler = handler;
        self
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Drive one request to exactly one response.
    pub fn dispatch(&self, request: Request, respond: Responder) {
        let version = requested_version(&request.headers);

        let method = match Method::parse(&request.method) {
            Some(m) => m,
            None => {
                debug!(method = %request.method, "unknown method, delegating to default handler");
                (self.default_handler)(&request, respond);
                return;
            }
        };

        let mut captured = Vec::new();
        let route = match self.router.find(method, version, &request.uri, &mut captured) {
            Some(route) => route.clone(),
            None => {
                debug!(uri = %request.uri, version, "no route matched");
                (self.default_handler)(&request, respond);
                return;
            }
        };
        debug!(route = %route.name, version = route.version, "matched");

        // From here on the listener has seen the call start, so every
        // outcome must flow through succeed or fail exactly once.
        let call_id = self.listener.on_start(&route);

        let bound = match bind_args(&route, &request.uri, &captured, &request.headers, &request.content)
        {
            Ok(bound) => bound,
            Err(e) => {
                self.fail_minimal(&route, &call_id, respond, e);
                return;
            }
        };
        let mut values = bound.values;
        if let Err(e) = check_args(&route, &mut values, bound.parse_error.as_ref()) {
            self.fail_minimal(&route, &call_id, respond, e);
            return;
        }

        let mut ctx = RouteContext {
            route: route.clone(),
            args: values,
            call_id: call_id.clone(),
            uri: request.uri.clone(),
            request_headers: request.headers.clone(),
            response_headers: HeaderMap::new(),
        };

        for (index, plugin) in self.router.plugins().iter().enumerate() {
            let state = route.plugin_state.get(index).and_then(|s| s.as_ref());
            if let Err(e) = plugin.modify_call(state, &mut ctx) {
                self.fail_minimal(&route, &call_id, respond, e);
                return;
            }
        }

        let task: Task<ResponseBody> = (route.handler)(&mut ctx);

        let listener = self.listener.clone();
        task.when_complete(move |outcome| match outcome {
            Ok(body) => {
                let bytes = match &body {
                    ResponseBody::Raw(raw) => Ok(raw.clone()),
                    ResponseBody::Json(value) => ctx.route.writer.write(value),
                };
                match bytes {
                    Ok(bytes) => {
                        let mut headers = ctx.response_headers;
                        if !headers.contains("content-type") {
                            headers.set("content-type", "application/json");
                        }
                        listener.on_succeed(&ctx.route, &ctx.call_id);
                        respond(Response {
                            status: 200,
                            headers,
                            body: bytes,
                        });
                    }
                    Err(e) => {
                        listener.on_fail(&ctx.route, &ctx.call_id, &e);
                        respond(error_response(&e));
                    }
                }
            }
            Err(e) => {
                listener.on_fail(&ctx.route, &ctx.call_id, &e);
                respond(error_response(&e));
            }
        });
    }

    /// Fail path for errors raised before a context exists. The listener
    /// still observes its one terminal event for the started call.
    fn fail_minimal(&self, route: &Arc<Route>, call_id: &CallId, respond: Responder, error: HttpError) {
        self.listener.on_fail(route, call_id, &error);
        respond(error_response(&error));
    }
}
