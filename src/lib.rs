//! waypost — request routing and dispatch core for a lightweight
//! RPC/HTTP framework
//!
//! This library provides:
//!
//! - **Routes** (`route`): declarations pairing a path pattern, typed
//!   arguments, a version tag, and a handler
//! - **Segment trees** (`tree`): per-method tries compiled once at
//!   startup; version-aware matching with wildcard captures
//! - **Argument binding** (`binder`): path, query, JSON, and form
//!   coercion into typed slots
//! - **Plugins** (`plugin`): capabilities that inject internal arguments
//!   at registration and authorize or rewrite each call
//! - **Tasks** (`task`): single-shot deferred results with
//!   map/then/catch/always combinators
//! - **Dispatch** (`dispatch`): the controller tying it together behind
//!   a transport-agnostic request/response contract
//!
//! ## Architecture
//!
//! ```text
//! Transport → Dispatch → Matcher → Binder (← Plugins) → Handler
//!                                                          │
//! Transport ◀── Response ◀── Listener ◀──── Task ◀─────────┘
//! ```
//!
//! ## Request flow
//!
//! 1. The transport delivers a buffered request and a response sink
//! 2. The dispatcher resolves the client's API version from headers
//! 3. The method-indexed segment tree matches the path, collecting
//!    captures
//! 4. The binder fills the typed argument array from path, query, and
//!    body
//! 5. Plugins inspect the call, populate injected arguments, or reject
//! 6. The handler returns a task; its terminal outcome becomes the
//!    response, with the listener observing start and exactly one of
//!    succeed/fail per call

pub mod arg;
pub mod binder;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod plugin;
pub mod route;
pub mod task;
pub mod tree;

pub use arg::{hash_name, Arg, ArgReader, ArgType, ArgValue, Visibility};
pub use binder::{bind_args, check_args, BoundArgs};
pub use dispatch::{
    CallId, DefaultHandler, DispatchListener, Dispatcher, LogListener, NoopListener, RouteContext,
};
pub use error::HttpError;
pub use http::{
    percent_decode, requested_version, Body, HeaderMap, Method, Request, Responder, Response,
};
pub use plugin::{Plugin, PluginRouteState, RouteModifier};
pub use route::{
    ArgSummary, BodyWriter, Handler, JsonWriter, ResponseBody, Route, RouteBuilder, RouteSummary,
    RouterError, Segment,
};
pub use task::Task;
pub use tree::{Router, RouterBuilder, SegmentTree};

#[cfg(test)]
mod e2e_tests;
