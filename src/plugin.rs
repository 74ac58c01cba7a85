//! Plugin pipeline.
//!
//! A [`Plugin`] is a capability attached to the router with two hooks:
//! `modify_route` runs once per route at registration and may inject
//! internal argument slots; `modify_call` runs per request, after
//! argument binding and before the handler, and may inspect or rewrite
//! the argument array or abort the call with an error.
//!
//! Plugins apply in registration order at both registration and call
//! time. An argument injected by `modify_route` is `Internal`: the binder
//! never reads it from the wire, and it is the plugin's job to populate
//! it during `modify_call`.

use std::any::Any;
use std::collections::HashMap;

use crate::arg::{Arg, ArgReader, ArgType};
use crate::dispatch::RouteContext;
use crate::error::HttpError;

/// Opaque per-(plugin, route) registration state, typically the index of
/// an injected argument. Downcast by the plugin that produced it.
pub type PluginRouteState = Box<dyn Any + Send + Sync>;

/// Registration-time surface handed to [`Plugin::modify_route`].
pub struct RouteModifier<'a> {
    args: &'a mut Vec<Arg>,
}

impl<'a> RouteModifier<'a> {
    pub(crate) fn new(args: &'a mut Vec<Arg>) -> Self {
        RouteModifier { args }
    }

    /// Append an internal argument slot and return its index.
    pub fn add_arg(&mut self, name: &str, ty: ArgType, reader: Option<ArgReader>) -> usize {
        let mut arg = Arg::internal(name, ty);
        arg.reader = reader;
        let index = self.args.len();
        self.args.push(arg);
        index
    }

    /// The declared arguments, for plugins that key off existing names.
    pub fn args(&self) -> &[Arg] {
        self.args
    }
}

/// A router capability.
pub trait Plugin: Send + Sync {
    /// Stable name; the router exposes lookup by it so generated code can
    /// bind to a specific plugin.
    fn name(&self) -> &str;

    /// Called once per route at registration. May inject internal args
    /// via the modifier; returns per-route state replayed on every call.
    fn modify_route(
        &self,
        modifier: &mut RouteModifier<'_>,
        properties: &HashMap<String, String>,
    ) -> Option<PluginRouteState> {
        let _ = (modifier, properties);
        None
    }

    /// Called per request between binding and the handler. Errors abort
    /// the request through the dispatcher's fail path.
    fn modify_call(
        &self,
        state: Option<&PluginRouteState>,
        ctx: &mut RouteContext,
    ) -> Result<(), HttpError> {
        let _ = (state, ctx);
        Ok(())
    }
}
