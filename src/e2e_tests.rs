//! End-to-end dispatch tests.
//!
//! These tests drive full requests through the dispatcher: version
//! negotiation, tree matching, argument binding, the plugin pipeline,
//! handler tasks, and response assembly. The route set mirrors a small
//! user/item API with a password-checking plugin on one route.

#[cfg(test)]
mod tests {
    use crate::arg::{Arg, ArgType, ArgValue};
    use crate::dispatch::{CallId, DispatchListener, Dispatcher, RouteContext};
    use crate::error::HttpError;
    use crate::http::{percent_decode, Method, Request, Responder, Response};
    use crate::plugin::{Plugin, PluginRouteState, RouteModifier};
    use crate::route::{ResponseBody, Route, RouteBuilder};
    use crate::task::Task;
    use crate::tree::Router;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Records the full listener lifecycle so tests can assert the
    /// one-terminal-event-per-start balance.
    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DispatchListener for RecordingListener {
        fn on_start(&self, route: &Route) -> CallId {
            self.events.lock().unwrap().push(format!("start {}", route.name));
            CallId::new()
        }

        fn on_succeed(&self, route: &Route, _call_id: &CallId) {
            self.events.lock().unwrap().push(format!("ok {}", route.name));
        }

        fn on_fail(&self, route: &Route, _call_id: &CallId, error: &HttpError) {
            self.events
                .lock()
                .unwrap()
                .push(format!("fail {} {}", route.name, error.status()));
        }
    }

    /// Injects an internal `password` argument, populates it from the
    /// query string, and rejects calls that do not present the expected
    /// value.
    struct PasswordPlugin {
        expected: String,
    }

    impl Plugin for PasswordPlugin {
        fn name(&self) -> &str {
            "password"
        }

        fn modify_route(
            &self,
            modifier: &mut RouteModifier<'_>,
            properties: &HashMap<String, String>,
        ) -> Option<PluginRouteState> {
            if properties.get("protected").map(String::as_str) != Some("true") {
                return None;
            }
            let index = modifier.add_arg("password", ArgType::Text, None);
            Some(Box::new(index))
        }

        fn modify_call(
            &self,
            state: Option<&PluginRouteState>,
            ctx: &mut RouteContext,
        ) -> Result<(), HttpError> {
            let index = match state.and_then(|s| s.downcast_ref::<usize>()) {
                Some(index) => *index,
                None => return Ok(()), // route not protected
            };
            // Internal args never bind from the wire; the plugin itself
            // lifts the credential out of the query string.
            if let Some((_, query)) = ctx.uri.split_once('?') {
                for fragment in query.split('&') {
                    if let Some(raw) = fragment.strip_prefix("password=") {
                        ctx.args[index] = Some(ArgValue::Text(percent_decode(raw, true)?));
                    }
                }
            }
            match ctx.args[index].as_ref().and_then(|v| v.as_str()) {
                Some(supplied) if supplied == self.expected => Ok(()),
                _ => Err(HttpError::Unauthorized("bad or missing password".into())),
            }
        }
    }

    fn user_handler(version: u32) -> impl Fn(&mut RouteContext) -> Task<ResponseBody> + Send + Sync {
        move |ctx: &mut RouteContext| {
            let id = ctx.arg_named("id").and_then(|v| v.as_i64()).unwrap_or(-1);
            Task::finished(ResponseBody::Json(json!({ "id": id, "shape": version })))
        }
    }

    fn demo_dispatcher(listener: Arc<RecordingListener>) -> Dispatcher {
        let router = Router::builder()
            .plugin(Arc::new(PasswordPlugin {
                expected: "hunter2".to_string(),
            }))
            .route(
                RouteBuilder::new(Method::Get, "/users/{id}")
                    .arg(Arg::required("id", ArgType::Int64))
                    .handler(user_handler(0)),
            )
            .unwrap()
            .route(
                RouteBuilder::new(Method::Get, "/users/{id}")
                    .version(2)
                    .arg(Arg::required("id", ArgType::Int64))
                    .handler(user_handler(2)),
            )
            .unwrap()
            .route(
                RouteBuilder::new(Method::Get, "/users/me")
                    .handler(|_ctx| Task::finished(ResponseBody::Json(json!({ "me": true })))),
            )
            .unwrap()
            .route(
                RouteBuilder::new(Method::Post, "/items")
                    .arg(Arg::required("name", ArgType::Text))
                    .arg(Arg::optional("qty", ArgType::Int32, Some(ArgValue::Int32(1))))
                    .handler(|ctx: &mut RouteContext| {
                        let name = ctx
                            .arg_named("name")
                            .and_then(|v| v.as_str().map(str::to_string))
                            .unwrap_or_default();
                        let qty = ctx.arg_named("qty").and_then(|v| v.as_i64()).unwrap_or(0);
                        Task::finished(ResponseBody::Json(json!({ "name": name, "qty": qty })))
                    }),
            )
            .unwrap()
            .route(
                RouteBuilder::new(Method::Get, "/auth/ping")
                    .property("protected", "true")
                    .handler(|_ctx| Task::finished(ResponseBody::Json(json!("pong")))),
            )
            .unwrap()
            .finish();
        Dispatcher::new(Arc::new(router), listener)
    }

    fn send(dispatcher: &Dispatcher, request: Request) -> Response {
        let slot: Arc<Mutex<Option<Response>>> = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        let responder: Responder = Box::new(move |response| {
            *sink.lock().unwrap() = Some(response);
        });
        dispatcher.dispatch(request, responder);
        let response = slot.lock().unwrap().take();
        response.expect("dispatcher did not respond synchronously")
    }

    fn body_json(response: &Response) -> JsonValue {
        serde_json::from_slice(&response.body).expect("response body is not JSON")
    }

    // TEST301: Version 0 client gets the v0 route.
    #[test]
    fn test_version_zero_matches_oldest_route() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener.clone());
        let response = send(
            &dispatcher,
            Request::new("GET", "/users/42").with_header("API-VERSION", "0"),
        );
        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response), json!({ "id": 42, "shape": 0 }));
        assert_eq!(
            listener.events(),
            vec!["start GET /users/{id}", "ok GET /users/{id}"]
        );
    }

    // TEST302: Version 3 client gets the newest compatible route (v2).
    #[test]
    fn test_version_three_matches_v2_route() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(
            &dispatcher,
            Request::new("GET", "/users/42").with_header("API-VERSION", "3"),
        );
        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response), json!({ "id": 42, "shape": 2 }));
    }

    // TEST303: Literal route wins over the wildcard at any version.
    #[test]
    fn test_literal_me_beats_wildcard_id() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        for version in ["5", "3"] {
            let response = send(
                &dispatcher,
                Request::new("GET", "/users/me").with_header("API-VERSION", version),
            );
            assert_eq!(response.status, 200);
            assert_eq!(body_json(&response), json!({ "me": true }));
        }
    }

    // TEST304: Accept header takes precedence over API-VERSION.
    #[test]
    fn test_accept_header_wins_version_negotiation() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(
            &dispatcher,
            Request::new("GET", "/users/42")
                .with_header("Accept", "3")
                .with_header("API-VERSION", "0"),
        );
        assert_eq!(body_json(&response)["shape"], 2);

        // A media-type Accept value is treated as absent.
        let response = send(
            &dispatcher,
            Request::new("GET", "/users/42")
                .with_header("Accept", "application/json")
                .with_header("API-VERSION", "3"),
        );
        assert_eq!(body_json(&response)["shape"], 2);
    }

    // TEST305: Optional body field defaults when absent.
    #[test]
    fn test_json_body_default_applies() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(
            &dispatcher,
            Request::new("POST", "/items")
                .with_header("Content-Type", "application/json")
                .with_body(br#"{"name":"x"}"#.to_vec()),
        );
        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response), json!({ "name": "x", "qty": 1 }));
    }

    // TEST306: Missing required body field is a 400 naming the argument.
    #[test]
    fn test_missing_required_field_is_bad_request() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener.clone());
        let response = send(
            &dispatcher,
            Request::new("POST", "/items")
                .with_header("Content-Type", "application/json")
                .with_body(br#"{"qty":3}"#.to_vec()),
        );
        assert_eq!(response.status, 400);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("missing required query parameter \"name\""));
        assert_eq!(
            listener.events(),
            vec!["start POST /items", "fail POST /items 400"]
        );
    }

    // TEST307: Plugin rejects a wrong password with 401.
    #[test]
    fn test_password_plugin_rejects() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener.clone());
        let response = send(
            &dispatcher,
            Request::new("GET", "/auth/ping?password=wrong"),
        );
        assert_eq!(response.status, 401);
        assert_eq!(
            listener.events(),
            vec!["start GET /auth/ping", "fail GET /auth/ping 401"]
        );

        let missing = send(&dispatcher, Request::new("GET", "/auth/ping"));
        assert_eq!(missing.status, 401);
    }

    #[test]
    fn test_password_plugin_accepts() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(
            &dispatcher,
            Request::new("GET", "/auth/ping?password=hunter2"),
        );
        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response), json!("pong"));
    }

    // TEST308: Unmatched path delegates to the default handler, with no
    // listener events.
    #[test]
    fn test_unmatched_path_is_404_without_listener_events() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener.clone());
        let response = send(&dispatcher, Request::new("GET", "/nope"));
        assert_eq!(response.status, 404);
        assert!(listener.events().is_empty());
    }

    // TEST309: Listener balance across mixed outcomes.
    #[test]
    fn test_listener_balance() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener.clone());
        send(&dispatcher, Request::new("GET", "/users/1"));
        send(&dispatcher, Request::new("GET", "/users/not-a-number"));
        send(&dispatcher, Request::new("GET", "/auth/ping?password=wrong"));
        send(&dispatcher, Request::new("GET", "/nope"));

        let events = listener.events();
        let starts = events.iter().filter(|e| e.starts_with("start")).count();
        let terminals = events
            .iter()
            .filter(|e| e.starts_with("ok") || e.starts_with("fail"))
            .count();
        assert_eq!(starts, 3);
        assert_eq!(terminals, 3);
    }

    // TEST310: Bad path coercion fails the call, not the match.
    #[test]
    fn test_path_coercion_error_is_bad_request() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(&dispatcher, Request::new("GET", "/users/not-a-number"));
        assert_eq!(response.status, 400);
        assert!(String::from_utf8(response.body).unwrap().contains("Int64"));
    }

    // TEST311: A handler that suspends completes on a later tick and the
    // response arrives after the task's terminal transition.
    #[tokio::test]
    async fn test_async_handler_completion() {
        let router = Router::builder()
            .route(
                RouteBuilder::new(Method::Get, "/slow").handler(|_ctx| {
                    Task::spawn(async {
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok(ResponseBody::Json(json!({ "slept": true })))
                    })
                }),
            )
            .unwrap()
            .finish();
        let dispatcher = Dispatcher::new(
            Arc::new(router),
            Arc::new(RecordingListener::default()),
        );

        let (tx, rx) = tokio::sync::oneshot::channel::<Response>();
        let responder: Responder = Box::new(move |response| {
            let _ = tx.send(response);
        });
        dispatcher.dispatch(Request::new("GET", "/slow"), responder);

        let response = rx.await.expect("no response delivered");
        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response), json!({ "slept": true }));
    }

    // TEST312: Query parameters co-exist with path captures on a match.
    #[test]
    fn test_query_suffix_does_not_break_path_match() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        let response = send(
            &dispatcher,
            Request::new("GET", "/users/7?ignored=1").with_header("API-VERSION", "9"),
        );
        assert_eq!(body_json(&response), json!({ "id": 7, "shape": 2 }));
    }

    #[test]
    fn test_plugin_lookup_by_name() {
        let listener = Arc::new(RecordingListener::default());
        let dispatcher = demo_dispatcher(listener);
        assert!(dispatcher.router().plugin("password").is_some());
        assert!(dispatcher.router().plugin("nope").is_none());
    }
}
