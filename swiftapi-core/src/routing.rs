// Routing system for HTTP requests

use crate::binder::{BindContext, BindError, bind};
use crate::container::Container;
use crate::handler::{BoxedHandler, Handler};
use crate::issue::issues_response;
use crate::logging::{debug, trace, warn};
use crate::middleware::{Middleware, Next, compose, next_fn};
use crate::path::{PathPattern, join_paths};
use crate::websocket::{WebSocketHub, WebSocketSession};
use crate::{Error, HttpRequest, HttpResponse, ResponseWriter};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;

/// Decides whether a WebSocket handshake from a given origin is accepted
pub type OriginCheck = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// What the router does when a path matches but the method does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodMismatch {
    /// The first route whose path matches decides; a wrong method is a 405.
    #[default]
    FirstPathMatch,
    /// Keep scanning for a later route with the same path and a matching
    /// method; 405 only when there is none.
    CollectPathMatches,
}

/// Handshake settings of a WebSocket route.
#[derive(Clone, Default)]
pub struct UpgradeConfig {
    check_origin: Option<OriginCheck>,
}

impl UpgradeConfig {
    /// Accept every origin
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_origin<F>(mut self, check: F) -> Self
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(check));
        self
    }

    fn origin_allowed(&self, req: &HttpRequest) -> bool {
        self.check_origin.as_ref().is_none_or(|check| check(req))
    }
}

impl std::fmt::Debug for UpgradeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeConfig")
            .field("check_origin", &self.check_origin.is_some())
            .finish()
    }
}

/// Route definition with handler
#[derive(Clone)]
pub struct Route {
    pattern: PathPattern,
    methods: Vec<String>,
    handler: BoxedHandler,
    middleware: Vec<Arc<dyn Middleware>>,
    upgrade: Option<UpgradeConfig>,
}

impl Route {
    /// Add route-level middleware. It runs after global and group middleware.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    pub fn is_websocket(&self) -> bool {
        self.upgrade.is_some()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("handler", &self.handler)
            .field("middleware", &self.middleware.len())
            .field("websocket", &self.is_websocket())
            .finish()
    }
}

/// A group of routes sharing a path prefix, a version segment, middleware and
/// the authorization requirement.
///
/// Prefix and version are applied when a route is added, so set them first.
///
/// ```rust,ignore
/// let mut items = RouterGroup::new().prefix("/api").version("v1");
/// items.get("/items/{id}", &["id"], |Path(id): Path<u32>| async move {
///     format!("item {id}")
/// })?;
/// ```
#[derive(Clone, Default)]
pub struct RouterGroup {
    prefix: String,
    version: String,
    authorization: bool,
    routes: Vec<Route>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl RouterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path prefix for every route added afterwards
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Version segment placed between the prefix and the route path
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Require the application's authorization middleware on every route
    pub fn authorization(mut self, required: bool) -> Self {
        self.authorization = required;
        self
    }

    /// Add group middleware (builder form of [`use_middleware`](Self::use_middleware))
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.prefix = prefix.into();
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    pub fn set_authorization(&mut self, required: bool) -> &mut Self {
        self.authorization = required;
        self
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn requires_authorization(&self) -> bool {
        self.authorization
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn get_middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// Full path of `path` inside this group
    pub fn full_path(&self, path: &str) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.prefix.is_empty() {
            parts.push(self.prefix.as_str());
        }
        if !self.version.is_empty() {
            parts.push(self.version.as_str());
        }
        parts.push(path);
        join_paths(&parts)
    }

    pub fn get<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["GET"], names, handler)
    }

    pub fn post<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["POST"], names, handler)
    }

    pub fn put<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["PUT"], names, handler)
    }

    pub fn patch<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["PATCH"], names, handler)
    }

    pub fn delete<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["DELETE"], names, handler)
    }

    pub fn head<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["HEAD"], names, handler)
    }

    pub fn options<H, Args>(&mut self, path: &str, names: &[&str], handler: H) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.add_route(path, &["OPTIONS"], names, handler)
    }

    /// Register a route for any set of methods. Methods are matched
    /// case-sensitively.
    pub fn add_route<H, Args>(
        &mut self,
        path: &str,
        methods: &[&str],
        names: &[&str],
        handler: H,
    ) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.push_route(path, methods, names, handler, None)
    }

    /// Register a WebSocket route (a `GET` handshake). The handler may take a
    /// `WebSocketSession` parameter; it runs once the connection is upgraded.
    pub fn websocket<H, Args>(
        &mut self,
        path: &str,
        names: &[&str],
        handler: H,
        upgrade: UpgradeConfig,
    ) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.push_route(path, &["GET"], names, handler, Some(upgrade))
    }

    fn push_route<H, Args>(
        &mut self,
        path: &str,
        methods: &[&str],
        names: &[&str],
        handler: H,
        upgrade: Option<UpgradeConfig>,
    ) -> Result<&mut Route, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        if methods.is_empty() {
            return Err(Error::Registration(format!(
                "route '{path}' has no methods"
            )));
        }

        let full_path = self.full_path(path);
        let pattern = PathPattern::compile(&full_path)?;
        let handler = BoxedHandler::new(handler, names)?;

        let dependant = handler.dependant();
        if upgrade.is_none()
            && let Some(descriptor) = &dependant.websocket
        {
            return Err(Error::Registration(format!(
                "parameter '{}' of {} needs a WebSocket session but '{full_path}' is not a WebSocket route",
                descriptor.name,
                handler.key().type_name()
            )));
        }
        for descriptor in &dependant.path {
            if !pattern.param_names().contains(&descriptor.name) {
                warn!(
                    route = %full_path,
                    param = %descriptor.name,
                    "Path parameter has no placeholder in the route pattern"
                );
            }
        }

        debug!(
            route = %full_path,
            methods = ?methods,
            websocket = upgrade.is_some(),
            "Route registered"
        );

        self.routes.push(Route {
            pattern,
            methods: methods.iter().map(|m| m.to_string()).collect(),
            handler,
            middleware: Vec::new(),
            upgrade,
        });
        let index = self.routes.len() - 1;
        Ok(&mut self.routes[index])
    }
}

impl std::fmt::Debug for RouterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterGroup")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .field("authorization", &self.authorization)
            .field("routes", &self.routes)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// A route ready for dispatch, with its middleware chain already combined
struct RouteEntry {
    pattern: PathPattern,
    methods: Vec<String>,
    handler: BoxedHandler,
    chain: Arc<[Arc<dyn Middleware>]>,
    upgrade: Option<UpgradeConfig>,
}

impl RouteEntry {
    fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Router for managing routes and dispatching requests
///
/// Built once from the application's groups; the route table and every
/// middleware chain are fixed afterwards.
pub struct Router {
    routes: Vec<RouteEntry>,
    /// Middleware around routing itself, so it also sees 404 and 405
    outer: Vec<Arc<dyn Middleware>>,
    policy: MethodMismatch,
    container: Container,
    hub: Arc<WebSocketHub>,
}

impl Router {
    /// Combine every route's middleware in order: global, group, route, then
    /// the authorization middleware when the group requires it.
    pub fn new(
        groups: Vec<RouterGroup>,
        global: &[Arc<dyn Middleware>],
        authorization: Option<Arc<dyn Middleware>>,
        container: Container,
        hub: Arc<WebSocketHub>,
    ) -> Self {
        let mut routes = Vec::new();
        for group in groups {
            if group.authorization && authorization.is_none() {
                warn!(
                    prefix = %group.prefix,
                    "Group requires authorization but no authorization middleware is configured"
                );
            }
            for route in group.routes {
                let mut chain: Vec<Arc<dyn Middleware>> = Vec::with_capacity(
                    global.len() + group.middleware.len() + route.middleware.len() + 1,
                );
                chain.extend(global.iter().cloned());
                chain.extend(group.middleware.iter().cloned());
                chain.extend(route.middleware);
                if group.authorization
                    && let Some(auth) = &authorization
                {
                    chain.push(auth.clone());
                }

                routes.push(RouteEntry {
                    pattern: route.pattern,
                    methods: route.methods,
                    handler: route.handler,
                    chain: chain.into(),
                    upgrade: route.upgrade,
                });
            }
        }

        debug!(routes = routes.len(), "Router built");

        Self {
            routes,
            outer: Vec::new(),
            policy: MethodMismatch::default(),
            container,
            hub,
        }
    }

    pub fn with_policy(mut self, policy: MethodMismatch) -> Self {
        self.policy = policy;
        self
    }

    /// Middleware that wraps routing itself
    pub fn with_outer_middleware(mut self, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        self.outer = middleware;
        self
    }

    pub fn policy(&self) -> MethodMismatch {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn hub(&self) -> &Arc<WebSocketHub> {
        &self.hub
    }

    /// Handlers of every route, in registration order
    pub fn handlers(&self) -> impl Iterator<Item = &BoxedHandler> {
        self.routes.iter().map(|entry| &entry.handler)
    }

    /// Find the route for `request` and run it through its chain.
    pub async fn route(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, Error> {
        self.route_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`route`](Self::route), with a token the caller cancels when the
    /// client goes away.
    pub async fn route_with_cancel(
        self: &Arc<Self>,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, Error> {
        if self.outer.is_empty() {
            return self.dispatch(request, cancel).await;
        }

        let router = self.clone();
        let terminal = next_fn(move |req| async move { router.dispatch(req, cancel).await });
        compose(&self.outer, terminal)(request).await
    }

    /// Route and turn any error into its response
    ///
    /// ```
    /// use swiftapi_core::{Application, HttpRequest, Path};
    ///
    /// # tokio_test::block_on(async {
    /// let mut app = Application::new();
    /// app.add_router(|r| {
    ///     r.get("/hello/{name}", &["name"], |Path(name): Path<String>| async move {
    ///         format!("Hello, {name}")
    ///     })?;
    ///     Ok(())
    /// })
    /// .unwrap();
    /// let router = app.build().unwrap();
    ///
    /// let response = router.handle(HttpRequest::new("GET", "/hello/ada")).await;
    /// assert_eq!(response.body_str(), "Hello, ada");
    /// # });
    /// ```
    pub async fn handle(self: &Arc<Self>, request: HttpRequest) -> HttpResponse {
        use crate::response::IntoResponse;
        self.route(request).await.into_response()
    }

    async fn dispatch(
        self: &Arc<Self>,
        mut request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, Error> {
        let mut path_matched = false;

        for (index, entry) in self.routes.iter().enumerate() {
            let Some(params) = entry.pattern.matches(&request.path) else {
                continue;
            };

            if !entry.allows(&request.method) {
                match self.policy {
                    MethodMismatch::FirstPathMatch => {
                        return Err(Error::MethodNotAllowed(format!(
                            "{} {}",
                            request.method, request.path
                        )));
                    }
                    MethodMismatch::CollectPathMatches => {
                        path_matched = true;
                        continue;
                    }
                }
            }

            trace!(route = %entry.pattern.as_str(), "Route matched");
            request.path_params = params;

            let terminal = match entry.upgrade {
                Some(_) => self.websocket_terminal(index, cancel),
                None => self.http_terminal(index, cancel),
            };
            return compose(&entry.chain, terminal)(request).await;
        }

        if path_matched {
            Err(Error::MethodNotAllowed(format!(
                "{} {}",
                request.method, request.path
            )))
        } else {
            Err(Error::RouteNotFound(format!(
                "{} {}",
                request.method, request.path
            )))
        }
    }

    fn http_terminal(self: &Arc<Self>, index: usize, cancel: CancellationToken) -> Next {
        let router = self.clone();
        next_fn(move |req| async move {
            let handler = &router.routes[index].handler;
            let writer = ResponseWriter::new();
            let ctx = BindContext {
                container: &router.container,
                cancel: &cancel,
                response: &writer,
                websocket: None,
            };

            let args = match bind(handler.dependant(), &req, ctx).await {
                Ok(args) => args,
                Err(BindError::Issues(issues)) => {
                    warn!(
                        method = %req.method,
                        path = %req.path,
                        issues = issues.len(),
                        "Request parameters rejected"
                    );
                    return Ok(issues_response(&issues));
                }
                Err(BindError::Fatal(e)) => return Err(e),
            };

            let mut response = handler.call(args)?.await;
            writer.apply(&mut response);
            Ok(response)
        })
    }

    fn websocket_terminal(self: &Arc<Self>, index: usize, cancel: CancellationToken) -> Next {
        let router = self.clone();
        next_fn(move |req| async move {
            let entry = &router.routes[index];
            let upgrade = entry.upgrade.clone().unwrap_or_default();

            let key = handshake_key(&req)?;
            if !upgrade.origin_allowed(&req) {
                warn!(
                    path = %req.path,
                    origin = req.header("origin").unwrap_or_default(),
                    "WebSocket origin rejected"
                );
                return Err(Error::Forbidden("origin not allowed".to_string()));
            }

            let (session, outbound) = WebSocketSession::new(router.hub.clone());
            let writer = ResponseWriter::new();
            let ctx = BindContext {
                container: &router.container,
                cancel: &cancel,
                response: &writer,
                websocket: Some(&session),
            };

            let args = match bind(entry.handler.dependant(), &req, ctx).await {
                Ok(args) => args,
                Err(BindError::Issues(issues)) => {
                    warn!(path = %req.path, issues = issues.len(), "WebSocket parameters rejected");
                    return Ok(issues_response(&issues));
                }
                Err(BindError::Fatal(e)) => return Err(e),
            };

            let on_upgrade = req.take_upgrade().ok_or_else(|| {
                Error::WebSocket("connection does not support upgrades".to_string())
            })?;
            let handler_future = entry.handler.call(args)?;

            tokio::spawn(async move {
                let upgraded = match on_upgrade.await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        warn!(error = %e, "WebSocket upgrade failed");
                        return;
                    }
                };
                let stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;

                session.connect();
                let response = handler_future.await;
                trace!(client_id = %session.id(), status = response.status, "WebSocket handler returned");
                session.serve(stream, outbound).await;
            });

            let mut headers = HashMap::new();
            headers.insert("Upgrade".to_string(), "websocket".to_string());
            headers.insert("Connection".to_string(), "Upgrade".to_string());
            headers.insert("Sec-WebSocket-Accept".to_string(), derive_accept_key(key.as_bytes()));
            let mut response = HttpResponse::with_status_and_headers(101, headers);
            writer.apply(&mut response);
            response.status = 101;
            Ok(response)
        })
    }
}

/// Validate the upgrade request and return its `Sec-WebSocket-Key`.
fn handshake_key(req: &HttpRequest) -> Result<String, Error> {
    if !req.is_websocket_upgrade() {
        return Err(Error::UpgradeRequired(
            "expected a WebSocket upgrade request".to_string(),
        ));
    }
    if req.method != "GET" {
        return Err(Error::MethodNotAllowed(format!(
            "WebSocket handshake must use GET, not {}",
            req.method
        )));
    }
    if req.header("sec-websocket-version") != Some("13") {
        return Err(Error::BadRequest(
            "unsupported Sec-WebSocket-Version".to_string(),
        ));
    }
    req.header("sec-websocket-key")
        .filter(|key| !key.trim().is_empty())
        .map(|key| key.trim().to_string())
        .ok_or_else(|| Error::BadRequest("missing Sec-WebSocket-Key".to_string()))
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("policy", &self.policy)
            .finish()
    }
}
