// Application bootstrapper and HTTP server

use crate::config::AppConfig;
use crate::container::Container;
use crate::http::UpgradeSlot;
use crate::issue::{Issue, IssueKind, issues_response};
use crate::logging::{debug, error, info, trace, warn};
use crate::middleware::{Middleware, RequestLogger};
use crate::response::IntoResponse;
use crate::routing::{Router, RouterGroup};
use crate::tasks::BackgroundTasks;
use crate::websocket::WebSocketHub;
use crate::{Error, HttpRequest, HttpResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// The main application struct
///
/// Collects route groups, middleware and services, then builds an immutable
/// [`Router`] and serves it over HTTP/1.1.
pub struct Application {
    config: AppConfig,
    groups: Vec<RouterGroup>,
    middleware: Vec<Arc<dyn Middleware>>,
    authorization: Option<Arc<dyn Middleware>>,
    container: Container,
    hub: Arc<WebSocketHub>,
    tasks: Arc<BackgroundTasks>,
}

impl Application {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let container = Container::new();
        let tasks = Arc::new(BackgroundTasks::new());
        container.provide_arc(tasks.clone());

        Self {
            config,
            groups: Vec::new(),
            middleware: Vec::new(),
            authorization: None,
            container,
            hub: Arc::new(WebSocketHub::new()),
            tasks,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Define a route group in place.
    ///
    /// ```rust,ignore
    /// app.add_router(|r| {
    ///     r.set_prefix("/api").set_version("v1");
    ///     r.get("/ping", &[], || async { "pong" })?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn add_router<F>(&mut self, define: F) -> Result<&mut Self, Error>
    where
        F: FnOnce(&mut RouterGroup) -> Result<(), Error>,
    {
        let mut group = RouterGroup::new();
        define(&mut group)?;
        self.groups.push(group);
        Ok(self)
    }

    /// Add an already built route group
    pub fn include(&mut self, group: RouterGroup) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Global middleware, run before group and route middleware
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Middleware appended to the chain of every group that requires
    /// authorization
    pub fn set_authorization(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.authorization = Some(middleware);
        self
    }

    pub fn provide<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.container.provide(value);
        self
    }

    pub fn provide_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        self.container.provide_factory(factory);
        self
    }

    /// Get a reference to the DI container
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn hub(&self) -> &Arc<WebSocketHub> {
        &self.hub
    }

    /// Background task manager, also injectable as `Service<BackgroundTasks>`
    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }

    /// Check every route and freeze the route table.
    ///
    /// Fails if a handler asks for a service nobody provided.
    pub fn build(self) -> Result<Arc<Router>, Error> {
        for group in &self.groups {
            for route in group.routes() {
                for descriptor in &route.handler().dependant().service {
                    if !self.container.contains_type(descriptor.value_type.type_id) {
                        return Err(Error::DependencyInjection(format!(
                            "no provider for {} (parameter '{}' of route '{}')",
                            descriptor.value_type.type_name,
                            descriptor.name,
                            route.pattern().as_str()
                        )));
                    }
                }
            }
        }

        let mut outer: Vec<Arc<dyn Middleware>> = Vec::new();
        if self.config.request_logging {
            outer.push(Arc::new(RequestLogger::new()));
        }

        let router = Router::new(
            self.groups,
            &self.middleware,
            self.authorization,
            self.container,
            self.hub,
        )
        .with_policy(self.config.method_mismatch)
        .with_outer_middleware(outer);

        info!(
            routes = router.len(),
            policy = ?router.policy(),
            "Application built"
        );
        Ok(Arc::new(router))
    }

    /// Bind the configured address and serve until the process ends
    pub async fn listen(self) -> Result<(), Error> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` completes. Connections already
    /// accepted keep running; background tasks are drained before returning.
    pub async fn serve<S>(self, listener: TcpListener, shutdown: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let max_body_size = self.config.max_body_size;
        let tasks = self.tasks.clone();
        let router = self.build()?;

        info!(address = %listener.local_addr()?, "Server listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    tasks.close().await;
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let router = router.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let router = router.clone();
                    async move { handle_request(req, router, remote, max_body_size).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!(remote = %remote, error = %err, "Error serving connection");
                }
            });
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a request body could not be collected
#[derive(Debug)]
pub(crate) enum BodyError {
    TooLarge,
    Read(String),
}

/// Collect a body, refusing more than `limit` bytes.
pub(crate) async fn collect_body<B>(body: B, limit: usize) -> Result<Bytes, BodyError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
        Err(e) => Err(BodyError::Read(e.to_string())),
    }
}

fn body_error_response(err: BodyError, limit: usize) -> HttpResponse {
    match err {
        BodyError::TooLarge => {
            Error::PayloadTooLarge(format!("request body exceeds {limit} bytes")).into_response()
        }
        BodyError::Read(reason) => issues_response(&[Issue::new(
            &["body"],
            format!("failed to read request body: {reason}"),
            IssueKind::BodyRead,
        )]),
    }
}

/// Handle an incoming HTTP request
async fn handle_request(
    mut req: Request<IncomingBody>,
    router: Arc<Router>,
    remote: SocketAddr,
    max_body_size: usize,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let mut request = HttpRequest::new(req.method().as_str(), target).with_remote_addr(remote);

    for (name, value) in req.headers() {
        match value.to_str() {
            Ok(value) => request.insert_header(name.as_str(), value),
            Err(_) => trace!(header = %name, "Skipping non-UTF-8 header value"),
        }
    }

    if request.is_websocket_upgrade() {
        request.set_upgrade(UpgradeSlot::new(hyper::upgrade::on(&mut req)));
    }

    let declared_length = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > max_body_size) {
        warn!(remote = %remote, length = ?declared_length, "Request body too large");
        return Ok(into_hyper_response(body_error_response(
            BodyError::TooLarge,
            max_body_size,
        )));
    }

    match collect_body(req.into_body(), max_body_size).await {
        Ok(body) => request.body = body,
        Err(e) => {
            warn!(remote = %remote, error = ?e, "Failed to read request body");
            return Ok(into_hyper_response(body_error_response(e, max_body_size)));
        }
    }

    // Dropping this future (client gone) cancels any in-flight binding
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let response = router
        .route_with_cancel(request, cancel)
        .await
        .into_response();
    Ok(into_hyper_response(response))
}

/// Convert our HttpResponse to a hyper Response
pub(crate) fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for cookie in &response.cookies {
        builder = builder.header(hyper::header::SET_COOKIE, cookie.as_str());
    }

    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "Handler produced an invalid response");
            let mut fallback = Response::new(Full::new(Bytes::from_static(
                b"{\"error\":\"Internal Server Error\",\"status\":500}",
            )));
            *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
