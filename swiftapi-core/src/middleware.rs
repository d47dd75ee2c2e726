// Middleware system for request/response processing

use crate::logging::{error, info, trace, warn};
use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Future produced by one link of the middleware chain
pub type ChainFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for the next handler in the middleware chain
pub type Next = Box<dyn FnOnce(HttpRequest) -> ChainFuture + Send>;

/// Build a [`Next`] continuation from an async closure.
pub fn next_fn<F, Fut>(f: F) -> Next
where
    F: FnOnce(HttpRequest) -> Fut + Send + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Box::new(move |req: HttpRequest| -> ChainFuture { Box::pin(f(req)) })
}

/// Middleware trait for processing requests before they reach the handler.
///
/// Returning without calling `next` ends the request with the returned
/// response.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// Middleware built from a closure, see [`from_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

/// Adapt an async closure into a middleware.
///
/// ```rust,ignore
/// let timing = from_fn(|req, next| async move {
///     let mut response = next(req).await?;
///     response.headers.insert("X-Handled".into(), "1".into());
///     Ok(response)
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        (self.f)(req, next).await
    }
}

/// Wrap `terminal` in `middlewares`, folding from the right so the first
/// middleware in the slice runs first.
pub fn compose(middlewares: &[Arc<dyn Middleware>], terminal: Next) -> Next {
    middlewares
        .iter()
        .enumerate()
        .rev()
        .fold(terminal, |next, (index, middleware)| {
            let middleware = middleware.clone();
            next_fn(move |req| async move {
                trace!(middleware_index = index, "Executing middleware");
                middleware.handle(req, next).await
            })
        })
}

// ========== Built-in Middleware ==========

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// The request origin is echoed back when it is in the allow-list (or the
/// list contains `*`). Preflight `OPTIONS` requests are answered with 204.
/// Requests with a method outside the allow-list get 405.
pub struct CorsMiddleware {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u32>,
}

impl CorsMiddleware {
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["Content-Type".to_string()],
            allow_credentials: false,
            max_age: None,
        }
    }

    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        !origin.is_empty()
            && self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
    }

    fn method_allowed(&self, method: &str) -> bool {
        method == "OPTIONS"
            || self
                .allowed_methods
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(method))
    }

    fn origin_headers(&self, origin: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if self.origin_allowed(origin) {
            headers.insert(
                "Access-Control-Allow-Origin".to_string(),
                origin.to_string(),
            );
            headers.insert("Vary".to_string(), "Origin".to_string());
            if self.allow_credentials {
                headers.insert(
                    "Access-Control-Allow-Credentials".to_string(),
                    "true".to_string(),
                );
            }
        }
        headers
    }
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let origin = req.header("origin").unwrap_or_default().to_string();
        let mut headers = self.origin_headers(&origin);

        // Handle preflight requests
        if req.method == "OPTIONS" {
            headers.insert(
                "Access-Control-Allow-Methods".to_string(),
                self.allowed_methods.join(", "),
            );
            headers.insert(
                "Access-Control-Allow-Headers".to_string(),
                self.allowed_headers.join(", "),
            );
            if let Some(max_age) = self.max_age {
                headers.insert("Access-Control-Max-Age".to_string(), max_age.to_string());
            }
            return Ok(HttpResponse::with_status_and_headers(204, headers));
        }

        if !self.method_allowed(&req.method) {
            return Err(Error::MethodNotAllowed(format!(
                "{} is not allowed by the CORS policy",
                req.method
            )));
        }

        let mut response = next(req).await?;
        response.headers.extend(headers);
        Ok(response)
    }
}

/// Request logging and panic recovery.
///
/// Assigns every request an id (the client's `X-Request-Id`, or a new UUID),
/// stores it in the request scope under `request_id`, logs one line per
/// request, and turns a panic anywhere further down the chain into a 500 with
/// body `{"error": "Internal Server Error", "request_id": ...}`.
#[derive(Debug, Default, Clone)]
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, mut req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let request_id = req
            .header("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        req.set_context("request_id", request_id.clone());

        let method = req.method.clone();
        let path = req.path.clone();
        let remote = req.remote_addr.map(|a| a.to_string()).unwrap_or_default();
        let user_agent = req.header("user-agent").unwrap_or_default().to_string();
        let request_size = req.body.len();

        if req
            .query_string
            .as_deref()
            .is_some_and(|q| q.to_ascii_lowercase().contains("<script>"))
        {
            warn!(request_id = %request_id, "Possible XSS attempt detected");
        }

        let outcome = AssertUnwindSafe(async move { next(req).await })
            .catch_unwind()
            .await;

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let status = e.status_code().as_u16();
                if status >= 500 {
                    error!(request_id = %request_id, method = %method, path = %path, status, error = %e, "Request failed");
                } else {
                    warn!(request_id = %request_id, method = %method, path = %path, status, error = %e, "Request rejected");
                }
                return Err(e);
            }
            Err(panic) => {
                error!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    panic = %panic_message(panic.as_ref()),
                    "Recovered from panic"
                );
                HttpResponse::internal_server_error().with_json(&serde_json::json!({
                    "error": "Internal Server Error",
                    "request_id": request_id,
                }))?
            }
        };

        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status,
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            remote = %remote,
            user_agent = %user_agent,
            request_size,
            response_size = response.body.len(),
            "HTTP request"
        );

        response
            .headers
            .insert("X-Request-Id".to_string(), request_id);
        Ok(response)
    }
}
