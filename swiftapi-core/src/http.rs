// HTTP request and response types

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request-scoped value store.
///
/// Middleware writes values here (for example decoded token claims) and
/// `Context<T>` handler parameters read them back by name.
#[derive(Clone, Default)]
pub struct RequestScope {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Typed lookup. `None` if the key is absent or holds another type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Untyped lookup.
    pub fn get_raw(&self, key: &str) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Pending protocol upgrade for the underlying connection.
#[derive(Clone, Default)]
pub(crate) struct UpgradeSlot(Arc<Mutex<Option<hyper::upgrade::OnUpgrade>>>);

impl UpgradeSlot {
    pub(crate) fn new(on_upgrade: hyper::upgrade::OnUpgrade) -> Self {
        Self(Arc::new(Mutex::new(Some(on_upgrade))))
    }

    pub(crate) fn take(&self) -> Option<hyper::upgrade::OnUpgrade> {
        self.0.lock().take()
    }
}

impl fmt::Debug for UpgradeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.lock().is_some() {
            "UpgradeSlot(pending)"
        } else {
            "UpgradeSlot(empty)"
        })
    }
}

/// HTTP request wrapper
///
/// Header names are stored lowercased; repeated headers are joined with
/// `", "` (cookies with `"; "`).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
    scope: RequestScope,
    upgrade: Option<UpgradeSlot>,
}

impl HttpRequest {
    /// Create a request from a method and a request target (`/path?query`).
    pub fn new(method: impl Into<String>, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };

        let query_params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Self {
            method: method.into(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query_string: query,
            headers: HashMap::new(),
            body: Bytes::new(),
            path_params: HashMap::new(),
            query_params,
            remote_addr: None,
            scope: RequestScope::new(),
            upgrade: None,
        }
    }

    /// Add a header, merging with an existing header of the same name.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        let separator = if name == "cookie" { "; " } else { ", " };
        self.headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(separator);
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and the matching content type.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, crate::Error> {
        let body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Content type without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str().to_string())
    }

    /// Cookies sent with the request. The first cookie of a given name wins.
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        if let Some(raw) = self.header("cookie") {
            for pair in raw.split(';') {
                let Some((name, value)) = pair.trim().split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                cookies
                    .entry(name.to_string())
                    .or_insert_with(|| value.trim().trim_matches('"').to_string());
            }
        }
        cookies
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Store a request-scoped value
    pub fn set_context<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.scope.insert(key, value);
    }

    /// Read a request-scoped value
    pub fn context<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.scope.get(key)
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut RequestScope {
        &mut self.scope
    }

    /// Whether the client asked for a WebSocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection = self
            .header("connection")
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false);
        upgrade && connection
    }

    pub(crate) fn set_upgrade(&mut self, slot: UpgradeSlot) {
        self.upgrade = Some(slot);
    }

    pub(crate) fn take_upgrade(&self) -> Option<hyper::upgrade::OnUpgrade> {
        self.upgrade.as_ref().and_then(UpgradeSlot::take)
    }
}

/// Parse a query string into a map. Values are percent-decoded and the first
/// occurrence of a key wins.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
    let mut params = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        params.entry(key).or_insert(value);
    }
    params
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// `Set-Cookie` values, written as separate headers.
    pub cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn with_status_and_headers(status: u16, headers: HashMap<String, String>) -> Self {
        Self {
            headers,
            ..Self::new(status)
        }
    }

    /// 200 response with a JSON body
    pub fn json<T: Serialize>(value: &T) -> Result<Self, crate::Error> {
        Self::ok().with_json(value)
    }

    /// 200 response with a plain-text body
    pub fn text(text: impl Into<String>) -> Self {
        Self::ok()
            .with_header(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )
            .with_body(text.into().into_bytes())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("")
    }
}

#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
}

/// Handle a handler can take as a parameter to adjust the response that is
/// eventually written: status, extra headers and cookies.
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    parts: Arc<Mutex<ResponseParts>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: u16) {
        self.parts.lock().status = Some(status);
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.lock().headers.push((name.into(), value.into()));
    }

    /// Queue a `Set-Cookie` value, e.g. `session=abc; Path=/; HttpOnly`.
    pub fn set_cookie(&self, cookie: impl Into<String>) {
        self.parts.lock().cookies.push(cookie.into());
    }

    /// Merge everything recorded so far into `response`.
    pub(crate) fn apply(&self, response: &mut HttpResponse) {
        let mut parts = self.parts.lock();
        if let Some(status) = parts.status.take() {
            response.status = status;
        }
        for (name, value) in parts.headers.drain(..) {
            response.headers.insert(name, value);
        }
        response.cookies.append(&mut parts.cookies);
    }
}
