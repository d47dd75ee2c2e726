//! Request binding
//!
//! Turns a request into the positional argument list of a handler. Each
//! location group is extracted on its own and every problem is recorded as an
//! [`Issue`]; binding only stops early when the body itself cannot be read or
//! parsed. Service resolution failures are not issues: they are returned as
//! fatal errors and answered with a 500.

use crate::body::{FormData, RequestBody};
use crate::container::Container;
use crate::dependant::{Dependant, ParameterDescriptor, Tag};
use crate::extract::{BoundValue, Shape};
use crate::http::{HttpRequest, ResponseWriter};
use crate::issue::{Issue, IssueKind};
use crate::logging::{error, trace};
use crate::websocket::WebSocketSession;
use crate::Error;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Why a request could not be bound.
#[derive(Debug)]
pub enum BindError {
    /// Validation failures, answered with 422
    Issues(Vec<Issue>),
    /// Anything else; the request fails with the error's status
    Fatal(Error),
}

impl From<Error> for BindError {
    fn from(e: Error) -> Self {
        BindError::Fatal(e)
    }
}

/// Per-request inputs the binder needs besides the request.
pub struct BindContext<'a> {
    pub container: &'a Container,
    pub cancel: &'a CancellationToken,
    pub response: &'a ResponseWriter,
    pub websocket: Option<&'a WebSocketSession>,
}

/// Normalize a header name to lower camel case: `X-Request-ID` becomes
/// `xRequestId`. Tokens are split on `-`, `/`, `.`, `_` and spaces.
pub fn format_header_key(key: &str) -> String {
    let mut parts = key
        .split(['-', '/', '.', '_', ' '])
        .filter(|part| !part.is_empty());

    let Some(first) = parts.next() else {
        return String::new();
    };

    let mut result = first.to_lowercase();
    for part in parts {
        let lower = part.to_lowercase();
        let mut chars = lower.chars();
        if let Some(c) = chars.next() {
            result.extend(c.to_uppercase());
            result.push_str(chars.as_str());
        }
    }
    result
}

/// Key a header parameter is looked up by. Names already written in camel
/// case are used as given; names with separators are normalized.
fn header_lookup_key(name: &str) -> String {
    if name.contains(['-', '/', '.', '_', ' ']) {
        format_header_key(name)
    } else {
        name.to_string()
    }
}

fn header_map(req: &HttpRequest) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::with_capacity(req.headers.len());
    for (name, value) in &req.headers {
        headers
            .entry(format_header_key(name))
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    headers
}

/// Coerce one raw string (or its absence) for a scalar descriptor.
fn bind_scalar(
    descriptor: &ParameterDescriptor,
    location: &str,
    raw: Option<&str>,
) -> Result<BoundValue, Issue> {
    let Shape::Scalar {
        expected,
        decode,
        absent,
    } = descriptor.value_type.shape
    else {
        return Err(Issue::new(
            &[location, descriptor.name.as_str()],
            format!("{} cannot be read from {location}", descriptor.value_type.type_name),
            IssueKind::Unsupported,
        ));
    };

    match raw {
        Some(raw) => decode(raw)
            .map_err(|reason| Issue::type_error(location, &descriptor.name, expected, &reason)),
        None => absent().ok_or_else(|| Issue::missing(location, &descriptor.name)),
    }
}

struct Slots {
    values: Vec<Option<BoundValue>>,
    issues: Vec<Issue>,
}

impl Slots {
    fn record(&mut self, index: usize, result: Result<BoundValue, Issue>) {
        match result {
            Ok(value) => self.values[index] = Some(value),
            Err(issue) => self.issues.push(issue),
        }
    }
}

fn bind_form(descriptor: &ParameterDescriptor, body: &RequestBody) -> Result<BoundValue, Issue> {
    let loc = ["form", descriptor.name.as_str()];
    let form: &FormData = match body {
        RequestBody::Form(form) => form,
        RequestBody::Absent => {
            return Err(Issue::new(&loc, "form data is required", IssueKind::Missing));
        }
        RequestBody::Raw(_) => {
            return Err(Issue::new(
                &loc,
                "request body is not a form",
                IssueKind::UnsupportedType,
            ));
        }
    };

    match descriptor.value_type.shape {
        Shape::Upload { optional } => match (form.file(&descriptor.name), optional) {
            (Some(file), false) => Ok(Box::new(file.clone()) as BoundValue),
            (file, true) => Ok(Box::new(file.cloned()) as BoundValue),
            (None, false) => Err(Issue::new(
                &loc,
                format!("file '{}' is required", descriptor.name),
                IssueKind::Missing,
            )),
        },
        _ => bind_scalar(descriptor, "form", form.value(&descriptor.name)),
    }
}

fn bind_body(descriptor: &ParameterDescriptor, body: &RequestBody) -> Result<BoundValue, Issue> {
    let loc = ["body", descriptor.name.as_str()];
    let bytes = match body {
        RequestBody::Absent => {
            return Err(Issue::new(&loc, "request body is required", IssueKind::Missing));
        }
        RequestBody::Form(_) => {
            return Err(Issue::new(
                &loc,
                "invalid body type: form data",
                IssueKind::InvalidType,
            ));
        }
        RequestBody::Raw(bytes) => bytes,
    };

    if bytes.is_empty() {
        return Err(Issue::new(&loc, "body cannot be empty", IssueKind::Empty));
    }

    match descriptor.value_type.shape {
        Shape::Bytes => Ok(Box::new(bytes.to_vec()) as BoundValue),
        Shape::Text => String::from_utf8(bytes.to_vec())
            .map(|text| Box::new(text) as BoundValue)
            .map_err(|e| Issue::new(&loc, format!("body is not valid UTF-8: {e}"), IssueKind::TypeError)),
        Shape::Document(decode) => decode(bytes, &loc),
        other => Err(Issue::new(
            &loc,
            format!("unsupported body type: {}", other.name()),
            IssueKind::Unsupported,
        )),
    }
}

fn bind_context(descriptor: &ParameterDescriptor, req: &HttpRequest) -> Result<BoundValue, Issue> {
    let loc = ["context", descriptor.name.as_str()];
    let Some(value) = req.scope().get_raw(&descriptor.name) else {
        return Err(Issue::new(
            &loc,
            format!("missing required context parameter: {}", descriptor.name),
            IssueKind::Missing,
        ));
    };
    let Shape::Context(read) = descriptor.value_type.shape else {
        return Err(Issue::new(&loc, "not a context parameter", IssueKind::Unsupported));
    };
    read(value).ok_or_else(|| {
        Issue::new(
            &loc,
            format!(
                "context value '{}' is not a {}",
                descriptor.name, descriptor.value_type.type_name
            ),
            IssueKind::TypeError,
        )
    })
}

/// Bind every parameter of `dependant` from `req`.
///
/// On success the returned vector has one value per handler parameter, in
/// declaration order.
pub async fn bind(
    dependant: &Dependant,
    req: &HttpRequest,
    ctx: BindContext<'_>,
) -> Result<Vec<BoundValue>, BindError> {
    let mut slots = Slots {
        values: (0..dependant.arity).map(|_| None).collect(),
        issues: Vec::new(),
    };

    if dependant.needs_body() {
        if ctx.cancel.is_cancelled() {
            return Err(BindError::Fatal(Error::Cancelled));
        }
        let body = match RequestBody::from_request(req).await {
            Ok(body) => body,
            Err(issue) => return Err(BindError::Issues(vec![issue])),
        };

        if let Some(descriptor) = &dependant.body {
            slots.record(descriptor.index, bind_body(descriptor, &body));
        }
        for descriptor in &dependant.form {
            slots.record(descriptor.index, bind_form(descriptor, &body));
        }
    }

    for descriptor in &dependant.path {
        let raw = req.path_params.get(&descriptor.name).map(String::as_str);
        slots.record(descriptor.index, bind_scalar(descriptor, Tag::Path.location(), raw));
    }

    for descriptor in &dependant.query {
        let raw = req.query_params.get(&descriptor.name).map(String::as_str);
        slots.record(descriptor.index, bind_scalar(descriptor, Tag::Query.location(), raw));
    }

    if !dependant.header.is_empty() {
        let headers = header_map(req);
        for descriptor in &dependant.header {
            let raw = headers
                .get(&header_lookup_key(&descriptor.name))
                .map(String::as_str);
            slots.record(descriptor.index, bind_scalar(descriptor, Tag::Header.location(), raw));
        }
    }

    if !dependant.cookie.is_empty() {
        let cookies = req.cookies();
        for descriptor in &dependant.cookie {
            let raw = cookies.get(&descriptor.name).map(String::as_str);
            slots.record(descriptor.index, bind_scalar(descriptor, Tag::Cookie.location(), raw));
        }
    }

    for descriptor in &dependant.context {
        slots.record(descriptor.index, bind_context(descriptor, req));
    }

    if !slots.issues.is_empty() {
        trace!(issues = slots.issues.len(), "Binding produced issues");
        return Err(BindError::Issues(slots.issues));
    }

    if !dependant.service.is_empty() && ctx.cancel.is_cancelled() {
        return Err(BindError::Fatal(Error::Cancelled));
    }
    for descriptor in &dependant.service {
        let Shape::Service(resolve) = descriptor.value_type.shape else {
            continue;
        };
        match resolve(ctx.container) {
            Ok(value) => slots.values[descriptor.index] = Some(value),
            Err(e) => {
                error!(
                    param = %descriptor.name,
                    service = descriptor.value_type.type_name,
                    error = %e,
                    "Failed to resolve service dependency"
                );
                return Err(BindError::Fatal(Error::DependencyInjection(format!(
                    "cannot resolve {} for parameter '{}': {e}",
                    descriptor.value_type.type_name, descriptor.name
                ))));
            }
        }
    }

    if let Some(descriptor) = &dependant.request {
        slots.values[descriptor.index] = Some(Box::new(req.clone()) as BoundValue);
    }
    if let Some(descriptor) = &dependant.response {
        slots.values[descriptor.index] = Some(Box::new(ctx.response.clone()) as BoundValue);
    }
    if let Some(descriptor) = &dependant.websocket {
        let session = ctx.websocket.ok_or_else(|| {
            Error::Internal(format!(
                "parameter '{}' needs a WebSocket session but the request was not upgraded",
                descriptor.name
            ))
        })?;
        slots.values[descriptor.index] = Some(Box::new(session.clone()) as BoundValue);
    }

    slots
        .values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            value.ok_or_else(|| {
                BindError::Fatal(Error::Internal(format!("parameter {index} was not bound")))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_header_key() {
        assert_eq!(format_header_key("User-Agent"), "userAgent");
        assert_eq!(format_header_key("X-Request-ID"), "xRequestId");
        assert_eq!(format_header_key("content_type"), "contentType");
        assert_eq!(format_header_key("x.custom/thing name"), "xCustomThingName");
        assert_eq!(format_header_key("--"), "");
        assert_eq!(format_header_key("ACCEPT"), "accept");
    }

    #[test]
    fn test_header_lookup_key() {
        assert_eq!(header_lookup_key("userAgent"), "userAgent");
        assert_eq!(header_lookup_key("user_agent"), "userAgent");
        assert_eq!(header_lookup_key("User-Agent"), "userAgent");
    }

    #[test]
    fn test_header_map_merges_normalized_names() {
        let req = HttpRequest::new("GET", "/")
            .with_header("X-Trace-Id", "a")
            .with_header("x_trace_id", "b");
        let headers = header_map(&req);
        let value = headers.get("xTraceId").unwrap();
        assert!(value == "a, b" || value == "b, a");
    }
}
