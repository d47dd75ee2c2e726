//! Typed handler parameters
//!
//! Each handler parameter is a wrapper that names where its value comes
//! from:
//!
//! | Wrapper       | Source                                        |
//! |---------------|-----------------------------------------------|
//! | `Path<T>`     | route placeholder                             |
//! | `Query<T>`    | query string                                  |
//! | `Header<T>`   | request header (lower-camel-case name)        |
//! | `Cookie<T>`   | request cookie                                |
//! | `Body<T>`     | request body (raw bytes, text or JSON)        |
//! | `Form<T>`     | multipart or urlencoded form field / upload   |
//! | `Service<T>`  | dependency container                          |
//! | `Context<T>`  | request-scoped value written by middleware    |
//!
//! `HttpRequest`, `ResponseWriter` and `WebSocketSession` may be taken
//! directly as singletons.
//!
//! ```rust,ignore
//! group.get("/items/{id}", &["id", "page"], |Path(id): Path<u64>, Query(page): Query<Option<u32>>| async move {
//!     format!("item {id}, page {}", page.unwrap_or(1))
//! })?;
//! ```

use crate::body::UploadFile;
use crate::container::Container;
use crate::http::{HttpRequest, ResponseWriter};
use crate::coerce::FromParam;
use crate::issue::{Issue, IssueKind};
use crate::websocket::WebSocketSession;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A value produced by the binder, consumed once by the handler adapter.
pub type BoundValue = Box<dyn Any + Send>;

/// How the binder produces a value of a parameter's declared type.
#[derive(Clone, Copy)]
pub enum Shape {
    /// A scalar coerced from a string. `absent` supplies the value bound when
    /// the source has no entry (for `Option<T>`).
    Scalar {
        expected: &'static str,
        decode: fn(&str) -> Result<BoundValue, String>,
        absent: fn() -> Option<BoundValue>,
    },
    /// An uploaded file from a multipart form
    Upload { optional: bool },
    /// Raw body bytes (`Vec<u8>`)
    Bytes,
    /// Body as UTF-8 text (`String`)
    Text,
    /// Body decoded as a JSON document
    Document(fn(&[u8], &[&str]) -> Result<BoundValue, Issue>),
    /// Resolved from the dependency container
    Service(fn(&Container) -> Result<BoundValue, crate::Error>),
    /// Read from the request-scoped store
    Context(fn(&Arc<dyn Any + Send + Sync>) -> Option<BoundValue>),
    /// The request itself
    Request,
    /// The response writer
    Response,
    /// The WebSocket session of an upgraded connection
    WebSocket,
}

impl Shape {
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Scalar { .. } => "scalar",
            Shape::Upload { .. } => "upload",
            Shape::Bytes => "bytes",
            Shape::Text => "text",
            Shape::Document(_) => "document",
            Shape::Service(_) => "service",
            Shape::Context(_) => "context",
            Shape::Request => "request",
            Shape::Response => "response",
            Shape::WebSocket => "websocket",
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar { expected, .. } => write!(f, "Scalar({expected})"),
            Shape::Upload { optional } => write!(f, "Upload {{ optional: {optional} }}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Declared value type of a parameter (the type inside the wrapper).
#[derive(Debug, Clone, Copy)]
pub struct ValueType {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub shape: Shape,
}

impl ValueType {
    pub fn of<T: 'static>(shape: Shape) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            shape,
        }
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.shape.name() == other.shape.name()
    }
}

/// A type that can appear as a handler parameter.
pub trait Extract: Sized + Send + 'static {
    /// Wrapper kind: `"Query"`, `"Path"`, `"Header"`, `"Cookie"`, `"Body"`,
    /// `"Form"`, `"Service"`, `"Context"`; empty for bare singletons.
    const WRAPPER: &'static str;

    fn value_type() -> ValueType;

    /// Rebuild the parameter from the binder's output.
    fn from_bound(value: BoundValue) -> Option<Self>;
}

/// A value type that can be read from a string source or a form.
pub trait ParamValue: Send + 'static {
    fn param_shape() -> Shape;
}

fn decode_scalar<T: FromParam>(raw: &str) -> Result<BoundValue, String> {
    T::from_param(raw).map(|v| Box::new(v) as BoundValue)
}

fn absent_scalar<T: FromParam>() -> Option<BoundValue> {
    T::absent().map(|v| Box::new(v) as BoundValue)
}

fn scalar_shape<T: FromParam>() -> Shape {
    Shape::Scalar {
        expected: T::TYPE_NAME,
        decode: decode_scalar::<T>,
        absent: absent_scalar::<T>,
    }
}

macro_rules! impl_param_value {
    ($($ty:ty),*) => {
        $(
            impl ParamValue for $ty {
                fn param_shape() -> Shape {
                    scalar_shape::<$ty>()
                }
            }

            impl ParamValue for Option<$ty> {
                fn param_shape() -> Shape {
                    scalar_shape::<Option<$ty>>()
                }
            }
        )*
    };
}

impl_param_value!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, String
);

impl ParamValue for UploadFile {
    fn param_shape() -> Shape {
        Shape::Upload { optional: false }
    }
}

impl ParamValue for Option<UploadFile> {
    fn param_shape() -> Shape {
        Shape::Upload { optional: true }
    }
}

macro_rules! param_wrapper {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name<T>(pub T);

        impl<T> $name<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }

        impl<T> Deref for $name<T> {
            type Target = T;

            fn deref(&self) -> &T {
                &self.0
            }
        }

        impl<T> DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut T {
                &mut self.0
            }
        }

        impl<T: ParamValue> Extract for $name<T> {
            const WRAPPER: &'static str = $kind;

            fn value_type() -> ValueType {
                ValueType::of::<T>(T::param_shape())
            }

            fn from_bound(value: BoundValue) -> Option<Self> {
                value.downcast::<T>().ok().map(|v| $name(*v))
            }
        }
    };
}

param_wrapper!(
    /// A route placeholder, `{name}` in the pattern.
    Path,
    "Path"
);
param_wrapper!(
    /// A query-string value. The first occurrence wins.
    Query,
    "Query"
);
param_wrapper!(
    /// A request header, looked up by its lower-camel-case name
    /// (`User-Agent` is `userAgent`).
    Header,
    "Header"
);
param_wrapper!(
    /// A request cookie, by exact name.
    Cookie,
    "Cookie"
);
param_wrapper!(
    /// A form field or uploaded file.
    Form,
    "Form"
);

/// The request body.
///
/// `Body<Vec<u8>>` receives the raw bytes, `Body<String>` the UTF-8 text, and
/// any other type is decoded from JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Body<T>(pub T);

impl<T> Body<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Body<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

fn decode_document<T: DeserializeOwned + Send + 'static>(
    bytes: &[u8],
    loc: &[&str],
) -> Result<BoundValue, Issue> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value: T = serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| json_issue(loc, e.path().to_string(), e.into_inner()))?;
    deserializer
        .end()
        .map_err(|e| json_issue(loc, ".".to_string(), e))?;
    Ok(Box::new(value))
}

fn json_issue(loc: &[&str], path: String, error: serde_json::Error) -> Issue {
    use serde_json::error::Category;

    match error.classify() {
        Category::Syntax | Category::Eof => Issue::new(
            loc,
            format!(
                "Invalid JSON syntax at line {} column {}: {}",
                error.line(),
                error.column(),
                error
            ),
            IssueKind::Syntax,
        ),
        Category::Data => {
            let message = error.to_string();
            let mismatch = ["invalid type", "invalid value", "invalid length"]
                .iter()
                .any(|prefix| message.starts_with(prefix));
            if mismatch {
                Issue::new(
                    loc,
                    format!("Type mismatch at '{path}': {message}"),
                    IssueKind::JsonType,
                )
            } else {
                Issue::new(
                    loc,
                    format!("JSON decoding error at '{path}': {message}"),
                    IssueKind::Target,
                )
            }
        }
        Category::Io => Issue::new(
            loc,
            format!("JSON decoding error: {error}"),
            IssueKind::Target,
        ),
    }
}

impl<T: DeserializeOwned + Send + 'static> Extract for Body<T> {
    const WRAPPER: &'static str = "Body";

    fn value_type() -> ValueType {
        let id = TypeId::of::<T>();
        let shape = if id == TypeId::of::<Vec<u8>>() {
            Shape::Bytes
        } else if id == TypeId::of::<String>() {
            Shape::Text
        } else {
            Shape::Document(decode_document::<T>)
        };
        ValueType::of::<T>(shape)
    }

    fn from_bound(value: BoundValue) -> Option<Self> {
        value.downcast::<T>().ok().map(|v| Body(*v))
    }
}

/// A shared value from the dependency container.
#[derive(Debug)]
pub struct Service<T>(pub Arc<T>);

impl<T> Clone for Service<T> {
    fn clone(&self) -> Self {
        Service(self.0.clone())
    }
}

impl<T> Deref for Service<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

fn resolve_service<T: Send + Sync + 'static>(
    container: &Container,
) -> Result<BoundValue, crate::Error> {
    container.resolve::<T>().map(|v| Box::new(v) as BoundValue)
}

impl<T: Send + Sync + 'static> Extract for Service<T> {
    const WRAPPER: &'static str = "Service";

    fn value_type() -> ValueType {
        ValueType::of::<T>(Shape::Service(resolve_service::<T>))
    }

    fn from_bound(value: BoundValue) -> Option<Self> {
        value.downcast::<Arc<T>>().ok().map(|v| Service(*v))
    }
}

/// A request-scoped value, stored by middleware under the parameter's name.
#[derive(Debug, Clone, PartialEq)]
pub struct Context<T>(pub T);

impl<T> Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

fn read_context<T: Clone + Send + Sync + 'static>(
    value: &Arc<dyn Any + Send + Sync>,
) -> Option<BoundValue> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as BoundValue)
}

impl<T: Clone + Send + Sync + 'static> Extract for Context<T> {
    const WRAPPER: &'static str = "Context";

    fn value_type() -> ValueType {
        ValueType::of::<T>(Shape::Context(read_context::<T>))
    }

    fn from_bound(value: BoundValue) -> Option<Self> {
        value.downcast::<T>().ok().map(|v| Context(*v))
    }
}

macro_rules! singleton {
    ($ty:ty, $shape:expr) => {
        impl Extract for $ty {
            const WRAPPER: &'static str = "";

            fn value_type() -> ValueType {
                ValueType::of::<$ty>($shape)
            }

            fn from_bound(value: BoundValue) -> Option<Self> {
                value.downcast::<$ty>().ok().map(|v| *v)
            }
        }
    };
}

singleton!(HttpRequest, Shape::Request);
singleton!(ResponseWriter, Shape::Response);
singleton!(WebSocketSession, Shape::WebSocket);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Person {
        #[allow(dead_code)]
        name: String,
        #[allow(dead_code)]
        age: i32,
    }

    fn document_issue<T: DeserializeOwned + Send + 'static>(json: &str) -> Issue {
        let Shape::Document(decode) = Body::<T>::value_type().shape else {
            panic!("expected a document shape");
        };
        match decode(json.as_bytes(), &["body", "person"]) {
            Ok(_) => panic!("expected an issue for {json}"),
            Err(issue) => issue,
        }
    }

    #[test]
    fn test_body_shape_selection() {
        assert!(matches!(Body::<Vec<u8>>::value_type().shape, Shape::Bytes));
        assert!(matches!(Body::<String>::value_type().shape, Shape::Text));
        assert!(matches!(
            Body::<Person>::value_type().shape,
            Shape::Document(_)
        ));
    }

    #[test]
    fn test_json_type_issue_names_field() {
        let issue = document_issue::<Person>(r#"{"name":"Ana","age":"notanumber"}"#);
        assert_eq!(issue.kind, IssueKind::JsonType);
        assert!(issue.msg.contains("age"), "{}", issue.msg);
        assert_eq!(issue.loc, vec!["body", "person"]);
    }

    #[test]
    fn test_json_syntax_issue() {
        let issue = document_issue::<Person>(r#"{"name": "#);
        assert_eq!(issue.kind, IssueKind::Syntax);
        assert!(issue.msg.contains("line 1"));
    }

    #[test]
    fn test_json_missing_field_is_target() {
        let issue = document_issue::<Person>(r#"{"name":"Ana"}"#);
        assert_eq!(issue.kind, IssueKind::Target);
    }

    #[test]
    fn test_scalar_shapes() {
        let Shape::Scalar { decode, absent, .. } = Query::<i32>::value_type().shape else {
            panic!("expected scalar");
        };
        let value = decode("5").unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 5);
        assert!(absent().is_none());

        let Shape::Scalar { absent, .. } = Query::<Option<i32>>::value_type().shape else {
            panic!("expected scalar");
        };
        let value = absent().unwrap();
        assert_eq!(*value.downcast::<Option<i32>>().unwrap(), None);
    }

    #[test]
    fn test_from_bound_round_trip() {
        let bound: BoundValue = Box::new(7u64);
        assert_eq!(Path::<u64>::from_bound(bound), Some(Path(7)));

        let wrong: BoundValue = Box::new("7".to_string());
        assert_eq!(Path::<u64>::from_bound(wrong), None);
    }

    #[test]
    fn test_wrapper_kinds() {
        assert_eq!(<Path<i32> as Extract>::WRAPPER, "Path");
        assert_eq!(<Form<UploadFile> as Extract>::WRAPPER, "Form");
        assert_eq!(<Service<String> as Extract>::WRAPPER, "Service");
        assert_eq!(<HttpRequest as Extract>::WRAPPER, "");
    }
}
