// Core library for the SwiftAPI HTTP framework
// Routing, middleware chains and declarative parameter binding: handlers
// declare typed parameters (`Path<u32>`, `Query<Option<bool>>`, `Body<T>`,
// `Service<T>`...) and the binder fills them from each request.

pub mod application;
pub mod binder;
pub mod body;
pub mod coerce;
pub mod config;
pub mod container;
pub mod dependant;
pub mod error;
pub mod extract;
pub mod handler;
pub mod http;
pub mod issue;
pub mod logging;
pub mod middleware;
pub mod path;
pub mod response;
pub mod routing;
pub mod signature;
pub mod tasks;
pub mod websocket;

// Re-export commonly used types
pub use application::Application;
pub use binder::{BindContext, BindError, bind, format_header_key};
pub use body::{FormData, RequestBody, UploadFile};
pub use coerce::FromParam;
pub use config::AppConfig;
pub use container::Container;
pub use dependant::{Binding, Dependant, ParameterDescriptor, Singleton, Tag, classify};
pub use error::Error;
pub use extract::{Body, Context, Cookie, Extract, Form, Header, Path, Query, Service};
pub use handler::{BoxedHandler, Handler};
pub use crate::http::{HttpRequest, HttpResponse, RequestScope, ResponseWriter, parse_query_string};
pub use issue::{Issue, IssueKind, issues_response};
pub use middleware::{
    ChainFuture, CorsMiddleware, FnMiddleware, Middleware, Next, RequestLogger, compose, from_fn,
    next_fn,
};
pub use path::PathPattern;
pub use response::{IntoResponse, Json};
pub use routing::{MethodMismatch, Route, Router, RouterGroup, UpgradeConfig};
pub use signature::{HandlerKey, ParamSpec, ParamType, analyze};
pub use tasks::BackgroundTasks;
pub use websocket::{EventPayload, WeakSession, WebSocketHub, WebSocketSession};
