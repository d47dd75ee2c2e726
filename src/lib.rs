// SwiftAPI - a declarative HTTP framework for Rust
//
// Handlers declare typed parameters and the framework binds them from each
// request, with route groups, middleware chains and WebSocket sessions.

// Re-export core functionality
pub use swiftapi_core::*;

// Middleware implementations are written with `#[async_trait]`
pub use async_trait::async_trait;

// Re-export optional crates
#[cfg(feature = "jwt")]
pub use swiftapi_jwt as jwt;

#[cfg(feature = "ratelimit")]
pub use swiftapi_ratelimit as ratelimit;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AppConfig,
        Application,
        BackgroundTasks,
        Body,
        Container,
        Context,
        Cookie,
        Error,
        Form,
        Header,
        HttpRequest,
        HttpResponse,
        IntoResponse,
        Json,
        Middleware,
        Next,
        Path,
        Query,
        ResponseWriter,
        Router,
        RouterGroup,
        Service,
        UploadFile,
        // WebSocket types
        EventPayload,
        WebSocketHub,
        WebSocketSession,
        async_trait,
        from_fn,
    };
}
