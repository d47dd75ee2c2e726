// Conversion of handler results into HTTP responses

use crate::logging::error;
use crate::{Error, HttpResponse};
use serde::Serialize;

/// Anything a handler may return.
pub trait IntoResponse {
    fn into_response(self) -> HttpResponse;
}

/// Serialize the wrapped value as a JSON response body.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl IntoResponse for HttpResponse {
    fn into_response(self) -> HttpResponse {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::no_content()
    }
}

impl IntoResponse for String {
    fn into_response(self) -> HttpResponse {
        HttpResponse::text(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> HttpResponse {
        HttpResponse::text(self)
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> HttpResponse {
        Json(self).into_response()
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> HttpResponse {
        match HttpResponse::json(&self.0) {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}

impl<R: IntoResponse> IntoResponse for (u16, R) {
    fn into_response(self) -> HttpResponse {
        let mut response = self.1.into_response();
        response.status = self.0;
        response
    }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> HttpResponse {
        match self {
            Ok(value) => value.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }
        let body = serde_json::json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        });
        HttpResponse::new(status.as_u16())
            .with_json(&body)
            .unwrap_or_else(|_| HttpResponse::internal_server_error())
    }
}
