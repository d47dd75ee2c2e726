//! Validation issues reported when a request cannot be bound to a handler

use crate::HttpResponse;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a binding failure. The serialized names are part of the wire
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    Invalid,
    TypeError,
    Unsupported,
    Empty,
    Multipart,
    #[serde(rename = "urlencoded")]
    UrlEncoded,
    Syntax,
    #[serde(rename = "json_type")]
    JsonType,
    Target,
    General,
    BodyRead,
    InvalidType,
    UnsupportedType,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Missing => "missing",
            IssueKind::Invalid => "invalid",
            IssueKind::TypeError => "type_error",
            IssueKind::Unsupported => "unsupported",
            IssueKind::Empty => "empty",
            IssueKind::Multipart => "multipart",
            IssueKind::UrlEncoded => "urlencoded",
            IssueKind::Syntax => "syntax",
            IssueKind::JsonType => "json_type",
            IssueKind::Target => "target",
            IssueKind::General => "general",
            IssueKind::BodyRead => "body_read",
            IssueKind::InvalidType => "invalid_type",
            IssueKind::UnsupportedType => "unsupported_type",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation failure: where it happened, what went wrong and its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
}

impl Issue {
    pub fn new(loc: &[&str], msg: impl Into<String>, kind: IssueKind) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind,
        }
    }

    pub fn missing(location: &str, name: &str) -> Self {
        Self::new(
            &[location, name],
            format!("{location} parameter '{name}' is required"),
            IssueKind::Missing,
        )
    }

    /// A value that could not be coerced; `reason` comes from the decoder.
    pub fn type_error(location: &str, name: &str, expected: &str, reason: &str) -> Self {
        Self::new(
            &[location, name],
            format!("{reason}: expected {expected}"),
            IssueKind::TypeError,
        )
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.loc.join("."), self.msg)
    }
}

/// Render issues as the 422 response body `[{loc, msg, type}, ...]`.
pub fn issues_response(issues: &[Issue]) -> HttpResponse {
    let body = serde_json::to_vec(issues).unwrap_or_else(|_| b"[]".to_vec());
    HttpResponse::new(422)
        .with_header("Content-Type".to_string(), "application/json".to_string())
        .with_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let all = [
            (IssueKind::Missing, "missing"),
            (IssueKind::TypeError, "type_error"),
            (IssueKind::UrlEncoded, "urlencoded"),
            (IssueKind::JsonType, "json_type"),
            (IssueKind::BodyRead, "body_read"),
            (IssueKind::InvalidType, "invalid_type"),
            (IssueKind::UnsupportedType, "unsupported_type"),
        ];
        for (kind, name) in all {
            assert_eq!(serde_json::to_value(kind).unwrap(), name);
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn test_issue_serialization_shape() {
        let issue = Issue::type_error("query", "page", "i32", "invalid value 'abc'");
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["loc"], serde_json::json!(["query", "page"]));
        assert_eq!(value["type"], "type_error");
        assert!(value["msg"].as_str().unwrap().contains("abc"));
    }

    #[test]
    fn test_issues_response_is_422() {
        let response = issues_response(&[Issue::missing("path", "id")]);
        assert_eq!(response.status, 422);
        let parsed: Vec<Issue> = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, IssueKind::Missing);
    }
}
