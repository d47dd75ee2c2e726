//! Request body decoding by content type
//!
//! The body is read once per request and classified as absent, raw bytes,
//! or a parsed form (`multipart/form-data` or
//! `application/x-www-form-urlencoded`). Form parsing failures are reported
//! as issues at `["body"]` and stop binding early.

use crate::HttpRequest;
use crate::issue::{Issue, IssueKind};
use crate::logging::trace;
use bytes::Bytes;
use std::collections::HashMap;

/// An uploaded file from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Form field the file was sent under
    pub field_name: String,

    /// Original filename, as sent by the client
    pub file_name: Option<String>,

    /// Declared MIME type of the part
    pub content_type: Option<String>,

    /// File contents
    pub data: Bytes,
}

impl UploadFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// File extension taken from the client filename
    pub fn extension(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }

    /// Contents as UTF-8 text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Parsed form payload. Values keep their submission order per field.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub fields: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<UploadFile>>,
    pub multipart: bool,
}

impl FormData {
    /// First value submitted for a field
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// First file uploaded for a field
    pub fn file(&self, name: &str) -> Option<&UploadFile> {
        self.files.get(name).and_then(|files| files.first())
    }
}

/// The request body as seen by the binder.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// The client sent no body at all
    Absent,
    /// Unparsed payload (possibly zero-length)
    Raw(Bytes),
    /// A parsed form
    Form(FormData),
}

impl RequestBody {
    /// Classify and, for forms, parse the body of `req`.
    ///
    /// A zero-length body is `Absent` unless the client declared it with a
    /// `Content-Length` or `Content-Type` header. A declared empty body with
    /// a form content type is an empty form; any other is an empty `Raw`
    /// body.
    pub async fn from_request(req: &HttpRequest) -> Result<Self, Issue> {
        let content_type = req.content_type();

        if req.body.is_empty() {
            let declared =
                req.header("content-length").is_some() || content_type.is_some();
            return Ok(match content_type.as_deref() {
                Some("multipart/form-data") => RequestBody::Form(FormData {
                    multipart: true,
                    ..FormData::default()
                }),
                Some("application/x-www-form-urlencoded") => RequestBody::Form(FormData::default()),
                _ if declared => RequestBody::Raw(Bytes::new()),
                _ => RequestBody::Absent,
            });
        }

        match content_type.as_deref() {
            Some("multipart/form-data") => {
                let content_type = req.header("content-type").unwrap_or_default();
                parse_multipart(content_type, req.body.clone())
                    .await
                    .map(RequestBody::Form)
            }
            Some("application/x-www-form-urlencoded") => {
                parse_urlencoded(&req.body).map(RequestBody::Form)
            }
            _ => Ok(RequestBody::Raw(req.body.clone())),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RequestBody::Absent)
    }
}

/// Parse an `application/x-www-form-urlencoded` payload.
pub fn parse_urlencoded(body: &[u8]) -> Result<FormData, Issue> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).map_err(|e| {
        Issue::new(
            &["body"],
            format!("Failed to parse form data: {e}"),
            IssueKind::UrlEncoded,
        )
    })?;

    let mut form = FormData::default();
    for (name, value) in pairs {
        form.fields.entry(name).or_default().push(value);
    }
    Ok(form)
}

/// Parse a `multipart/form-data` payload. Parts with a filename become
/// uploads; the rest are text fields.
pub async fn parse_multipart(content_type: &str, body: Bytes) -> Result<FormData, Issue> {
    let multipart_issue = |e: multer::Error| {
        Issue::new(
            &["body"],
            format!("Failed to parse multipart form: {e}"),
            IssueKind::Multipart,
        )
    };

    let boundary = multer::parse_boundary(content_type).map_err(multipart_issue)?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut form = FormData {
        multipart: true,
        ..FormData::default()
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_issue)? {
        let Some(name) = field.name().map(String::from) else {
            continue;
        };

        if let Some(file_name) = field.file_name().map(String::from) {
            let content_type = field.content_type().map(|m| m.to_string());
            let data = field.bytes().await.map_err(multipart_issue)?;
            trace!(field = %name, size = data.len(), "Parsed multipart file");
            form.files.entry(name.clone()).or_default().push(UploadFile {
                field_name: name,
                file_name: Some(file_name),
                content_type,
                data,
            });
        } else {
            let text = field.text().await.map_err(multipart_issue)?;
            form.fields.entry(name).or_default().push(text);
        }
    }

    Ok(form)
}
