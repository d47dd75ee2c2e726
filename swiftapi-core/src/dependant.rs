//! Classification of handler parameters by binding location

use crate::Error;
use crate::extract::{Shape, ValueType};
use crate::logging::{debug, trace};
use crate::signature::{HandlerKey, ParamSpec};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Query,
    Path,
    Header,
    Cookie,
    Body,
    Form,
    Service,
    Context,
}

impl Tag {
    /// Map a wrapper kind to its tag. Unknown kinds are `None`.
    pub fn from_wrapper(wrapper: &str) -> Option<Self> {
        Some(match wrapper {
            "Query" => Tag::Query,
            "Path" => Tag::Path,
            "Header" => Tag::Header,
            "Cookie" => Tag::Cookie,
            "Body" => Tag::Body,
            "Form" => Tag::Form,
            "Service" => Tag::Service,
            "Context" => Tag::Context,
            _ => return None,
        })
    }

    /// First label of an issue location
    pub fn location(&self) -> &'static str {
        match self {
            Tag::Query => "query",
            Tag::Path => "path",
            Tag::Header => "header",
            Tag::Cookie => "cookie",
            Tag::Body => "body",
            Tag::Form => "form",
            Tag::Service => "service",
            Tag::Context => "context",
        }
    }

    fn accepts(&self, shape: &Shape) -> bool {
        match self {
            Tag::Query | Tag::Path | Tag::Header | Tag::Cookie => {
                matches!(shape, Shape::Scalar { .. })
            }
            Tag::Form => matches!(shape, Shape::Scalar { .. } | Shape::Upload { .. }),
            Tag::Body => matches!(shape, Shape::Bytes | Shape::Text | Shape::Document(_)),
            Tag::Service => matches!(shape, Shape::Service(_)),
            Tag::Context => matches!(shape, Shape::Context(_)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.location())
    }
}

/// Parameters bound from the request machinery itself rather than from a
/// location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Singleton {
    Request,
    Response,
    WebSocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Tagged(Tag),
    Singleton(Singleton),
}

/// A classified handler parameter. Holds no per-request state.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub index: usize,
    pub name: String,
    pub binding: Binding,
    pub value_type: ValueType,
}

/// All parameters of one handler grouped by binding location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependant {
    pub path: Vec<ParameterDescriptor>,
    pub query: Vec<ParameterDescriptor>,
    pub header: Vec<ParameterDescriptor>,
    pub cookie: Vec<ParameterDescriptor>,
    pub body: Option<ParameterDescriptor>,
    pub form: Vec<ParameterDescriptor>,
    pub service: Vec<ParameterDescriptor>,
    pub context: Vec<ParameterDescriptor>,
    pub request: Option<ParameterDescriptor>,
    pub response: Option<ParameterDescriptor>,
    pub websocket: Option<ParameterDescriptor>,
    pub arity: usize,
}

impl Dependant {
    /// Whether binding needs the request body
    pub fn needs_body(&self) -> bool {
        self.body.is_some() || !self.form.is_empty()
    }
}

/// Group analyzed parameters by tag and enforce the registration rules.
pub fn classify(specs: &[ParamSpec]) -> Result<Dependant, Error> {
    let mut dependant = Dependant {
        arity: specs.len(),
        ..Dependant::default()
    };

    for spec in specs {
        let singleton = match spec.value_type.shape {
            Shape::Request => Some(Singleton::Request),
            Shape::Response => Some(Singleton::Response),
            Shape::WebSocket => Some(Singleton::WebSocket),
            _ => None,
        };

        if let Some(singleton) = singleton {
            let slot = match singleton {
                Singleton::Request => &mut dependant.request,
                Singleton::Response => &mut dependant.response,
                Singleton::WebSocket => &mut dependant.websocket,
            };
            if slot.is_some() {
                return Err(Error::Registration(format!(
                    "parameter '{}' duplicates the {:?} singleton",
                    spec.name, singleton
                )));
            }
            *slot = Some(ParameterDescriptor {
                index: spec.index,
                name: spec.name.clone(),
                binding: Binding::Singleton(singleton),
                value_type: spec.value_type,
            });
            trace!(param = %spec.name, ?singleton, "Classified singleton parameter");
            continue;
        }

        let tag = Tag::from_wrapper(spec.wrapper).ok_or_else(|| {
            Error::Registration(format!(
                "parameter '{}' has unknown wrapper kind '{}'",
                spec.name, spec.wrapper
            ))
        })?;

        if !tag.accepts(&spec.value_type.shape) {
            return Err(Error::Registration(format!(
                "parameter '{}': {} values cannot be bound from {}",
                spec.name,
                spec.value_type.shape.name(),
                tag
            )));
        }

        let descriptor = ParameterDescriptor {
            index: spec.index,
            name: spec.name.clone(),
            binding: Binding::Tagged(tag),
            value_type: spec.value_type,
        };

        match tag {
            Tag::Path => dependant.path.push(descriptor),
            Tag::Query => dependant.query.push(descriptor),
            Tag::Header => dependant.header.push(descriptor),
            Tag::Cookie => dependant.cookie.push(descriptor),
            Tag::Service => dependant.service.push(descriptor),
            Tag::Context => dependant.context.push(descriptor),
            Tag::Form => {
                if let Some(body) = &dependant.body {
                    return Err(body_and_form(&body.name, &descriptor.name));
                }
                dependant.form.push(descriptor);
            }
            Tag::Body => {
                if let Some(existing) = &dependant.body {
                    return Err(Error::Registration(format!(
                        "only one body parameter is allowed, found '{}' and '{}'",
                        existing.name, descriptor.name
                    )));
                }
                if let Some(form) = dependant.form.first() {
                    return Err(body_and_form(&descriptor.name, &form.name));
                }
                dependant.body = Some(descriptor);
            }
        }
    }

    Ok(dependant)
}

fn body_and_form(body: &str, form: &str) -> Error {
    Error::Registration(format!(
        "body parameter '{body}' cannot be combined with form parameter '{form}'"
    ))
}

static DEPENDANTS: Lazy<RwLock<HashMap<HandlerKey, Arc<Dependant>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Classify with a per-handler cache, keyed like the signature cache.
pub fn dependant_for(key: &HandlerKey, specs: &[ParamSpec]) -> Result<Arc<Dependant>, Error> {
    if let Some(cached) = DEPENDANTS.read().get(key) {
        return Ok(cached.clone());
    }

    let dependant = Arc::new(classify(specs)?);
    debug!(
        handler = key.type_name(),
        path = dependant.path.len(),
        query = dependant.query.len(),
        header = dependant.header.len(),
        cookie = dependant.cookie.len(),
        body = dependant.body.is_some(),
        form = dependant.form.len(),
        service = dependant.service.len(),
        context = dependant.context.len(),
        "Classified handler parameters"
    );

    DEPENDANTS.write().insert(key.clone(), dependant.clone());
    Ok(dependant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::UploadFile;
    use crate::extract::{Body, Context, Cookie, Extract, Form, Header, Path, Query, Service};
    use crate::http::{HttpRequest, ResponseWriter};
    use crate::signature::ParamType;

    fn specs(params: &[(&str, ParamType)]) -> Vec<ParamSpec> {
        params
            .iter()
            .enumerate()
            .map(|(index, (name, param))| ParamSpec {
                index,
                name: name.to_string(),
                wrapper: param.wrapper,
                value_type: param.value_type,
            })
            .collect()
    }

    fn p<E: Extract>() -> ParamType {
        ParamType::of::<E>()
    }

    #[test]
    fn test_groups_by_tag() {
        let dependant = classify(&specs(&[
            ("id", p::<Path<u64>>()),
            ("page", p::<Query<i32>>()),
            ("userAgent", p::<Header<String>>()),
            ("session", p::<Cookie<String>>()),
            ("payload", p::<Body<serde_json::Value>>()),
            ("db", p::<Service<String>>()),
            ("claims", p::<Context<String>>()),
            ("req", p::<HttpRequest>()),
            ("res", p::<ResponseWriter>()),
        ]))
        .unwrap();

        assert_eq!(dependant.arity, 9);
        assert_eq!(dependant.path[0].name, "id");
        assert_eq!(dependant.query[0].index, 1);
        assert_eq!(dependant.header.len(), 1);
        assert_eq!(dependant.cookie.len(), 1);
        assert_eq!(dependant.body.as_ref().unwrap().name, "payload");
        assert_eq!(dependant.service.len(), 1);
        assert_eq!(dependant.context.len(), 1);
        assert_eq!(dependant.request.as_ref().map(|d| d.index), Some(7));
        assert_eq!(
            dependant.response.as_ref().map(|d| d.binding),
            Some(Binding::Singleton(Singleton::Response))
        );
        assert!(dependant.websocket.is_none());
        assert!(dependant.needs_body());
    }

    #[test]
    fn test_two_bodies_rejected() {
        let result = classify(&specs(&[
            ("a", p::<Body<String>>()),
            ("b", p::<Body<Vec<u8>>>()),
        ]));
        assert!(matches!(result, Err(Error::Registration(_))));
    }

    #[test]
    fn test_body_and_form_rejected_in_either_order() {
        let body_first = classify(&specs(&[
            ("payload", p::<Body<String>>()),
            ("title", p::<Form<String>>()),
        ]));
        let form_first = classify(&specs(&[
            ("title", p::<Form<String>>()),
            ("payload", p::<Body<String>>()),
        ]));

        let (Err(Error::Registration(a)), Err(Error::Registration(b))) = (body_first, form_first)
        else {
            panic!("both orders must fail");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_upload_outside_form_rejected() {
        let result = classify(&specs(&[("file", p::<Query<UploadFile>>())]));
        assert!(matches!(result, Err(Error::Registration(_))));

        let ok = classify(&specs(&[("file", p::<Form<UploadFile>>())])).unwrap();
        assert_eq!(ok.form.len(), 1);
    }

    #[test]
    fn test_duplicate_singleton_rejected() {
        let result = classify(&specs(&[
            ("a", p::<HttpRequest>()),
            ("b", p::<HttpRequest>()),
        ]));
        assert!(matches!(result, Err(Error::Registration(_))));
    }

    #[test]
    fn test_unknown_wrapper_rejected() {
        let mut params = specs(&[("x", p::<Query<i32>>())]);
        params[0].wrapper = "Session";
        assert!(matches!(classify(&params), Err(Error::Registration(_))));
    }
}
