//! Handler signature analysis

use crate::Error;
use crate::extract::{Extract, ValueType};
use crate::logging::{debug, trace};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Wrapper kind and value type of one handler parameter, as reported by the
/// type system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamType {
    pub wrapper: &'static str,
    pub value_type: ValueType,
}

impl ParamType {
    pub fn of<E: Extract>() -> Self {
        Self {
            wrapper: E::WRAPPER,
            value_type: E::value_type(),
        }
    }
}

/// One analyzed parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub index: usize,
    pub name: String,
    pub wrapper: &'static str,
    pub value_type: ValueType,
}

/// Identity of a registered handler: its concrete type plus the parameter
/// names it was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    type_id: TypeId,
    type_name: &'static str,
    names: Vec<String>,
}

impl HandlerKey {
    pub fn of<H: 'static>(names: &[&str]) -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: std::any::type_name::<H>(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

pub(crate) type Signature = Arc<[ParamSpec]>;

static SIGNATURES: Lazy<RwLock<HashMap<HandlerKey, Signature>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Zip the declared parameter names with the parameter types.
///
/// Results are cached per handler key. Two threads analyzing the same handler
/// for the first time both compute it; the later store wins and both results
/// are equal.
pub fn analyze(key: &HandlerKey, params: &[ParamType]) -> Result<Signature, Error> {
    if let Some(cached) = SIGNATURES.read().get(key) {
        trace!(handler = key.type_name, "Signature cache hit");
        return Ok(cached.clone());
    }

    let signature = compute(key, params)?;
    debug!(
        handler = key.type_name,
        params = signature.len(),
        "Analyzed handler signature"
    );

    SIGNATURES.write().insert(key.clone(), signature.clone());
    Ok(signature)
}

fn compute(key: &HandlerKey, params: &[ParamType]) -> Result<Signature, Error> {
    if key.names.len() != params.len() {
        return Err(Error::Registration(format!(
            "handler {} takes {} parameter(s) but {} name(s) were given",
            key.type_name,
            params.len(),
            key.names.len()
        )));
    }

    let mut specs = Vec::with_capacity(params.len());
    for (index, (name, param)) in key.names.iter().zip(params).enumerate() {
        if name.trim().is_empty() {
            return Err(Error::Registration(format!(
                "parameter {index} of handler {} has an empty name",
                key.type_name
            )));
        }
        if key.names[..index].contains(name) {
            return Err(Error::Registration(format!(
                "duplicate parameter name '{name}' in handler {}",
                key.type_name
            )));
        }
        specs.push(ParamSpec {
            index,
            name: name.clone(),
            wrapper: param.wrapper,
            value_type: param.value_type,
        });
    }

    Ok(specs.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Header, Path, Query};

    fn params() -> Vec<ParamType> {
        vec![
            ParamType::of::<Path<u64>>(),
            ParamType::of::<Query<Option<u32>>>(),
            ParamType::of::<Header<String>>(),
        ]
    }

    struct Marker;

    #[test]
    fn test_analyze_zips_names_and_types() {
        let key = HandlerKey::of::<Marker>(&["id", "page", "userAgent"]);
        let signature = analyze(&key, &params()).unwrap();

        assert_eq!(signature.len(), 3);
        assert_eq!(signature[0].name, "id");
        assert_eq!(signature[0].wrapper, "Path");
        assert_eq!(signature[1].index, 1);
        assert_eq!(signature[1].wrapper, "Query");
        assert_eq!(signature[2].value_type.type_name, "alloc::string::String");
    }

    #[test]
    fn test_analyze_is_cached() {
        struct Cached;
        let key = HandlerKey::of::<Cached>(&["id", "page", "agent"]);
        let first = analyze(&key, &params()).unwrap();
        let second = analyze(&key, &params()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_name_count_mismatch() {
        struct Short;
        let key = HandlerKey::of::<Short>(&["id"]);
        assert!(matches!(
            analyze(&key, &params()),
            Err(Error::Registration(_))
        ));
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        struct Dup;
        let key = HandlerKey::of::<Dup>(&["id", "id", "agent"]);
        assert!(analyze(&key, &params()).is_err());

        struct Empty;
        let key = HandlerKey::of::<Empty>(&["id", " ", "agent"]);
        assert!(analyze(&key, &params()).is_err());
    }

    #[test]
    fn test_same_type_different_names_are_distinct() {
        struct Shared;
        let a = analyze(&HandlerKey::of::<Shared>(&["a", "b", "c"]), &params()).unwrap();
        let b = analyze(&HandlerKey::of::<Shared>(&["x", "y", "z"]), &params()).unwrap();
        assert_eq!(a[0].name, "a");
        assert_eq!(b[0].name, "x");
    }
}
