//! Handler adapter
//!
//! Any `Fn(A1, .., An) -> impl Future<Output = impl IntoResponse>` whose
//! parameters implement `Extract` is a handler. Registration analyzes the
//! parameter list once (types from the trait impls, names from the caller),
//! then the handler is type-erased for storage. Invocation receives the bound
//! values in parameter order and downcasts each exactly once.

use crate::dependant::{Dependant, dependant_for};
use crate::extract::{BoundValue, Extract};
use crate::logging::debug;
use crate::response::IntoResponse;
use crate::signature::{HandlerKey, ParamSpec, ParamType, Signature, analyze};
use crate::{Error, HttpResponse};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by an invoked handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HttpResponse> + Send>>;

/// A function usable as a route handler. `Args` is the tuple of its
/// parameter types.
pub trait Handler<Args>: Clone + Send + Sync + 'static {
    /// Wrapper kind and value type of each parameter, in order.
    fn parameters() -> Vec<ParamType>;

    /// Invoke with bound values, one per parameter, in order.
    fn call(&self, args: Vec<BoundValue>) -> Result<HandlerFuture, Error>;
}

fn restore<E: Extract>(value: Option<BoundValue>, index: usize) -> Result<E, Error> {
    value.and_then(E::from_bound).ok_or_else(|| {
        Error::Internal(format!(
            "argument {index} could not be restored as {}",
            std::any::type_name::<E>()
        ))
    })
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoResponse,
            $($ty: Extract,)*
        {
            fn parameters() -> Vec<ParamType> {
                vec![$(ParamType::of::<$ty>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn call(&self, args: Vec<BoundValue>) -> Result<HandlerFuture, Error> {
                let expected = <Self as Handler<($($ty,)*)>>::parameters().len();
                if args.len() != expected {
                    return Err(Error::Internal(format!(
                        "handler expects {expected} argument(s), got {}",
                        args.len()
                    )));
                }

                let mut args = args.into_iter();
                let mut index = 0usize;
                $(
                    let $ty = restore::<$ty>(args.next(), index)?;
                    index += 1;
                )*

                let future = (self)($($ty),*);
                Ok(Box::pin(async move { future.await.into_response() }))
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);

/// Object-safe view of a handler, used for storage.
trait ErasedHandler: Send + Sync {
    fn call(&self, args: Vec<BoundValue>) -> Result<HandlerFuture, Error>;
}

struct HandlerWrapper<H, Args> {
    handler: H,
    _marker: PhantomData<fn() -> Args>,
}

impl<H, Args> ErasedHandler for HandlerWrapper<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn call(&self, args: Vec<BoundValue>) -> Result<HandlerFuture, Error> {
        self.handler.call(args)
    }
}

/// A registered handler with its analyzed signature and classified
/// parameters.
#[derive(Clone)]
pub struct BoxedHandler {
    inner: Arc<dyn ErasedHandler>,
    key: HandlerKey,
    signature: Signature,
    dependant: Arc<Dependant>,
}

impl BoxedHandler {
    /// Analyze and classify `handler` registered with parameter `names`.
    pub fn new<H, Args>(handler: H, names: &[&str]) -> Result<Self, Error>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let key = HandlerKey::of::<H>(names);
        let signature = analyze(&key, &H::parameters())?;
        let dependant = dependant_for(&key, &signature)?;

        debug!(
            handler = key.type_name(),
            arity = signature.len(),
            "Handler registered"
        );

        Ok(Self {
            inner: Arc::new(HandlerWrapper {
                handler,
                _marker: PhantomData,
            }),
            key,
            signature,
            dependant,
        })
    }

    pub fn call(&self, args: Vec<BoundValue>) -> Result<HandlerFuture, Error> {
        self.inner.call(args)
    }

    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    pub fn signature(&self) -> &[ParamSpec] {
        &self.signature
    }

    pub fn dependant(&self) -> &Dependant {
        &self.dependant
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedHandler")
            .field("handler", &self.key.type_name())
            .field("params", &self.signature.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Path, Query};

    #[tokio::test]
    async fn test_call_restores_arguments_in_order() {
        let handler = BoxedHandler::new(
            |Path(id): Path<u32>, Query(q): Query<String>| async move { format!("{id}:{q}") },
            &["id", "q"],
        )
        .unwrap();

        let args: Vec<BoundValue> = vec![Box::new(7u32), Box::new("x".to_string())];
        let response = handler.call(args).unwrap().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_str(), "7:x");
    }

    #[tokio::test]
    async fn test_zero_arguments() {
        let handler = BoxedHandler::new(|| async { "pong" }, &[]).unwrap();
        let response = handler.call(Vec::new()).unwrap().await;
        assert_eq!(response.body_str(), "pong");
    }

    #[test]
    fn test_wrong_argument_type_is_internal_error() {
        let handler =
            BoxedHandler::new(|Path(id): Path<u32>| async move { id.to_string() }, &["id"])
                .unwrap();
        let args: Vec<BoundValue> = vec![Box::new("seven".to_string())];
        assert!(matches!(handler.call(args), Err(Error::Internal(_))));
    }

    #[test]
    fn test_registration_rejects_name_mismatch() {
        let result = BoxedHandler::new(
            |Path(_a): Path<u32>, Path(_b): Path<u32>| async {},
            &["a"],
        );
        assert!(matches!(result, Err(Error::Registration(_))));
    }
}
