// Dependency injection container

use crate::Error;
use crate::logging::{debug, trace};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Result<Instance, Error> + Send + Sync>;

#[derive(Clone)]
enum Provider {
    Instance(Instance),
    /// Built on first resolution, then cached as an instance
    Factory(Factory),
}

/// Type-keyed dependency container.
///
/// Handlers receive its contents through `Service<T>` parameters. Cloning the
/// container shares the same registrations.
#[derive(Clone, Default)]
pub struct Container {
    providers: Arc<RwLock<HashMap<TypeId, Provider>>>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new DI container");
        Self::default()
    }

    /// Register a ready-made value
    pub fn provide<T: Send + Sync + 'static>(&self, value: T) {
        self.provide_arc(Arc::new(value));
    }

    /// Register an already shared value
    pub fn provide_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        let type_name = std::any::type_name::<T>();
        trace!(provider = type_name, "Acquiring write lock for registration");
        self.providers
            .write()
            .insert(TypeId::of::<T>(), Provider::Instance(value));
        debug!(provider = type_name, "Provider registered in DI container");
    }

    /// Register a constructor. It runs once, on first resolution, and may
    /// resolve its own dependencies from the container it is given.
    pub fn provide_factory<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, Error> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let factory: Factory =
            Arc::new(move |container| factory(container).map(|value| Arc::new(value) as Instance));
        self.providers
            .write()
            .insert(TypeId::of::<T>(), Provider::Factory(factory));
        debug!(provider = type_name, "Factory registered in DI container");
    }

    /// Resolve a value by type
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        trace!(provider = type_name, "Attempting to resolve provider");
        let provider = self.providers.read().get(&type_id).cloned();

        let instance = match provider {
            Some(Provider::Instance(instance)) => instance,
            Some(Provider::Factory(factory)) => {
                // The lock is released while the constructor runs so that it
                // can resolve other providers.
                let built = factory(self).map_err(|e| {
                    Error::DependencyInjection(format!("failed to construct {type_name}: {e}"))
                })?;
                let mut providers = self.providers.write();
                match providers.get(&type_id) {
                    Some(Provider::Instance(existing)) => existing.clone(),
                    _ => {
                        providers.insert(type_id, Provider::Instance(built.clone()));
                        built
                    }
                }
            }
            None => {
                debug!(provider = type_name, "Provider not found in container");
                return Err(Error::ProviderNotFound(type_name.to_string()));
            }
        };

        instance.downcast::<T>().map_err(|_| {
            Error::DependencyInjection(format!("provider for {type_name} has the wrong type"))
        })
    }

    /// Resolve `T` and pass it to `f`
    pub fn invoke<T, R, F>(&self, f: F) -> Result<R, Error>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> R,
    {
        let dependency = self.resolve::<T>()?;
        Ok(f(dependency))
    }

    /// Check if a provider is registered
    pub fn has<T: 'static>(&self) -> bool {
        self.contains_type(TypeId::of::<T>())
    }

    pub fn contains_type(&self, type_id: TypeId) -> bool {
        self.providers.read().contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Clear all providers
    pub fn clear(&self) {
        let mut providers = self.providers.write();
        let count = providers.len();
        providers.clear();
        debug!(provider_count = count, "Cleared all providers from container");
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.len())
            .finish()
    }
}
