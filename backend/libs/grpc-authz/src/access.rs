//! Method access metadata
//!
//! Each gRPC method resolves to a [`RequiredAccess`]: the protected resource and
//! the operations a caller must hold on it. Resolution is keyed on the method
//! path plus the [`ServiceType`] the host bound when registering the service.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resource and operations a method demands of the caller
///
/// An empty operation set means nothing was declared: the method is public
/// at the interceptor layer and authorization is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredAccess {
    resource: String,
    operations: BTreeSet<String>,
}

impl RequiredAccess {
    pub fn new<I, S>(resource: impl Into<String>, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource: resource.into(),
            operations: operations.into_iter().map(Into::into).collect(),
        }
    }

    /// The "no declared requirement" sentinel
    pub fn unprotected() -> Self {
        Self::default()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn operations(&self) -> &BTreeSet<String> {
        &self.operations
    }

    pub fn is_unprotected(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Service type bound explicitly at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceType(&'static str);

impl ServiceType {
    /// Bind to a Rust service implementation type
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>())
    }

    /// Bind to an explicit name (e.g. the proto service name)
    pub const fn named(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Maps a method to its declared access
///
/// Implementations must be deterministic for a given input pair and safe to
/// call from concurrent calls.
pub trait MethodMetadataResolver: Send + Sync {
    /// Access declared for `method` on `service`
    ///
    /// ## Arguments
    ///
    /// * `method` - Full method path, e.g. `/content.ContentService/GetPost`
    /// * `service` - Service type bound when the handler was registered
    ///
    /// ## Returns
    ///
    /// The declared access, or [`RequiredAccess::unprotected`] when nothing
    /// is declared. Resolution never fails.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use grpc_authz::{AccessRegistry, MethodMetadataResolver, RequiredAccess, ServiceType};
    ///
    /// let content = ServiceType::named("content.ContentService");
    /// let registry = AccessRegistry::builder()
    ///     .method(content, "DeletePost", RequiredAccess::new("posts", ["delete"]))
    ///     .build();
    ///
    /// let access = registry.resolve("/content.ContentService/DeletePost", &content);
    /// assert_eq!(access.resource(), "posts");
    /// assert!(registry.resolve("/content.ContentService/GetPost", &content).is_unprotected());
    /// ```
    fn resolve(&self, method: &str, service: &ServiceType) -> Arc<RequiredAccess>;
}

impl<R: MethodMetadataResolver + ?Sized> MethodMetadataResolver for Arc<R> {
    fn resolve(&self, method: &str, service: &ServiceType) -> Arc<RequiredAccess> {
        (**self).resolve(method, service)
    }
}

/// Declared access table
///
/// Lookup order: method declaration, then the service-level default, then
/// the unprotected sentinel. Method keys are either the full path
/// (`/pkg.Service/Method`) or the bare method name.
#[derive(Debug, Default)]
pub struct AccessRegistry {
    services: HashMap<ServiceType, ServiceAccess>,
    unprotected: Arc<RequiredAccess>,
}

#[derive(Debug, Default)]
struct ServiceAccess {
    default: Option<Arc<RequiredAccess>>,
    methods: HashMap<String, Arc<RequiredAccess>>,
}

impl AccessRegistry {
    pub fn builder() -> AccessRegistryBuilder {
        AccessRegistryBuilder::default()
    }

    fn lookup(&self, method: &str, service: &ServiceType) -> Option<&Arc<RequiredAccess>> {
        let entry = self.services.get(service)?;
        entry
            .methods
            .get(method)
            .or_else(|| entry.methods.get(method_name(method)))
            .or(entry.default.as_ref())
    }
}

impl MethodMetadataResolver for AccessRegistry {
    fn resolve(&self, method: &str, service: &ServiceType) -> Arc<RequiredAccess> {
        match self.lookup(method, service) {
            Some(access) => access.clone(),
            None => {
                debug!(method, service = %service, "No access declared, method is unprotected");
                self.unprotected.clone()
            }
        }
    }
}

/// Builder for [`AccessRegistry`]
#[derive(Debug, Default)]
pub struct AccessRegistryBuilder {
    services: HashMap<ServiceType, ServiceAccess>,
}

impl AccessRegistryBuilder {
    /// Access required by every method of `service` without its own declaration
    pub fn service(mut self, service: ServiceType, access: RequiredAccess) -> Self {
        self.services.entry(service).or_default().default = Some(Arc::new(access));
        self
    }

    /// Access required by one method, overriding the service default
    pub fn method(
        mut self,
        service: ServiceType,
        method: impl Into<String>,
        access: RequiredAccess,
    ) -> Self {
        self.services
            .entry(service)
            .or_default()
            .methods
            .insert(method.into(), Arc::new(access));
        self
    }

    pub fn build(self) -> AccessRegistry {
        AccessRegistry {
            services: self.services,
            unprotected: Arc::new(RequiredAccess::unprotected()),
        }
    }
}

/// Memoizes any resolver per (method, service type)
///
/// Populated entries are read without blocking other readers.
pub struct CachingResolver<R> {
    inner: R,
    cache: DashMap<(String, ServiceType), Arc<RequiredAccess>>,
}

impl<R: MethodMetadataResolver> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

impl<R: MethodMetadataResolver> MethodMetadataResolver for CachingResolver<R> {
    fn resolve(&self, method: &str, service: &ServiceType) -> Arc<RequiredAccess> {
        let key = (method.to_string(), *service);
        if let Some(access) = self.cache.get(&key) {
            return access.clone();
        }

        self.cache
            .entry(key)
            .or_insert_with(|| self.inner.resolve(method, service))
            .clone()
    }
}

/// Last path segment of `/pkg.Service/Method`
pub(crate) fn method_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
