//! Authorization Interception for gRPC Services
//!
//! This library sits between the tonic transport and business handlers. Every
//! call, whatever its shape, is checked against the access its method declares,
//! enriched with the caller's locale and a correlation id, and every failure is
//! reduced to a small, stable set of wire codes.
//!
//! ## Core Components
//!
//! - **MethodMetadataResolver**: maps a method to its `RequiredAccess`
//!   (`AccessRegistry` for declarations, `CachingResolver` for memoization)
//! - **ContextPropagator**: applies `culture` and trace context to the `CallContext`
//! - **authorize**: the gate, yielding `Allowed`, `NoPrincipal` or `Denied`
//! - **translate**: the fault translator, from `CallError` to the wire
//! - **AuthorizationInterceptor**: dispatcher for unary, server-streaming and
//!   duplex calls
//!
//! ## Wire Contract
//!
//! | Outcome                         | Code                | Message                                |
//! |---------------------------------|---------------------|----------------------------------------|
//! | No principal on protected call  | `UNAUTHENTICATED`   | `No user context.`                     |
//! | Principal lacks operations      | `PERMISSION_DENIED` | `You don't have the expected rights.`  |
//! | Business fault                  | `INTERNAL`          | fixed, messages as JSON in `details`   |
//! | Unexpected failure or panic     | `INTERNAL`          | `An error occurs.`                     |
//! | Handler returned a `Status`     | unchanged           | unchanged                              |
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use grpc_authz::{
//!     AccessRegistry, AuthorizationInterceptor, BusinessFault, CachingResolver, CallDescriptor,
//!     CallError, RequiredAccess, ServiceType,
//! };
//! use std::sync::Arc;
//!
//! struct ChatService;
//!
//! # async fn example() -> Result<(), tonic::Status> {
//! let chat = ServiceType::of::<ChatService>();
//! let registry = AccessRegistry::builder()
//!     .service(chat, RequiredAccess::new("messages", ["read"]))
//!     .method(chat, "SendMessage", RequiredAccess::new("messages", ["write"]))
//!     .build();
//!
//! let interceptor = Arc::new(AuthorizationInterceptor::new(CachingResolver::new(registry)));
//!
//! let call = CallDescriptor::new("/chat.ChatService/SendMessage", chat);
//! interceptor
//!     .unary(call, "hello".to_string(), |text, _ctx| async move {
//!         if text.is_empty() {
//!             return Err(CallError::from(BusinessFault::new("message is empty")));
//!         }
//!         Ok(text.len())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod access;
mod authz;
mod config;
mod context;
mod dispatcher;
mod error;
mod extensions;
mod fault;
mod locale;
mod principal;

pub use access::{
    AccessRegistry, AccessRegistryBuilder, CachingResolver, MethodMetadataResolver,
    RequiredAccess, ServiceType,
};
pub use authz::{authorize, AuthzOutcome};
pub use config::{InterceptorConfig, REFLECTION_PREFIX};
pub use context::{CallContext, CallDescriptor, ContextPropagator, TRACEPARENT_HEADER};
pub use dispatcher::{
    AuthorizationInterceptor, DuplexInvocation, Invocation, ResponseSink,
    ServerStreamingInvocation, UnaryInvocation,
};
pub use error::{ConfigError, Result};
pub use extensions::{PrincipalExt, PrincipalHandle};
pub use fault::{
    translate, BusinessFault, CallError, FaultCode, FaultEnvelope, Translation,
    BUSINESS_MESSAGE, DENIED_MESSAGE, NO_PRINCIPAL_MESSAGE, UNEXPECTED_MESSAGE,
};
pub use locale::{Locale, LocaleError};
pub use principal::{GrantedPrincipal, Principal};

// Re-export tonic Status for convenience
pub use tonic::Status;
