//! Per-call context and its propagation from inbound metadata

use crate::access::ServiceType;
use crate::config::InterceptorConfig;
use crate::extensions::PrincipalExt;
use crate::locale::Locale;
use crate::principal::Principal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::Request;
use tracing::debug;
use uuid::Uuid;

/// W3C trace context metadata key
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Everything the host transport knows about an inbound call
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Full method path, e.g. `/content.ContentService/GetPost`
    pub method: String,
    /// Service type bound when the handler was registered
    pub service: ServiceType,
    pub metadata: MetadataMap,
    pub principal: Option<Arc<dyn Principal>>,
    /// Ambient trace identifier, if a trace is already active
    pub trace_context: Option<String>,
    pub cancellation: CancellationToken,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>, service: ServiceType) -> Self {
        Self {
            method: method.into(),
            service,
            metadata: MetadataMap::new(),
            principal: None,
            trace_context: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Build a descriptor from a tonic request
    ///
    /// Copies the metadata, takes the principal attached by the
    /// authentication stage and uses `traceparent` as the ambient trace.
    ///
    /// The cancellation token starts unfired. The `serve_*` helpers of
    /// [`AuthorizationInterceptor`](crate::AuthorizationInterceptor) fire it
    /// when the caller drops the response stream. For unary calls tonic drops
    /// the whole future instead.
    pub fn from_request<T>(
        request: &Request<T>,
        method: impl Into<String>,
        service: ServiceType,
    ) -> Self {
        let trace_context = request
            .metadata()
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            method: method.into(),
            service,
            metadata: request.metadata().clone(),
            principal: request.principal(),
            trace_context,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_principal(mut self, principal: Arc<dyn Principal>) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_trace_context(mut self, trace_context: impl Into<String>) -> Self {
        self.trace_context = Some(trace_context.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Mutable state owned by exactly one invocation
///
/// Not `Clone`: each call, including each stream multiplexed on
/// one connection, gets its own instance.
#[derive(Debug)]
pub struct CallContext {
    locale: Option<Locale>,
    correlation_id: String,
    principal: Option<Arc<dyn Principal>>,
    cancellation: CancellationToken,
}

impl CallContext {
    /// Fresh context with a generated correlation id and no locale
    pub fn new(principal: Option<Arc<dyn Principal>>, cancellation: CancellationToken) -> Self {
        Self {
            locale: None,
            correlation_id: Uuid::new_v4().to_string(),
            principal,
            cancellation,
        }
    }

    pub(crate) fn for_call(call: &CallDescriptor) -> Self {
        Self::new(call.principal.clone(), call.cancellation.clone())
    }

    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn principal(&self) -> Option<&Arc<dyn Principal>> {
        self.principal.as_ref()
    }

    /// Signal fired when the host call is cancelled
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Applies locale and correlation hints to a [`CallContext`]
///
/// Best effort: nothing here can fail the call.
#[derive(Debug, Clone)]
pub struct ContextPropagator {
    culture_header: String,
    supported_languages: Vec<String>,
}

impl ContextPropagator {
    pub fn new(config: &InterceptorConfig) -> Self {
        Self {
            culture_header: config.culture_header.clone(),
            supported_languages: config.supported_languages.clone(),
        }
    }

    pub fn propagate(
        &self,
        metadata: &MetadataMap,
        trace_context: Option<&str>,
        ctx: &mut CallContext,
    ) {
        self.apply_culture(metadata, ctx);
        Self::apply_correlation_id(trace_context, ctx);
    }

    fn apply_culture(&self, metadata: &MetadataMap, ctx: &mut CallContext) {
        let Some(principal) = ctx.principal.clone() else {
            return;
        };

        let Some(tag) = metadata
            .get(self.culture_header.as_str())
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };

        match Locale::parse_restricted(tag, &self.supported_languages) {
            Ok(locale) => {
                principal.set_locale(locale.clone());
                ctx.locale = Some(locale);
            }
            Err(e) => {
                debug!(culture = tag, error = %e, "Ignoring culture metadata");
            }
        }
    }

    fn apply_correlation_id(trace_context: Option<&str>, ctx: &mut CallContext) {
        if let Some(id) = trace_context.map(str::trim).filter(|id| !id.is_empty()) {
            ctx.correlation_id = id.to_string();
        }
    }
}

impl Default for ContextPropagator {
    fn default() -> Self {
        Self::new(&InterceptorConfig::default())
    }
}
