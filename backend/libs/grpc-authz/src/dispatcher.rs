//! Call dispatcher
//!
//! Every call shape runs the same sequence:
//!
//! 1. Propagate locale and correlation id into a fresh [`CallContext`]
//! 2. Resolve the method's [`RequiredAccess`](crate::RequiredAccess)
//! 3. Authorize; on failure the handler is never invoked
//! 4. Invoke the handler, racing it against the host's cancellation
//! 5. Translate any failure through [`translate`]
//!
//! What differs per shape (one response, a response stream, or two streams)
//! lives behind the [`Invocation`] trait.

use crate::access::{MethodMetadataResolver, ServiceType};
use crate::authz::authorize;
use crate::config::InterceptorConfig;
use crate::context::{CallContext, CallDescriptor, ContextPropagator};
use crate::fault::{translate, CallError, CANCELLED_MESSAGE};
use crate::principal::Principal;
use anyhow::anyhow;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, Stream};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, field, info_span, Instrument};

/// Outbound half of a streaming call
///
/// Elements are forwarded untouched. A send after the receiver is gone
/// reports [`CallError::Cancelled`], so `?` ends the handler quietly.
#[derive(Debug)]
pub struct ResponseSink<T> {
    tx: mpsc::Sender<Result<T, Status>>,
}

impl<T> Clone for ResponseSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ResponseSink<T> {
    pub fn new(tx: mpsc::Sender<Result<T, Status>>) -> Self {
        Self { tx }
    }

    /// Sink plus the stream tonic hands back to the caller
    pub fn channel(buffer: usize) -> (Self, ReceiverStream<Result<T, Status>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), ReceiverStream::new(rx))
    }

    /// Forward one element to the caller
    ///
    /// Waits for buffer space when the caller reads slower than the handler
    /// produces.
    ///
    /// ## Errors
    ///
    /// Returns [`CallError::Cancelled`] once the caller has dropped the
    /// response stream. Propagating it with `?` ends the call as a normal
    /// termination, never as a fault.
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use grpc_authz::{CallError, ResponseSink};
    ///
    /// async fn replay(sink: ResponseSink<String>, history: Vec<String>) -> Result<(), CallError> {
    ///     for line in history {
    ///         sink.send(line).await?;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn send(&self, item: T) -> Result<(), CallError> {
        self.tx.send(Ok(item)).await.map_err(|_| CallError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once the caller has dropped the response stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Terminate the stream with a status
    pub(crate) async fn fail(&self, status: Status) {
        if self.tx.send(Err(status)).await.is_err() {
            debug!("Receiver gone before final status could be delivered");
        }
    }
}

/// Shape-specific way of running the downstream handler
pub trait Invocation: Send {
    type Output: Send;

    /// Shapes on which infrastructure paths skip the prelude
    const BYPASS_ELIGIBLE: bool = false;

    /// Hand the admitted call to the downstream handler
    ///
    /// Called at most once per call, and only after authorization succeeded
    /// or the call was bypassed. The handler owns `ctx` for the rest of the
    /// call.
    ///
    /// ## Returns
    ///
    /// The handler's future. Failures are reported as [`CallError`] and
    /// classified by [`translate`] afterwards. Panics raised while building
    /// or polling the future are caught by the dispatcher.
    fn invoke(self, ctx: CallContext) -> BoxFuture<'static, Result<Self::Output, CallError>>;

    /// What the caller sees when the call is cancelled mid-invocation
    fn on_cancelled() -> Result<Self::Output, Status>;
}

/// Single request, single response
pub struct UnaryInvocation<Req, F> {
    request: Req,
    handler: F,
}

impl<Req, F> UnaryInvocation<Req, F> {
    pub fn new(request: Req, handler: F) -> Self {
        Self { request, handler }
    }
}

impl<Req, Resp, F, Fut> Invocation for UnaryInvocation<Req, F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(Req, CallContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
{
    type Output = Resp;

    fn invoke(self, ctx: CallContext) -> BoxFuture<'static, Result<Resp, CallError>> {
        (self.handler)(self.request, ctx).boxed()
    }

    // No value to hand back, so the caller gets the transport's own code.
    fn on_cancelled() -> Result<Resp, Status> {
        Err(Status::cancelled(CANCELLED_MESSAGE))
    }
}

/// Single request, streamed response
pub struct ServerStreamingInvocation<Req, T, F> {
    request: Req,
    sink: ResponseSink<T>,
    handler: F,
}

impl<Req, T, F> ServerStreamingInvocation<Req, T, F> {
    pub fn new(request: Req, sink: ResponseSink<T>, handler: F) -> Self {
        Self {
            request,
            sink,
            handler,
        }
    }
}

impl<Req, T, F, Fut> Invocation for ServerStreamingInvocation<Req, T, F>
where
    Req: Send + 'static,
    T: Send + 'static,
    F: FnOnce(Req, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CallError>> + Send + 'static,
{
    type Output = ();

    fn invoke(self, ctx: CallContext) -> BoxFuture<'static, Result<(), CallError>> {
        (self.handler)(self.request, self.sink, ctx).boxed()
    }

    fn on_cancelled() -> Result<(), Status> {
        Ok(())
    }
}

/// Bidirectional streaming
pub struct DuplexInvocation<S, T, F> {
    inbound: S,
    sink: ResponseSink<T>,
    handler: F,
}

impl<S, T, F> DuplexInvocation<S, T, F> {
    pub fn new(inbound: S, sink: ResponseSink<T>, handler: F) -> Self {
        Self {
            inbound,
            sink,
            handler,
        }
    }
}

impl<S, T, F, Fut> Invocation for DuplexInvocation<S, T, F>
where
    S: Stream + Send + 'static,
    T: Send + 'static,
    F: FnOnce(S, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CallError>> + Send + 'static,
{
    type Output = ();

    const BYPASS_ELIGIBLE: bool = true;

    fn invoke(self, ctx: CallContext) -> BoxFuture<'static, Result<(), CallError>> {
        (self.handler)(self.inbound, self.sink, ctx).boxed()
    }

    fn on_cancelled() -> Result<(), Status> {
        Ok(())
    }
}

/// Server-side authorization interceptor
///
/// Stateless across calls apart from the resolver, which may cache.
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_authz::{
///     AccessRegistry, AuthorizationInterceptor, CachingResolver, CallError, RequiredAccess,
///     ServiceType,
/// };
/// use tonic::{Request, Response, Status};
///
/// const CONTENT: ServiceType = ServiceType::named("content.ContentService");
///
/// # async fn example(request: Request<String>) -> Result<Response<String>, Status> {
/// let registry = AccessRegistry::builder()
///     .method(CONTENT, "GetPost", RequiredAccess::new("posts", ["read"]))
///     .build();
/// let interceptor = AuthorizationInterceptor::new(CachingResolver::new(registry));
///
/// interceptor
///     .handle_unary(request, "/content.ContentService/GetPost", CONTENT, |id, _ctx| async move {
///         Ok::<_, CallError>(format!("post {}", id))
///     })
///     .await
/// # }
/// ```
pub struct AuthorizationInterceptor<R> {
    resolver: R,
    propagator: ContextPropagator,
    config: InterceptorConfig,
}

impl<R: MethodMetadataResolver> AuthorizationInterceptor<R> {
    pub fn new(resolver: R) -> Self {
        Self::with_config(resolver, InterceptorConfig::default())
    }

    pub fn with_config(resolver: R, config: InterceptorConfig) -> Self {
        Self {
            resolver,
            propagator: ContextPropagator::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Shared prelude: propagate, resolve, authorize
    ///
    /// ## Returns
    ///
    /// The context the handler will own.
    ///
    /// ## Errors
    ///
    /// - `Status::unauthenticated` if the method is protected and no
    ///   principal is attached
    /// - `Status::permission_denied` if the principal lacks the operations
    pub fn admit(&self, call: &CallDescriptor) -> Result<CallContext, Status> {
        let mut ctx = CallContext::for_call(call);
        self.propagator
            .propagate(&call.metadata, call.trace_context.as_deref(), &mut ctx);

        let access = self.resolver.resolve(&call.method, &call.service);
        let principal: Option<&dyn Principal> = ctx.principal().map(|p| &**p);
        authorize(principal, &access).into_result()?;

        Ok(ctx)
    }

    /// Run any call shape through the interception sequence
    ///
    /// The handler is polled before the cancellation signal, so a handler
    /// waiting on [`CallContext::cancellation`] gets to finish its own
    /// cleanup. A handler that ignores the signal is dropped.
    ///
    /// ## Returns
    ///
    /// The handler's output, or [`Invocation::on_cancelled`] when the host
    /// cancelled the call.
    ///
    /// ## Errors
    ///
    /// - `Status::unauthenticated` / `Status::permission_denied` when the
    ///   call is rejected; the handler is never invoked
    /// - The translated fault when the handler fails or panics
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use grpc_authz::{
    ///     AccessRegistry, AuthorizationInterceptor, CallDescriptor, CallError, ServiceType,
    ///     UnaryInvocation,
    /// };
    ///
    /// # async fn example() -> Result<(), tonic::Status> {
    /// let interceptor = AuthorizationInterceptor::new(AccessRegistry::builder().build());
    /// let call = CallDescriptor::new("/echo.Echo/Say", ServiceType::named("echo.Echo"));
    ///
    /// let echoed = interceptor
    ///     .intercept(
    ///         call,
    ///         UnaryInvocation::new("hi".to_string(), |text, _ctx| async move {
    ///             Ok::<_, CallError>(text)
    ///         }),
    ///     )
    ///     .await?;
    /// assert_eq!(echoed, "hi");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn intercept<I: Invocation>(
        &self,
        call: CallDescriptor,
        invocation: I,
    ) -> Result<I::Output, Status> {
        let span = info_span!(
            "grpc_call",
            method = %call.method,
            service = %call.service,
            correlation_id = field::Empty,
        );

        let ctx = span.in_scope(|| {
            if I::BYPASS_ELIGIBLE && self.config.is_bypassed(&call.method) {
                debug!("Infrastructure call, skipping authorization");
                Ok(CallContext::for_call(&call))
            } else {
                self.admit(&call)
            }
        })?;
        span.record("correlation_id", ctx.correlation_id());

        let cancellation = call.cancellation.clone();
        // Building the handler future runs user code too, so it sits inside the guard.
        let invoked = AssertUnwindSafe(future::lazy(move |_| invocation.invoke(ctx)).flatten())
            .catch_unwind();

        let outcome = async move {
            tokio::select! {
                biased;
                outcome = invoked => Some(outcome),
                _ = cancellation.cancelled() => None,
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match outcome {
            Some(Ok(Ok(output))) => Ok(output),
            None | Some(Ok(Err(CallError::Cancelled))) => {
                debug!("Call cancelled during invocation");
                I::on_cancelled()
            }
            Some(Ok(Err(err))) => Err(translate(err).into_status()),
            Some(Err(panic)) => {
                let err = anyhow!("handler panicked: {}", panic_message(panic.as_ref()));
                Err(translate(CallError::Unexpected(err)).into_status())
            }
        })
    }

    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        call: CallDescriptor,
        request: Req,
        handler: F,
    ) -> Result<Resp, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: FnOnce(Req, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
    {
        self.intercept(call, UnaryInvocation::new(request, handler))
            .await
    }

    /// Unary entry point taking the tonic request directly
    pub async fn handle_unary<Req, Resp, F, Fut>(
        &self,
        request: Request<Req>,
        method: &str,
        service: ServiceType,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: FnOnce(Req, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
    {
        let call = CallDescriptor::from_request(&request, method, service);
        self.unary(call, request.into_inner(), handler)
            .await
            .map(Response::new)
    }

    pub async fn server_streaming<Req, T, F, Fut>(
        &self,
        call: CallDescriptor,
        request: Req,
        sink: ResponseSink<T>,
        handler: F,
    ) -> Result<(), Status>
    where
        Req: Send + 'static,
        T: Send + 'static,
        F: FnOnce(Req, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        self.intercept(call, ServerStreamingInvocation::new(request, sink, handler))
            .await
    }

    pub async fn duplex<S, T, F, Fut>(
        &self,
        call: CallDescriptor,
        inbound: S,
        sink: ResponseSink<T>,
        handler: F,
    ) -> Result<(), Status>
    where
        S: Stream + Send + 'static,
        T: Send + 'static,
        F: FnOnce(S, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        self.intercept(call, DuplexInvocation::new(inbound, sink, handler))
            .await
    }
}

impl<R: MethodMetadataResolver + 'static> AuthorizationInterceptor<R> {
    /// Spawn a server-streaming call and return the stream for tonic
    ///
    /// A rejected or failed call ends the stream with its status. Dropping
    /// the returned stream fires the call's cancellation signal.
    pub fn serve_server_streaming<Req, T, F, Fut>(
        self: &Arc<Self>,
        call: CallDescriptor,
        request: Req,
        handler: F,
    ) -> ReceiverStream<Result<T, Status>>
    where
        Req: Send + 'static,
        T: Send + 'static,
        F: FnOnce(Req, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        let (sink, stream) = ResponseSink::channel(self.config.stream_buffer);
        let interceptor = Arc::clone(self);

        tokio::spawn(async move {
            let cancellation = call.cancellation.clone();
            let running = interceptor.server_streaming(call, request, sink.clone(), handler);
            run_detached(sink, cancellation, running).await;
        });

        stream
    }

    /// Spawn a duplex call and return the outbound stream for tonic
    ///
    /// Same termination rules as
    /// [`serve_server_streaming`](Self::serve_server_streaming).
    pub fn serve_duplex<S, T, F, Fut>(
        self: &Arc<Self>,
        call: CallDescriptor,
        inbound: S,
        handler: F,
    ) -> ReceiverStream<Result<T, Status>>
    where
        S: Stream + Send + 'static,
        T: Send + 'static,
        F: FnOnce(S, ResponseSink<T>, CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        let (sink, stream) = ResponseSink::channel(self.config.stream_buffer);
        let interceptor = Arc::clone(self);

        tokio::spawn(async move {
            let cancellation = call.cancellation.clone();
            let running = interceptor.duplex(call, inbound, sink.clone(), handler);
            run_detached(sink, cancellation, running).await;
        });

        stream
    }
}

/// Drive a spawned streaming call, cancelling it when the caller goes away
async fn run_detached<T, Fut>(sink: ResponseSink<T>, cancellation: CancellationToken, running: Fut)
where
    Fut: Future<Output = Result<(), Status>>,
{
    tokio::pin!(running);

    let result = tokio::select! {
        result = &mut running => result,
        _ = sink.closed() => {
            debug!("Response stream dropped, cancelling call");
            cancellation.cancel();
            running.await
        }
    };

    if let Err(status) = result {
        sink.fail(status).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
