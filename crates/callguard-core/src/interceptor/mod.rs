//! Interceptors — composable wrappers around unary calls and stream opens.
//!
//! The chain applies them outermost first:
//! ```text
//! Call → [CircuitBreaker] → [Logging] → [BasicAuth] → [Timeout] → [Transport]
//! ```

pub mod auth;
pub mod breaker;
pub mod chain;
pub mod logging;
pub mod timeout;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::{CallContext, MethodId};
use crate::error::CallError;
use crate::stream::StreamSession;
use crate::transport::Payload;

pub use auth::{BasicAuthInterceptor, BasicCredentials, BearerToken, CredentialSource};
pub use breaker::CircuitBreakerInterceptor;
pub use chain::InterceptorChain;
pub use logging::LoggingInterceptor;
pub use timeout::TimeoutInterceptor;

pub type UnaryFuture = BoxFuture<'static, Result<Payload, CallError>>;
pub type StreamFuture = BoxFuture<'static, Result<StreamSession, CallError>>;

/// A unary call: context, method and request in, response out.
pub type UnaryCallFn = Arc<dyn Fn(CallContext, MethodId, Payload) -> UnaryFuture + Send + Sync>;

/// A stream open: context and method in, an open session out.
pub type StreamOpenFn = Arc<dyn Fn(CallContext, MethodId) -> StreamFuture + Send + Sync>;

/// Build a [`UnaryCallFn`] from an async closure.
pub fn unary_fn<F, Fut>(f: F) -> UnaryCallFn
where
    F: Fn(CallContext, MethodId, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, CallError>> + Send + 'static,
{
    Arc::new(
        move |ctx: CallContext, method: MethodId, request: Payload| -> UnaryFuture {
            Box::pin(f(ctx, method, request))
        },
    )
}

/// Build a [`StreamOpenFn`] from an async closure.
pub fn stream_fn<F, Fut>(f: F) -> StreamOpenFn
where
    F: Fn(CallContext, MethodId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StreamSession, CallError>> + Send + 'static,
{
    Arc::new(move |ctx: CallContext, method: MethodId| -> StreamFuture {
        Box::pin(f(ctx, method))
    })
}

/// A cross-cutting wrapper applied to every call issued by a client.
///
/// Both hooks default to passing `next` through untouched, so an interceptor
/// only implements the call shapes it cares about.
pub trait Interceptor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Return a call that does pre-processing, invokes `next`, then post-processing.
    fn wrap_unary(&self, next: UnaryCallFn) -> UnaryCallFn {
        next
    }

    /// Same pattern for stream opens.
    fn wrap_stream(&self, next: StreamOpenFn) -> StreamOpenFn {
        next
    }
}
