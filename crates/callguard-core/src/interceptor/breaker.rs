//! Gates calls on a circuit breaker's admission decision.

use crate::interceptor::{stream_fn, unary_fn, Interceptor, StreamOpenFn, UnaryCallFn};
use crate::policy::CircuitBreaker;

/// Asks the breaker before every call and records the outcome afterwards.
///
/// Placed outermost so a rejected call touches nothing else. Stream outcomes
/// are recorded when the session is joined.
#[derive(Debug, Clone)]
pub struct CircuitBreakerInterceptor {
    breaker: CircuitBreaker,
}

impl CircuitBreakerInterceptor {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl Interceptor for CircuitBreakerInterceptor {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn wrap_unary(&self, next: UnaryCallFn) -> UnaryCallFn {
        let breaker = self.breaker.clone();
        unary_fn(move |ctx, method, request| {
            let next = next.clone();
            let admission = breaker.admit();
            async move {
                let admission = match admission {
                    Ok(admission) => admission,
                    Err(e) => {
                        tracing::debug!(method = %method, "rejected by circuit breaker");
                        return Err(e);
                    }
                };
                let res = next(ctx, method, request).await;
                admission.record(&res);
                res
            }
        })
    }

    fn wrap_stream(&self, next: StreamOpenFn) -> StreamOpenFn {
        let breaker = self.breaker.clone();
        stream_fn(move |ctx, method| {
            let next = next.clone();
            let admission = breaker.admit();
            async move {
                let admission = match admission {
                    Ok(admission) => admission,
                    Err(e) => {
                        tracing::debug!(method = %method, "stream rejected by circuit breaker");
                        return Err(e);
                    }
                };
                match next(ctx, method).await {
                    Ok(mut session) => {
                        session.on_finish(move |outcome| admission.record(outcome));
                        Ok(session)
                    }
                    Err(e) => {
                        let res = Err(e);
                        admission.record(&res);
                        res
                    }
                }
            }
        })
    }
}
