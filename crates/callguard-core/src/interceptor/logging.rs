//! Logs method, duration and outcome of every call.

use tokio::time::Instant;

use crate::error::{CallError, Code};
use crate::interceptor::{stream_fn, unary_fn, Interceptor, StreamOpenFn, UnaryCallFn};

/// Records each call with `tracing`. Never changes a result or error.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

fn outcome_code<T>(res: &Result<T, CallError>) -> Code {
    match res {
        Ok(_) => Code::Ok,
        Err(e) => e.code(),
    }
}

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn wrap_unary(&self, next: UnaryCallFn) -> UnaryCallFn {
        unary_fn(move |ctx, method, request| {
            let next = next.clone();
            async move {
                let start = Instant::now();
                let res = next(ctx, method.clone(), request).await;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let code = outcome_code(&res);
                match &res {
                    Ok(_) => tracing::info!(method = %method, elapsed_ms, %code, "unary call"),
                    Err(e) => tracing::warn!(
                        method = %method,
                        elapsed_ms,
                        %code,
                        error = %e,
                        "unary call failed"
                    ),
                }
                res
            }
        })
    }

    fn wrap_stream(&self, next: StreamOpenFn) -> StreamOpenFn {
        log_stream(next)
    }
}

fn log_stream(next: StreamOpenFn) -> StreamOpenFn {
    stream_fn(move |ctx, method| {
        let next = next.clone();
        async move {
            let start = Instant::now();
            let res = next(ctx, method.clone()).await;
            match res {
                Ok(mut session) => {
                    tracing::info!(
                        method = %method,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "stream opened"
                    );
                    session.on_finish(move |outcome| {
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        let code = outcome_code(outcome);
                        match outcome {
                            Ok(summary) => tracing::info!(
                                method = %method,
                                elapsed_ms,
                                %code,
                                sent = summary.sent,
                                received = summary.received,
                                "stream call"
                            ),
                            Err(e) => tracing::warn!(
                                method = %method,
                                elapsed_ms,
                                %code,
                                error = %e,
                                "stream call failed"
                            ),
                        }
                    });
                    Ok(session)
                }
                Err(e) => {
                    tracing::warn!(
                        method = %method,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        code = %e.code(),
                        error = %e,
                        "stream open failed"
                    );
                    Err(e)
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::context::CallContext;
    use crate::error::TransportError;

    #[tokio::test]
    async fn passes_result_through() {
        let ok = unary_fn(|_ctx, _method, req| async move { Ok(req) });
        let call = LoggingInterceptor::new().wrap_unary(ok);
        let res = call(CallContext::new(), "/t/Log".into(), json!({"a": 1})).await;
        assert_eq!(res.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn passes_error_through_unchanged() {
        let failing = unary_fn(|_ctx, _method, _req| async move {
            Err(TransportError::new(Code::NotFound, "no such account").into())
        });
        let call = LoggingInterceptor::new().wrap_unary(failing);
        let err = call(CallContext::new(), "/t/Log".into(), json!(null))
            .await
            .unwrap_err();
        match err {
            CallError::Transport(e) => {
                assert_eq!(e.code, Code::NotFound);
                assert_eq!(e.message, "no such account");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn is_named() {
        let i: Arc<dyn Interceptor> = Arc::new(LoggingInterceptor::new());
        assert_eq!(i.name(), "logging");
    }
}
