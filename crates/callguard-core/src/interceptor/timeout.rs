//! Per-call time budget.

use std::time::Duration;

use crate::error::CallError;
use crate::interceptor::{stream_fn, unary_fn, Interceptor, StreamOpenFn, UnaryCallFn};

/// Bounds every call with a fixed budget, measured from when the call reaches
/// this interceptor.
///
/// An existing earlier deadline is kept. For streams the budget covers the
/// whole session, not just the open.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutInterceptor {
    unary: Duration,
    stream: Duration,
}

impl TimeoutInterceptor {
    /// The same budget for unary calls and stream sessions.
    pub fn new(budget: Duration) -> Self {
        Self {
            unary: budget,
            stream: budget,
        }
    }

    /// Use a separate budget for stream sessions.
    pub fn with_stream_budget(mut self, budget: Duration) -> Self {
        self.stream = budget;
        self
    }

    pub fn unary_budget(&self) -> Duration {
        self.unary
    }

    pub fn stream_budget(&self) -> Duration {
        self.stream
    }
}

/// Reclassify remote deadline errors so callers see one kind.
fn classify(err: CallError) -> CallError {
    match err {
        CallError::Transport(e) if e.is_deadline_exceeded() => CallError::DeadlineExceeded {
            cause: Some(Box::new(CallError::Transport(e))),
        },
        other => other,
    }
}

impl Interceptor for TimeoutInterceptor {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn wrap_unary(&self, next: UnaryCallFn) -> UnaryCallFn {
        let budget = self.unary;
        unary_fn(move |ctx, method, request| {
            let next = next.clone();
            let ctx = ctx.with_timeout(budget);
            async move {
                let bounded = ctx.clone();
                bounded
                    .run(next(ctx, method, request))
                    .await
                    .map_err(classify)
            }
        })
    }

    fn wrap_stream(&self, next: StreamOpenFn) -> StreamOpenFn {
        let budget = self.stream;
        stream_fn(move |ctx, method| {
            let next = next.clone();
            let ctx = ctx.with_timeout(budget);
            async move {
                let bounded = ctx.clone();
                bounded.run(next(ctx, method)).await.map_err(classify)
            }
        })
    }
}
